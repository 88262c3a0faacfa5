//! Double-buffered batch pipeline: the coalescing + pipelined-send engine at the heart
//! of the Processor.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::ProcessorError;
use crate::keyed_batch::{KeyCodec, KeyedBatch};
use crate::range::{LogOffset, Range};

/// Callback slot invoked once a batch finishes draining successfully, with the highest
/// offset it carried. The same shape as the teacher's `OnErrorCallback` (`Arc<dyn Fn>`),
/// per §9's "event emitters → explicit channels/callbacks" design note.
pub type WorkCompleteCallback = Arc<dyn Fn(LogOffset) + Send + Sync>;

/// Callback slot invoked when a send fails. The pipeline does not retry; this is fatal
/// from the Processor's point of view (§7).
pub type ErrorCallback = Arc<dyn Fn(ProcessorError) + Send + Sync>;

/// One of the two slots a [`BatchPipeline`] owns: an accumulating/draining
/// [`KeyedBatch`](KeyedBatch) plus the highest offset it has seen.
/// `is_empty() ⇔ offset unset`, per §3.
struct OffsetBatch<K, V> {
    batch: KeyedBatch<K, V>,
    offset: Option<LogOffset>,
}

impl<K, V> OffsetBatch<K, V> {
    fn new(codec: KeyCodec<K>) -> Self {
        Self {
            batch: KeyedBatch::new(codec),
            offset: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.offset.is_none()
    }

    fn add(&mut self, id: &K, v: V, offset: LogOffset) {
        self.batch.add(id, v);
        self.offset = Some(offset);
    }

    fn clear(&mut self) {
        self.offset = None;
        self.batch.clear();
    }
}

impl<K, V: Clone> Clone for OffsetBatch<K, V>
where
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            batch: self.batch.clone(),
            offset: self.offset,
        }
    }
}

struct Inner<K, V> {
    pending: OffsetBatch<K, V>,
    current: OffsetBatch<K, V>,
    range: Range,
    closed: bool,
}

/// Double-buffered send loop bound to one sender and one [`Range`].
///
/// Exactly one of `pending`/`current` is ever "in flight" (draining). `add` always
/// returns immediately — the log reader is never blocked on storage latency — by
/// swapping the accumulated batch into `current` and spawning the send in the
/// background; new `add`s continue to land in the now-empty `pending` while `current`
/// drains. State mutation is serialized through a `parking_lot::Mutex` never held across
/// an `.await`, realizing §5's "single logical execution context" requirement.
pub struct BatchPipeline<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
    sender: Arc<dyn Fn(KeyedBatch<K, V>) -> BoxFuture<'static, Result<(), ProcessorError>> + Send + Sync>,
    on_work_complete: WorkCompleteCallback,
    on_error: ErrorCallback,
}

impl<K, V> Clone for BatchPipeline<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            sender: self.sender.clone(),
            on_work_complete: self.on_work_complete.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<K, V> BatchPipeline<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        codec: KeyCodec<K>,
        sender: impl Fn(KeyedBatch<K, V>) -> BoxFuture<'static, Result<(), ProcessorError>>
            + Send
            + Sync
            + 'static,
        on_work_complete: WorkCompleteCallback,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                pending: OffsetBatch::new(codec.clone()),
                current: OffsetBatch::new(codec.clone()),
                range: Range::EMPTY,
                closed: false,
            })),
            sender: Arc::new(sender),
            on_work_complete,
            on_error,
        }
    }

    /// Current `[tail, head]` range: the lowest offset not yet known durable, and the
    /// highest offset ever added.
    pub fn range(&self) -> Range {
        self.inner.lock().range
    }

    /// Flip to `Closed`: no further sends are initiated. In-flight sends complete
    /// naturally and still update `range`/fire `workComplete`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// §4.4 `add`: record the offset, append to `pending`, and request a send.
    ///
    /// Preconditions on the caller: `offset` is monotonically non-decreasing across
    /// calls to this pipeline (enforced by the log reader upstream).
    pub fn add(&self, id: &K, value: V, offset: LogOffset) {
        {
            let mut guard = self.inner.lock();
            let was_empty = guard.range.is_empty();
            let tail = if was_empty { offset - 1 } else { guard.range.tail() };
            guard.range = Range::new(tail, offset);
            guard.pending.add(id, value, offset);
        }
        self.request_send();
    }

    /// §4.4 `requestSend`: a send is already in flight iff `current` is non-empty.
    fn request_send(&self) {
        let mut guard = self.inner.lock();
        if !guard.current.is_empty() {
            return;
        }
        self.send_pending_locked(&mut guard);
    }

    /// §4.4 `sendPending`, invoked with the lock already held. Swaps `pending` into
    /// `current` and spawns the actual send in the background so this call never awaits.
    fn send_pending_locked(&self, guard: &mut Inner<K, V>) {
        if guard.closed {
            return;
        }
        if guard.pending.is_empty() {
            return;
        }

        std::mem::swap(&mut guard.pending, &mut guard.current);
        // `current` stays populated for the failure-inspection hook (§8 Scenario E) and
        // the in-flight invariant; the spawned task gets an owned clone to send.
        let batch_clone = guard.current.batch.clone();
        let offset = guard.current.offset.expect("current is non-empty after swap");

        let inner = self.inner.clone();
        let sender = self.sender.clone();
        let on_work_complete = self.on_work_complete.clone();
        let on_error = self.on_error.clone();
        let pipeline = self.clone();

        tokio::spawn(async move {
            let result = (sender)(batch_clone).await;
            match result {
                Ok(()) => {
                    {
                        let mut guard = inner.lock();
                        guard.range = Range::new(offset, guard.range.head());
                        guard.current.clear();
                    }
                    (on_work_complete)(offset);
                    // Recurse: more may have accumulated in `pending` while this send
                    // was in flight.
                    pipeline.request_send();
                }
                Err(err) => {
                    // `current` is left populated and `range.tail` unadvanced: a restart
                    // replays from the last checkpoint and rebuilds this batch.
                    (on_error)(err);
                }
            }
        });
    }
}

/// Object-safe view of a [`BatchPipeline`] for heterogeneous storage in a
/// [`crate::pipeline_set::PipelineSet`], which holds pipelines keyed by different `K`/`V`
/// pairs (the primary pipeline keyed by `DocumentKey`, the idle pipeline keyed by `()`).
pub trait PipelineHandle: Send + Sync {
    fn range(&self) -> Range;
    fn close(&self);
}

impl<K, V> PipelineHandle for BatchPipeline<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn range(&self) -> Range {
        BatchPipeline::range(self)
    }

    fn close(&self) {
        BatchPipeline::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn string_codec() -> KeyCodec<String> {
        KeyCodec::new(|k: &String| k.clone(), |s: &str| s.to_string())
    }

    fn noop_callbacks() -> (WorkCompleteCallback, ErrorCallback) {
        (Arc::new(|_| {}), Arc::new(|_| {}))
    }

    #[tokio::test]
    async fn add_to_idle_pipeline_sets_tail_to_offset_minus_one() {
        let (wc, err) = noop_callbacks();
        let pipeline: BatchPipeline<String, i32> = BatchPipeline::new(
            string_codec(),
            |_batch| Box::pin(async { Ok(()) }),
            wc,
            err,
        );
        pipeline.add(&"k".to_string(), 1, 10);
        // Give the spawned send a chance to run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pipeline.range().head(), 10);
    }

    #[tokio::test]
    async fn successful_send_advances_tail_to_current_offset_and_emits_work_complete() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let on_work_complete: WorkCompleteCallback = Arc::new(move |offset| seen2.lock().push(offset));
        let on_error: ErrorCallback = Arc::new(|_| panic!("unexpected error"));

        let pipeline: BatchPipeline<String, i32> =
            BatchPipeline::new(string_codec(), |_batch| Box::pin(async { Ok(()) }), on_work_complete, on_error);

        pipeline.add(&"k".to_string(), 1, 10);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*seen.lock(), vec![10]);
        assert_eq!(pipeline.range().tail(), 10);
        assert_eq!(pipeline.range().head(), 10);
    }

    #[tokio::test]
    async fn burst_while_send_in_flight_coalesces_into_exactly_two_sends() {
        let send_count = Arc::new(AtomicUsize::new(0));
        let group_sizes: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());

        let send_count2 = send_count.clone();
        let group_sizes2 = group_sizes.clone();
        let gate2 = gate.clone();

        let (wc, _) = noop_callbacks();
        let on_error: ErrorCallback = Arc::new(|_| panic!("unexpected error"));

        let pipeline: BatchPipeline<String, i32> = BatchPipeline::new(
            string_codec(),
            move |batch| {
                let send_count = send_count2.clone();
                let group_sizes = group_sizes2.clone();
                let gate = gate2.clone();
                Box::pin(async move {
                    let n = send_count.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        // Block the first send until the burst has fully landed in
                        // `pending`, forcing the second send to coalesce offsets 2..100.
                        gate.notified().await;
                    }
                    let values_seen = Arc::new(AtomicUsize::new(0));
                    let values_seen2 = values_seen.clone();
                    batch
                        .map(move |_key: String, values: &[i32]| {
                            values_seen2.fetch_add(values.len(), Ordering::SeqCst);
                            async move { Ok::<(), ProcessorError>(()) }
                        })
                        .await
                        .unwrap();
                    group_sizes.lock().push(values_seen.load(Ordering::SeqCst));
                    Ok(())
                })
            },
            wc,
            on_error,
        );

        pipeline.add(&"k".to_string(), 1, 1);
        tokio::task::yield_now().await;

        for offset in 2..=100 {
            pipeline.add(&"k".to_string(), offset, offset);
        }

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(send_count.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.range().tail(), 100);
        // First send carried only offset 1; the second coalesced offsets 2..100.
        assert_eq!(*group_sizes.lock(), vec![1, 99]);
    }

    #[tokio::test]
    async fn failed_send_retains_current_and_does_not_advance_tail() {
        let on_error_calls = Arc::new(AtomicUsize::new(0));
        let on_error_calls2 = on_error_calls.clone();
        let on_error: ErrorCallback = Arc::new(move |_| {
            on_error_calls2.fetch_add(1, Ordering::SeqCst);
        });
        let (wc, _) = noop_callbacks();

        let pipeline: BatchPipeline<String, i32> = BatchPipeline::new(
            string_codec(),
            |_batch| Box::pin(async { Err(ProcessorError::InvariantViolation("boom".into())) }),
            wc,
            on_error,
        );

        pipeline.add(&"k".to_string(), 1, 10);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(on_error_calls.load(Ordering::SeqCst), 1);
        // tail stayed at offset - 1: the batch never became durable.
        assert_eq!(pipeline.range().tail(), 9);
        assert_eq!(pipeline.range().head(), 10);
    }

    #[tokio::test]
    async fn closed_pipeline_initiates_no_further_sends() {
        let send_count = Arc::new(AtomicUsize::new(0));
        let send_count2 = send_count.clone();
        let (wc, err) = noop_callbacks();

        let pipeline: BatchPipeline<String, i32> = BatchPipeline::new(
            string_codec(),
            move |_batch| {
                let send_count = send_count2.clone();
                Box::pin(async move {
                    send_count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            },
            wc,
            err,
        );

        pipeline.close();
        pipeline.add(&"k".to_string(), 1, 10);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(send_count.load(Ordering::SeqCst), 0);
        // range bookkeeping still happens on add even while closed.
        assert_eq!(pipeline.range().head(), 10);
    }
}
