//! Holds the set of [`BatchPipeline`]s sharing one log stream and derives the checkpoint
//! offset to hand the host.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::ProcessorError;
use crate::keyed_batch::{KeyCodec, KeyedBatch};
use crate::pipeline::{BatchPipeline, ErrorCallback, PipelineHandle, WorkCompleteCallback};
use crate::range::{LogOffset, Range};

/// Callback slot fired whenever [`PipelineSet::recompute`] advances `lastOffset`.
pub type OffsetChangedCallback = Arc<dyn Fn(LogOffset) + Send + Sync>;

struct SetInner {
    pipelines: Vec<Arc<dyn PipelineHandle>>,
    last_offset: LogOffset,
}

/// Owns an ordered collection of heterogeneous [`BatchPipeline`]s and derives the global
/// checkpoint offset from their ranges on every `workComplete`.
///
/// `lastOffset` starts at `LogOffset::MIN` (the `-∞` sentinel) and is monotonically
/// non-decreasing by construction: [`PipelineSet::recompute`] asserts this on every call,
/// treating a violation as a programmer error (§4.5 step 5).
#[derive(Clone)]
pub struct PipelineSet {
    inner: Arc<Mutex<SetInner>>,
    on_error: ErrorCallback,
    on_offset_changed: OffsetChangedCallback,
}

impl PipelineSet {
    pub fn new(on_error: ErrorCallback, on_offset_changed: OffsetChangedCallback) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SetInner {
                pipelines: Vec::new(),
                last_offset: LogOffset::MIN,
            })),
            on_error,
            on_offset_changed,
        }
    }

    /// §4.5 `createPipeline`: build a new pipeline, wire its `workComplete` to
    /// [`Self::recompute`] and its `error` to this set's `on_error` (re-emitted
    /// unchanged), and register it so it participates in `recompute` going forward.
    pub fn create_pipeline<K, V>(
        &self,
        codec: KeyCodec<K>,
        sender: impl Fn(KeyedBatch<K, V>) -> BoxFuture<'static, Result<(), ProcessorError>> + Send + Sync + 'static,
    ) -> BatchPipeline<K, V>
    where
        K: Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let set = self.clone();
        let on_work_complete: WorkCompleteCallback = Arc::new(move |_offset| set.recompute());
        let on_error = self.on_error.clone();

        let pipeline = BatchPipeline::new(codec, sender, on_work_complete, on_error);
        self.inner
            .lock()
            .pipelines
            .push(Arc::new(pipeline.clone()) as Arc<dyn PipelineHandle>);
        pipeline
    }

    /// §4.5 `recompute`, invoked on every `workComplete`.
    ///
    /// The safe checkpoint is the tail of the union across every pipeline that still has
    /// a send outstanding — the greatest offset such that everything at or below it is
    /// durable everywhere. A pipeline with nothing in flight (`tail == head`) has nothing
    /// left to drain and must not pin that union below its own head, so it is excluded
    /// from the union entirely. When no pipeline has pending work, the safe offset
    /// advances to the highest offset any pipeline has ever seen, since at that point
    /// everything is durable (§4.5 rationale; Testable Property 3).
    pub fn recompute(&self) {
        let mut guard = self.inner.lock();
        let mut max_head = guard.last_offset;
        let mut union = Range::EMPTY;
        for pipeline in &guard.pipelines {
            let r = pipeline.range();
            max_head = max_head.max(r.head());
            if r.has_pending_work() {
                union = Range::union(union, r);
            }
        }
        let offset = if union.is_empty() { max_head } else { union.tail() };

        assert!(
            offset >= guard.last_offset,
            "checkpoint invariant violated: derived offset {offset} < lastOffset {}",
            guard.last_offset
        );

        if offset != guard.last_offset {
            guard.last_offset = offset;
            drop(guard);
            (self.on_offset_changed)(offset);
        }
    }

    /// §4.5 `close`: close every pipeline. New `add` calls still mutate state but no
    /// longer trigger sends; in-flight sends complete naturally.
    pub fn close(&self) {
        for pipeline in &self.inner.lock().pipelines {
            pipeline.close();
        }
    }

    pub fn last_offset(&self) -> LogOffset {
        self.inner.lock().last_offset
    }
}
