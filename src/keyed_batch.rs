//! Grouping-by-key accumulator used by [`crate::pipeline::BatchPipeline`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::try_join_all;

/// Explicit encoder/decoder pair for a routing key `K`.
///
/// `K` is required to round-trip losslessly through a stable string form. Rather than a
/// trait bound on `K` (which would force every caller's key type into a single universal
/// serialization), the codec is an explicit value supplied at construction — the same
/// shape as [`crate::pipeline::Sender`] being a plain `Arc<dyn Fn...>` rather than a trait
/// object implemented by the caller's type.
#[derive(Clone)]
pub struct KeyCodec<K> {
    encode: Arc<dyn Fn(&K) -> String + Send + Sync>,
    decode: Arc<dyn Fn(&str) -> K + Send + Sync>,
}

impl<K> KeyCodec<K> {
    pub fn new(
        encode: impl Fn(&K) -> String + Send + Sync + 'static,
        decode: impl Fn(&str) -> K + Send + Sync + 'static,
    ) -> Self {
        Self {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    pub fn encode(&self, key: &K) -> String {
        (self.encode)(key)
    }

    pub fn decode(&self, encoded: &str) -> K {
        (self.decode)(encoded)
    }
}

impl<K> fmt::Debug for KeyCodec<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCodec").finish_non_exhaustive()
    }
}

/// A singleton codec for the degenerate "idle" pipeline's null key.
pub fn unit_codec() -> KeyCodec<()> {
    KeyCodec::new(|_| String::new(), |_| ())
}

/// Mapping from an encoded key to an insertion-ordered sequence of values.
///
/// Mutated only by [`KeyedBatch::add`]; cleared wholesale when a pipeline's `current`
/// slot finishes draining.
#[derive(Clone)]
pub struct KeyedBatch<K, V> {
    codec: KeyCodec<K>,
    groups: HashMap<String, Vec<V>>,
}

impl<K, V> KeyedBatch<K, V> {
    pub fn new(codec: KeyCodec<K>) -> Self {
        Self {
            codec,
            groups: HashMap::new(),
        }
    }

    /// Append `v` to the group for `id`, creating the group if absent.
    pub fn add(&mut self, id: &K, v: V) {
        self.groups.entry(self.codec.encode(id)).or_default().push(v);
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Invoke `f(decoded_key, values)` for every group, concurrently.
    ///
    /// Completes once every invocation completes; fails with the first observed error if
    /// any invocation fails. No group's values are cloned to support the fan-out — each
    /// `f` call borrows its group's slice for the lifetime of its future.
    pub async fn map<F, Fut, E>(&self, f: F) -> Result<(), E>
    where
        F: Fn(K, &[V]) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let futures = self
            .groups
            .iter()
            .map(|(encoded, values)| f(self.codec.decode(encoded), values.as_slice()));
        try_join_all(futures).await?;
        Ok(())
    }
}

impl<K, V> fmt::Debug for KeyedBatch<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedBatch")
            .field("group_count", &self.groups.len())
            .finish_non_exhaustive()
    }
}
