//! Error types for the checkpointed batching stream processor.

use thiserror::Error;

/// Errors reported by the storage-driver contract (`OperationStore`/`ContentStore`).
///
/// Duplicate-key is distinguished from every other failure because replays on restart
/// are expected and benign — the pipeline swallows it at the group level, while any
/// other variant fails the group, and in turn the batch and the pipeline.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("duplicate key")]
    DuplicateKey,

    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey)
    }
}

/// Everything that reaches [`crate::host::HostContext::error`].
#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
