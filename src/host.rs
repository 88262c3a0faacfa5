//! The host context contract: the checkpoint sink and the fatal-error sink.

use crate::error::ProcessorError;
use crate::range::LogOffset;

/// Sink the Processor calls into to persist the log-reader checkpoint and to surface
/// fatal errors. No persisted state is owned by the Processor itself (§6) — durability
/// lives entirely in the storage driver and whatever implements this trait.
pub trait HostContext: Send + Sync {
    /// Advance the durable log position to `offset`. Idempotent for equal values.
    fn checkpoint(&self, offset: LogOffset);

    /// Fatal error sink. When `restart` is true, the host is expected to terminate and
    /// restart the processor, relying on replay-from-checkpoint for recovery.
    fn error(&self, err: ProcessorError, restart: bool);
}
