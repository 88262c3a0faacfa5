//! Checkpointed batching stream processor for partitioned append-only logs.
//!
//! Reads from a sequential, checkpointable log source, classifies and coalesces inbound
//! messages into per-key batches, writes those batches through concurrently, and derives
//! a cross-pipeline checkpoint offset safe to persist after each completed write.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use checkpoint_batcher::{
//!     HostContext, InboundMessage, OperationStore, ContentStore, ProcessorConfig,
//!     ProcessorError, Processor,
//! };
//! use std::sync::Arc;
//!
//! struct MyHost;
//! impl HostContext for MyHost {
//!     fn checkpoint(&self, offset: i64) {
//!         println!("checkpoint advanced to {offset}");
//!     }
//!     fn error(&self, err: ProcessorError, restart: bool) {
//!         eprintln!("fatal: {err} (restart={restart})");
//!     }
//! }
//!
//! # async fn run(operation_store: Arc<dyn OperationStore>) {
//! let processor = Processor::new(Arc::new(MyHost), operation_store, None, ProcessorConfig::default());
//! processor.handle(InboundMessage::new(1, b"{\"type\":\"heartbeat\"}".to_vec()));
//! # }
//! ```

mod config;
mod error;
mod host;
mod keyed_batch;
mod message;
mod pipeline;
mod pipeline_set;
mod processor;
mod range;
mod store;

pub use config::ProcessorConfig;
pub use error::{ProcessorError, StoreError};
pub use host::HostContext;
pub use keyed_batch::{unit_codec, KeyCodec, KeyedBatch};
pub use message::{InboundMessage, OperationPayload, ParsedMessage};
pub use pipeline::{BatchPipeline, ErrorCallback, PipelineHandle, WorkCompleteCallback};
pub use pipeline_set::{OffsetChangedCallback, PipelineSet};
pub use processor::{DocumentKey, Processor};
pub use range::{LogOffset, Range};
pub use store::{ContentStore, InMemoryContentStore, InMemoryOperationStore, OperationDocument, OperationStore};
