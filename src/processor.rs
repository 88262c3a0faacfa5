//! Top-level lambda: classifies inbound messages, routes them to the right pipeline, and
//! wires pipeline errors/checkpoints through to the host context.

use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use tracing::warn;

use crate::config::ProcessorConfig;
use crate::error::{ProcessorError, StoreError};
use crate::host::HostContext;
use crate::keyed_batch::{unit_codec, KeyCodec, KeyedBatch};
use crate::message::{self, InboundMessage, OperationPayload, ParsedMessage};
use crate::pipeline::BatchPipeline;
use crate::pipeline_set::PipelineSet;
use crate::range::LogOffset;
use crate::store::{ContentStore, OperationDocument, OperationStore};

/// Routing key for the primary pipeline: one group per `(tenantId, documentId)` pair.
///
/// Encoded/decoded losslessly as a JSON array (`["tenant","doc"]`, see
/// [`document_key_codec`]) so tenant/document id strings containing whatever separator an
/// ad hoc string-join scheme might otherwise pick still round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub tenant_id: String,
    pub document_id: String,
}

fn document_key_codec() -> KeyCodec<DocumentKey> {
    KeyCodec::new(
        |k: &DocumentKey| {
            serde_json::to_string(&[k.tenant_id.as_str(), k.document_id.as_str()])
                .expect("string array serialization is infallible")
        },
        |s: &str| {
            let parts: [String; 2] =
                serde_json::from_str(s).expect("DocumentKey was encoded by document_key_codec");
            DocumentKey {
                tenant_id: parts[0].clone(),
                document_id: parts[1].clone(),
            }
        },
    )
}

/// Top-level processor: owns a [`PipelineSet`] with two named pipelines — `primary` for
/// `SequencedOperation` traffic, `idle` for everything else — and wires their events to
/// the [`HostContext`].
pub struct Processor {
    pipeline_set: PipelineSet,
    primary: BatchPipeline<DocumentKey, OperationPayload>,
    idle: BatchPipeline<(), ()>,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(
        host: Arc<dyn HostContext>,
        operation_store: Arc<dyn OperationStore>,
        content_store: Option<Arc<dyn ContentStore>>,
        config: ProcessorConfig,
    ) -> Self {
        let host_for_error = host.clone();
        let on_error: crate::pipeline::ErrorCallback =
            Arc::new(move |err| host_for_error.error(err, true));

        let host_for_checkpoint = host.clone();
        let on_offset_changed: crate::pipeline_set::OffsetChangedCallback =
            Arc::new(move |offset| host_for_checkpoint.checkpoint(offset));

        let pipeline_set = PipelineSet::new(on_error, on_offset_changed);

        let primary = pipeline_set.create_pipeline(
            document_key_codec(),
            move |batch| primary_send(batch, operation_store.clone(), content_store.clone()),
        );

        let idle = pipeline_set.create_pipeline(unit_codec(), |_batch| Box::pin(async { Ok(()) }));

        Self {
            pipeline_set,
            primary,
            idle,
            config,
        }
    }

    /// §4.6 `handle`: decode, classify, and route one inbound message.
    pub fn handle(&self, message: InboundMessage) {
        match message::parse(&message.value) {
            Ok(ParsedMessage::SequencedOperation {
                tenant_id,
                document_id,
                mut operation,
            }) => {
                operation.normalize();
                let key = DocumentKey { tenant_id, document_id };
                self.primary.add(&key, operation, message.offset);
            }
            Ok(ParsedMessage::Other) => {
                self.idle.add(&(), (), message.offset);
            }
            Err(err) => {
                if self.config.log_malformed_payloads {
                    warn!(offset = message.offset, error = %err, payload = %String::from_utf8_lossy(&message.value), "dropping malformed inbound message");
                } else {
                    warn!(offset = message.offset, error = %err, payload_len = message.value.len(), "dropping malformed inbound message");
                }

                if self.config.pin_checkpoint_on_parse_error {
                    // Route the dropped offset to idle so it still contributes to
                    // `lastOffset`, pinning the checkpoint forward across runs of bad
                    // messages (§9 Open Question, opted in).
                    self.idle.add(&(), (), message.offset);
                }
            }
        }
    }

    pub fn last_offset(&self) -> LogOffset {
        self.pipeline_set.last_offset()
    }

    pub fn close(&self) {
        self.pipeline_set.close();
    }
}

/// §4.6 `primarySend`: for each `(tenantId, documentId)` group, concurrently bulk-insert
/// every operation and, for any operation carrying split semantics, update the content
/// store's authoritative `sequenceNumber`. Duplicate-key errors from either write are
/// swallowed (§7) — replays on restart are expected — any other error fails the group.
fn primary_send(
    batch: KeyedBatch<DocumentKey, OperationPayload>,
    operation_store: Arc<dyn OperationStore>,
    content_store: Option<Arc<dyn ContentStore>>,
) -> BoxFuture<'static, Result<(), ProcessorError>> {
    Box::pin(async move {
        batch
            .map(move |key, operations: &[OperationPayload]| {
                let operation_store = operation_store.clone();
                let content_store = content_store.clone();
                let documents: Vec<OperationDocument> = operations
                    .iter()
                    .map(|op| OperationDocument {
                        tenant_id: key.tenant_id.clone(),
                        document_id: key.document_id.clone(),
                        // The batch only retains the coalesced watermark offset, not a
                        // per-operation one (§4.4) — `sequenceNumber` is the operation's
                        // own durable ordinal and the closest available stand-in.
                        offset: op.sequence_number,
                        operation: op.clone(),
                    })
                    .collect();
                let split_sequence_numbers: Vec<i64> = operations
                    .iter()
                    .filter(|op| op.is_split())
                    .map(|op| op.sequence_number)
                    .collect();
                let key = key.clone();

                async move {
                    let insert = insert_ignoring_duplicates(&*operation_store, documents);
                    let updates = split_sequence_numbers.into_iter().map(|seq| {
                        let content_store = content_store.clone();
                        let key = key.clone();
                        async move {
                            match content_store {
                                Some(store) => {
                                    update_ignoring_duplicates(&*store, &key.tenant_id, &key.document_id, seq)
                                        .await
                                }
                                None => Ok(()),
                            }
                        }
                    });

                    let (insert_result, update_results) =
                        futures::future::join(insert, try_join_all(updates)).await;
                    insert_result?;
                    update_results?;
                    Ok(())
                }
            })
            .await
    })
}

async fn insert_ignoring_duplicates(
    store: &dyn OperationStore,
    documents: Vec<OperationDocument>,
) -> Result<(), ProcessorError> {
    match store.insert_many(documents).await {
        Ok(()) => Ok(()),
        Err(StoreError::DuplicateKey) => Ok(()),
        Err(other) => Err(ProcessorError::Storage(other)),
    }
}

async fn update_ignoring_duplicates(
    store: &dyn ContentStore,
    tenant_id: &str,
    document_id: &str,
    sequence_number: i64,
) -> Result<(), ProcessorError> {
    match store
        .update_sequence_number(tenant_id, document_id, sequence_number)
        .await
    {
        Ok(()) => Ok(()),
        Err(StoreError::DuplicateKey) => Ok(()),
        Err(other) => Err(ProcessorError::Storage(other)),
    }
}
