//! Inbound message envelope decoding and `SequencedOperation` normalization.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::range::LogOffset;

/// One `(offset, payload)` delivery from the upstream partitioned log.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub offset: LogOffset,
    pub value: Bytes,
}

impl InboundMessage {
    pub fn new(offset: LogOffset, value: impl Into<Bytes>) -> Self {
        Self {
            offset,
            value: value.into(),
        }
    }
}

/// The `operation` sub-object of a `SequencedOperation` payload.
///
/// Fields the processor cares about are typed; everything else round-trips through
/// `extra` so a bulk insert reproduces the document the log actually carried.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPayload {
    #[serde(default)]
    pub traces: Option<Vec<Value>>,
    pub metadata: Option<Value>,
    pub contents: Value,
    pub client_id: String,
    pub client_sequence_number: i64,
    pub sequence_number: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl OperationPayload {
    /// Normalize per §4.6: clear `traces`, and stringify `contents` when `metadata` is
    /// absent (back-compat for pre-metadata producers).
    pub fn normalize(&mut self) {
        self.traces = Some(Vec::new());
        if self.metadata.is_none() {
            let stringified = serde_json::to_string(&self.contents)
                .expect("serde_json::Value serialization is infallible");
            self.contents = Value::String(stringified);
        }
    }

    /// Whether this operation's metadata marks it as carrying split-document semantics,
    /// i.e. the content store's authoritative `sequenceNumber` needs updating.
    pub fn is_split(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("split"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Result of classifying and parsing one inbound message's JSON payload.
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    SequencedOperation {
        tenant_id: String,
        document_id: String,
        operation: OperationPayload,
    },
    /// Anything other than `SequencedOperation` — routed to the idle pipeline.
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SequencedOperationEnvelope {
    tenant_id: String,
    document_id: String,
    operation: OperationPayload,
}

/// Decode `value` as UTF-8 JSON and classify it by `type`.
///
/// Mirrors §4.6 step 1: a malformed payload (not UTF-8, or not valid JSON) is reported as
/// an error for the caller to log and drop; a well-formed payload whose `type` is not
/// `"SequencedOperation"` classifies as [`ParsedMessage::Other`] regardless of shape.
pub fn parse(value: &[u8]) -> Result<ParsedMessage, serde_json::Error> {
    let text = std::str::from_utf8(value).map_err(|e| serde::de::Error::custom(e.to_string()))?;
    let raw: Value = serde_json::from_str(text)?;

    let is_sequenced_operation = raw
        .get("type")
        .and_then(Value::as_str)
        .map(|t| t == "SequencedOperation")
        .unwrap_or(false);

    if !is_sequenced_operation {
        return Ok(ParsedMessage::Other);
    }

    let envelope: SequencedOperationEnvelope = serde_json::from_value(raw)?;
    Ok(ParsedMessage::SequencedOperation {
        tenant_id: envelope.tenant_id,
        document_id: envelope.document_id,
        operation: envelope.operation,
    })
}
