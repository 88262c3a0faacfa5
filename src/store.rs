//! The storage-driver contract the Processor writes through.
//!
//! The real driver (a document database client) is out of scope per §1; these traits
//! expose only the two primitives the Processor needs — bulk insert and conditional
//! update — plus the duplicate-key signal the error-handling design in §7 depends on.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::message::OperationPayload;

/// One operation document as it is written to the op collection.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDocument {
    pub tenant_id: String,
    pub document_id: String,
    pub offset: crate::range::LogOffset,
    pub operation: OperationPayload,
}

/// The op-collection side of the storage driver: `insertMany(documents, ordered=false)`.
#[async_trait]
pub trait OperationStore: Send + Sync {
    async fn insert_many(&self, documents: Vec<OperationDocument>) -> Result<(), StoreError>;
}

/// The content-collection side: a conditional update keyed by tenant/document, setting
/// the authoritative `sequenceNumber` for split-semantics operations. May be absent
/// entirely (back-compat, §6) in which case the Processor skips these updates.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn update_sequence_number(
        &self,
        tenant_id: &str,
        document_id: &str,
        sequence_number: i64,
    ) -> Result<(), StoreError>;
}

/// In-memory test double for [`OperationStore`], recording every accepted document.
///
/// Mirrors how the teacher's own test suite stubs transport (see `sse.rs`'s inline test
/// module) rather than hitting a real store; `mockall`-generated mocks of the traits above
/// cover the failure-injection scenarios in the integration tests under `tests/`.
#[derive(Default)]
pub struct InMemoryOperationStore {
    inserted: parking_lot::Mutex<Vec<OperationDocument>>,
    duplicate_keys: parking_lot::Mutex<std::collections::HashSet<(String, String, i64)>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `(tenant_id, document_id, client_sequence_number)` as already present, so a
    /// later insert of it reports [`StoreError::DuplicateKey`] instead of succeeding.
    pub fn seed_duplicate(&self, tenant_id: &str, document_id: &str, client_sequence_number: i64) {
        self.duplicate_keys.lock().insert((
            tenant_id.to_string(),
            document_id.to_string(),
            client_sequence_number,
        ));
    }

    pub fn inserted(&self) -> Vec<OperationDocument> {
        self.inserted.lock().clone()
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn insert_many(&self, documents: Vec<OperationDocument>) -> Result<(), StoreError> {
        let duplicate_keys = self.duplicate_keys.lock();
        for doc in &documents {
            let key = (
                doc.tenant_id.clone(),
                doc.document_id.clone(),
                doc.operation.client_sequence_number,
            );
            if duplicate_keys.contains(&key) {
                return Err(StoreError::DuplicateKey);
            }
        }
        drop(duplicate_keys);
        self.inserted.lock().extend(documents);
        Ok(())
    }
}

/// In-memory test double for [`ContentStore`].
#[derive(Default)]
pub struct InMemoryContentStore {
    sequence_numbers: parking_lot::Mutex<std::collections::HashMap<(String, String), i64>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence_number(&self, tenant_id: &str, document_id: &str) -> Option<i64> {
        self.sequence_numbers
            .lock()
            .get(&(tenant_id.to_string(), document_id.to_string()))
            .copied()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn update_sequence_number(
        &self,
        tenant_id: &str,
        document_id: &str,
        sequence_number: i64,
    ) -> Result<(), StoreError> {
        self.sequence_numbers.lock().insert(
            (tenant_id.to_string(), document_id.to_string()),
            sequence_number,
        );
        Ok(())
    }
}
