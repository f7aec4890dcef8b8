use dashmap::DashMap;

use crate::error::PaxosError;
use crate::storage::RecordStore;
use crate::types::AcceptorRecord;

/// In-memory record store.
///
/// Wrap it in an `Arc` and hand clones to successive acceptors to emulate a
/// node restarting on top of the same durable state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, AcceptorRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<AcceptorRecord>, PaxosError> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn store(&self, key: &str, record: &AcceptorRecord) -> Result<(), PaxosError> {
        self.records.insert(key.to_owned(), record.clone());
        Ok(())
    }
}
