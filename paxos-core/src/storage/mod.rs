//! Persistence of per-key acceptor records.
//!
//! A backend only has to load and replace whole records. The acceptor holds a
//! per-key lock around every load/modify/store sequence, so backends never see
//! two concurrent writers for the same key.

use std::future::Future;

use crate::error::PaxosError;
use crate::types::AcceptorRecord;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Durable key-value storage for [`AcceptorRecord`]s.
pub trait RecordStore: Send + Sync {
    /// Returns `None` when nothing was ever stored for `key`.
    fn load(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<AcceptorRecord>, PaxosError>> + Send;

    /// Replace the record for `key`.
    ///
    /// Must be all-or-nothing: on error the previously stored record is
    /// still the one returned by [`RecordStore::load`].
    fn store(
        &self,
        key: &str,
        record: &AcceptorRecord,
    ) -> impl Future<Output = Result<(), PaxosError>> + Send;
}

impl<S: RecordStore> RecordStore for std::sync::Arc<S> {
    async fn load(&self, key: &str) -> Result<Option<AcceptorRecord>, PaxosError> {
        (**self).load(key).await
    }

    async fn store(&self, key: &str, record: &AcceptorRecord) -> Result<(), PaxosError> {
        (**self).store(key, record).await
    }
}
