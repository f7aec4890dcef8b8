//! The acceptor role: durable per-key promise/acceptance state.
//!
//! Per key the record moves `NoRecord -> Promised(b) -> Accepted(b, v)`, and
//! the promised ballot only ever goes up. Each request is a single
//! load/modify/store under that key's lock; requests for different keys run
//! independently.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::PaxosError;
use crate::storage::RecordStore;
use crate::types::{AcceptReply, AcceptorRecord, BallotNumber, PrepareReply, Value};

pub struct Acceptor<S> {
    name: String,
    store: S,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: RecordStore> Acceptor<S> {
    pub fn new(name: impl Into<String>, store: S) -> Self {
        Self {
            name: name.into(),
            store,
            locks: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        // Clone the Arc out so the map shard is not held across an await.
        self.locks.entry(key.to_owned()).or_default().value().clone()
    }

    /// Current record for `key`, if any request ever touched it.
    pub async fn record(&self, key: &str) -> Result<Option<AcceptorRecord>, PaxosError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.store.load(key).await
    }

    /// Phase 1. Promise `ballot` if it beats every ballot promised so far.
    pub async fn prepare(&self, key: &str, ballot: BallotNumber) -> Result<PrepareReply, PaxosError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let existing = self.load(key).await?;
        let mut record = existing.clone().unwrap_or_default();

        // With no record yet, every generated ballot (> ZERO) wins.
        if existing.is_some() && ballot <= record.promised_ballot {
            warn!(
                acceptor = %self.name,
                key,
                %ballot,
                promised = %record.promised_ballot,
                "rejected prepare"
            );
            return Ok(PrepareReply::Rejected {
                promised_ballot: record.promised_ballot,
            });
        }

        record.promised_ballot = ballot;
        self.persist(key, &record).await?;

        debug!(
            acceptor = %self.name,
            key,
            %ballot,
            accepted = %record.accepted_ballot,
            "promised"
        );
        Ok(PrepareReply::Promise {
            accepted_ballot: record.accepted_ballot,
            accepted_value: record.accepted_value,
        })
    }

    /// Phase 2. Accept `value` under `ballot` unless a higher ballot was promised.
    pub async fn accept(
        &self,
        key: &str,
        ballot: BallotNumber,
        value: Value,
    ) -> Result<AcceptReply, PaxosError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let existing = self.load(key).await?.unwrap_or_default();

        if ballot < existing.promised_ballot {
            warn!(
                acceptor = %self.name,
                key,
                %ballot,
                promised = %existing.promised_ballot,
                "rejected accept"
            );
            return Ok(AcceptReply::Rejected {
                promised_ballot: existing.promised_ballot,
            });
        }

        let record = AcceptorRecord {
            promised_ballot: existing.promised_ballot.max(ballot),
            accepted_ballot: ballot,
            accepted_value: Some(value),
        };
        // A repeated Accept(b, v) leaves the record as it is.
        if record != existing {
            self.persist(key, &record).await?;
        }

        debug!(acceptor = %self.name, key, %ballot, "accepted");
        Ok(AcceptReply::Accepted)
    }

    async fn load(&self, key: &str) -> Result<Option<AcceptorRecord>, PaxosError> {
        self.store.load(key).await.inspect_err(|e| {
            error!(acceptor = %self.name, key, error = %e, "failed to load record");
        })
    }

    async fn persist(&self, key: &str, record: &AcceptorRecord) -> Result<(), PaxosError> {
        self.store.store(key, record).await.inspect_err(|e| {
            error!(acceptor = %self.name, key, error = %e, "failed to persist record");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::storage::MemoryStore;

    fn acceptor() -> Acceptor<MemoryStore> {
        Acceptor::new("a", MemoryStore::new())
    }

    fn b(n: u64) -> BallotNumber {
        BallotNumber::new(n)
    }

    /// Memory store whose writes can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl RecordStore for FlakyStore {
        async fn load(&self, key: &str) -> Result<Option<AcceptorRecord>, PaxosError> {
            self.inner.load(key).await
        }

        async fn store(&self, key: &str, record: &AcceptorRecord) -> Result<(), PaxosError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(PaxosError::Storage("disk full".to_string()));
            }
            self.inner.store(key, record).await
        }
    }

    #[tokio::test]
    async fn test_first_prepare_promises_empty() {
        let acceptor = acceptor();
        let reply = acceptor.prepare("k1", b(5)).await.expect("prepare");
        assert_eq!(
            reply,
            PrepareReply::Promise {
                accepted_ballot: BallotNumber::ZERO,
                accepted_value: None,
            }
        );

        let record = acceptor.record("k1").await.expect("record").expect("created");
        assert_eq!(record.promised_ballot, b(5));
        assert!(record.accepted().is_none());
    }

    #[tokio::test]
    async fn test_prepare_rejects_lower_or_equal_ballot() {
        let acceptor = acceptor();
        acceptor.prepare("k1", b(10)).await.expect("prepare");

        for ballot in [b(10), b(3)] {
            let reply = acceptor.prepare("k1", ballot).await.expect("prepare");
            assert_eq!(
                reply,
                PrepareReply::Rejected {
                    promised_ballot: b(10)
                }
            );
        }
    }

    #[tokio::test]
    async fn test_prepare_reports_accepted_value() {
        let acceptor = acceptor();
        acceptor.prepare("k1", b(1)).await.expect("prepare");
        acceptor
            .accept("k1", b(1), Value::from("X"))
            .await
            .expect("accept");

        let reply = acceptor.prepare("k1", b(2)).await.expect("prepare");
        assert_eq!(
            reply,
            PrepareReply::Promise {
                accepted_ballot: b(1),
                accepted_value: Some(Value::from("X")),
            }
        );

        // promise raised, acceptance untouched
        let record = acceptor.record("k1").await.expect("record").expect("exists");
        assert_eq!(record.promised_ballot, b(2));
        assert_eq!(record.accepted_ballot, b(1));
    }

    #[tokio::test]
    async fn test_accept_without_prior_prepare() {
        let acceptor = acceptor();
        let reply = acceptor
            .accept("k1", b(4), Value::from("V"))
            .await
            .expect("accept");
        assert_eq!(reply, AcceptReply::Accepted);

        let record = acceptor.record("k1").await.expect("record").expect("exists");
        assert_eq!(record.promised_ballot, b(4));
        assert_eq!(record.accepted(), Some((b(4), &Value::from("V"))));
    }

    #[tokio::test]
    async fn test_accept_rejects_below_promise() {
        let acceptor = acceptor();
        acceptor.prepare("k1", b(20)).await.expect("prepare");

        let reply = acceptor
            .accept("k1", b(10), Value::from("old"))
            .await
            .expect("accept");
        assert_eq!(
            reply,
            AcceptReply::Rejected {
                promised_ballot: b(20)
            }
        );
        let record = acceptor.record("k1").await.expect("record").expect("exists");
        assert!(record.accepted().is_none());
    }

    #[tokio::test]
    async fn test_accept_at_promised_ballot() {
        let acceptor = acceptor();
        acceptor.prepare("k1", b(7)).await.expect("prepare");
        let reply = acceptor
            .accept("k1", b(7), Value::from("v"))
            .await
            .expect("accept");
        assert_eq!(reply, AcceptReply::Accepted);
    }

    #[tokio::test]
    async fn test_accept_is_idempotent() {
        let acceptor = acceptor();
        acceptor.prepare("k1", b(3)).await.expect("prepare");
        acceptor
            .accept("k1", b(3), Value::from("v"))
            .await
            .expect("accept");
        let before = acceptor.record("k1").await.expect("record");

        let reply = acceptor
            .accept("k1", b(3), Value::from("v"))
            .await
            .expect("accept");
        assert_eq!(reply, AcceptReply::Accepted);
        assert_eq!(acceptor.record("k1").await.expect("record"), before);
    }

    #[tokio::test]
    async fn test_keys_do_not_interfere() {
        let acceptor = acceptor();
        acceptor.prepare("k1", b(100)).await.expect("prepare");

        let reply = acceptor.prepare("k2", b(1)).await.expect("prepare");
        assert!(matches!(reply, PrepareReply::Promise { .. }));
    }

    #[tokio::test]
    async fn test_promised_ballot_never_decreases() {
        let acceptor = acceptor();
        let mut last = BallotNumber::ZERO;
        for n in [5, 3, 9, 9, 1, 12, 4, 30, 2] {
            if n % 2 == 0 {
                acceptor.prepare("k", b(n)).await.expect("prepare");
            } else {
                acceptor
                    .accept("k", b(n), Value::from("v"))
                    .await
                    .expect("accept");
            }
            let promised = acceptor
                .record("k")
                .await
                .expect("record")
                .map(|r| r.promised_ballot)
                .unwrap_or_default();
            assert!(promised >= last);
            last = promised;
        }
        assert_eq!(last, b(30));
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_record_intact() {
        let acceptor = Acceptor::new("a", FlakyStore::default());
        acceptor.prepare("k1", b(1)).await.expect("prepare");
        acceptor
            .accept("k1", b(1), Value::from("X"))
            .await
            .expect("accept");
        let before = acceptor.record("k1").await.expect("record");

        acceptor.store().fail_writes.store(true, Ordering::SeqCst);
        let err = acceptor.prepare("k1", b(2)).await.expect_err("write fails");
        assert!(matches!(err, PaxosError::Storage(_)));
        let err = acceptor
            .accept("k1", b(5), Value::from("Y"))
            .await
            .expect_err("write fails");
        assert!(matches!(err, PaxosError::Storage(_)));

        assert_eq!(acceptor.record("k1").await.expect("record"), before);
    }

    #[tokio::test]
    async fn test_concurrent_prepares_keep_highest_promise() {
        let acceptor = Arc::new(acceptor());
        let mut handles = Vec::new();
        for n in 1..=50 {
            let acceptor = Arc::clone(&acceptor);
            handles.push(tokio::spawn(async move {
                acceptor.prepare("k", b(n)).await.expect("prepare")
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }

        let record = acceptor.record("k").await.expect("record").expect("exists");
        assert_eq!(record.promised_ballot, b(50));
    }
}
