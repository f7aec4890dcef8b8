//! The proposer role: drives one Prepare/Accept round against every acceptor.
//!
//! Each phase fans out to all acceptors at once and stops as soon as its
//! outcome is settled: a majority answered positively, or too many failed for
//! a majority to remain possible. Calls still in flight at that point are
//! dropped. Transport errors, timeouts and rejections all count as "no" for
//! the quorum; rejections additionally feed the ballot generator so the next
//! round starts above them.

use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::ballot::BallotGenerator;
use crate::error::PaxosError;
use crate::quorum::QuorumTally;
use crate::transport::AcceptorClient;
use crate::types::{
    AcceptReply, BallotNumber, Phase, PrepareReply, QuorumNotReached, RoundOutcome, Value,
};

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ProposerConfig {
    /// Embedded in the low bits of every ballot; must be unique per proposer.
    pub proposer_id: u16,
    /// Upper bound on each individual acceptor call.
    pub rpc_timeout: Duration,
}

impl Default for ProposerConfig {
    fn default() -> Self {
        Self {
            proposer_id: 0,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

/// A Promise received in phase 1: what that acceptor had accepted, if anything.
pub type Promise = (BallotNumber, Option<Value>);

pub struct Proposer<C> {
    config: ProposerConfig,
    acceptors: Vec<C>,
    ballots: BallotGenerator,
}

impl<C: AcceptorClient> Proposer<C> {
    pub fn new(config: ProposerConfig, acceptors: Vec<C>) -> Self {
        let ballots = BallotGenerator::new(config.proposer_id);
        Self {
            config,
            acceptors,
            ballots,
        }
    }

    pub fn acceptors(&self) -> &[C] {
        &self.acceptors
    }

    pub fn ballots(&self) -> &BallotGenerator {
        &self.ballots
    }

    /// Run one round for `(key, value)` with a fresh ballot.
    ///
    /// On success the decided value is returned, which is not necessarily
    /// `value`: if some acceptor already accepted a value for `key`, that
    /// value is carried forward instead.
    pub async fn propose(&self, key: &str, value: impl Into<Value>) -> RoundOutcome {
        let ballot = self.ballots.next(key);
        self.run_round(key, ballot, value.into()).await
    }

    /// Run one round under an explicit `ballot`.
    ///
    /// The ballot is recorded with the generator, so a later
    /// [`Proposer::propose`] for `key` starts above it.
    pub async fn run_round(&self, key: &str, ballot: BallotNumber, value: Value) -> RoundOutcome {
        self.ballots.observe(key, ballot);
        info!(key, %ballot, value = %value, acceptors = self.acceptors.len(), "starting round");

        let (promises, tally, rejection) = self.prepare_phase(key, ballot).await;
        if let Some(seen) = rejection {
            self.ballots.observe(key, seen);
        }
        if !tally.reached() {
            warn!(
                key,
                %ballot,
                got = tally.successes(),
                needed = tally.needed(),
                "prepare phase failed to reach quorum"
            );
            return RoundOutcome::NotDecided(QuorumNotReached {
                phase: Phase::Prepare,
                got: tally.successes(),
                needed: tally.needed(),
                highest_rejection: rejection,
            });
        }

        let chosen = adopt_value(&promises, value);
        debug!(key, %ballot, chosen = %chosen, "prepare phase reached quorum");

        let (tally, accept_rejection) = self.accept_phase(key, ballot, &chosen).await;
        if let Some(seen) = accept_rejection {
            self.ballots.observe(key, seen);
        }
        if !tally.reached() {
            warn!(
                key,
                %ballot,
                got = tally.successes(),
                needed = tally.needed(),
                "accept phase failed to reach quorum"
            );
            return RoundOutcome::NotDecided(QuorumNotReached {
                phase: Phase::Accept,
                got: tally.successes(),
                needed: tally.needed(),
                highest_rejection: rejection.max(accept_rejection),
            });
        }

        info!(key, %ballot, value = %chosen, "value decided");
        RoundOutcome::Decided {
            value: chosen,
            ballot,
        }
    }

    async fn prepare_phase(
        &self,
        key: &str,
        ballot: BallotNumber,
    ) -> (Vec<Promise>, QuorumTally, Option<BallotNumber>) {
        let mut calls: FuturesUnordered<_> = self
            .acceptors
            .iter()
            .map(|acceptor| async move {
                let result = self.timed(acceptor.name(), acceptor.prepare(key, ballot)).await;
                (acceptor.name(), result)
            })
            .collect();

        let mut tally = QuorumTally::new(self.acceptors.len());
        let mut promises = Vec::new();
        let mut rejection: Option<BallotNumber> = None;

        while let Some((name, result)) = calls.next().await {
            match result {
                Ok(PrepareReply::Promise {
                    accepted_ballot,
                    accepted_value,
                }) => {
                    tally.record_success();
                    promises.push((accepted_ballot, accepted_value));
                }
                Ok(PrepareReply::Rejected { promised_ballot }) => {
                    debug!(acceptor = name, key, %ballot, promised = %promised_ballot, "prepare rejected");
                    tally.record_failure();
                    rejection = rejection.max(Some(promised_ballot));
                }
                Err(e) => {
                    warn!(acceptor = name, key, error = %e, "no prepare response");
                    tally.record_failure();
                }
            }
            if tally.settled() {
                break;
            }
        }

        (promises, tally, rejection)
    }

    async fn accept_phase(
        &self,
        key: &str,
        ballot: BallotNumber,
        value: &Value,
    ) -> (QuorumTally, Option<BallotNumber>) {
        let mut calls: FuturesUnordered<_> = self
            .acceptors
            .iter()
            .map(|acceptor| async move {
                let result = self
                    .timed(acceptor.name(), acceptor.accept(key, ballot, value.clone()))
                    .await;
                (acceptor.name(), result)
            })
            .collect();

        let mut tally = QuorumTally::new(self.acceptors.len());
        let mut rejection: Option<BallotNumber> = None;

        while let Some((name, result)) = calls.next().await {
            match result {
                Ok(AcceptReply::Accepted) => tally.record_success(),
                Ok(AcceptReply::Rejected { promised_ballot }) => {
                    debug!(acceptor = name, key, %ballot, promised = %promised_ballot, "accept rejected");
                    tally.record_failure();
                    rejection = rejection.max(Some(promised_ballot));
                }
                Err(e) => {
                    warn!(acceptor = name, key, error = %e, "no accept response");
                    tally.record_failure();
                }
            }
            if tally.settled() {
                break;
            }
        }

        (tally, rejection)
    }

    async fn timed<T>(
        &self,
        acceptor: &str,
        call: impl Future<Output = Result<T, PaxosError>>,
    ) -> Result<T, PaxosError> {
        match tokio::time::timeout(self.config.rpc_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PaxosError::Timeout {
                acceptor: acceptor.to_owned(),
            }),
        }
    }
}

/// The value phase 2 must carry: the one attached to the highest accepted
/// ballot among the promises, or `own` when no promise reports an acceptance.
pub fn adopt_value(promises: &[Promise], own: Value) -> Value {
    promises
        .iter()
        .filter_map(|(ballot, value)| value.as_ref().map(|v| (*ballot, v)))
        .max_by_key(|(ballot, _)| *ballot)
        .map(|(_, v)| v.clone())
        .unwrap_or(own)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::acceptor::Acceptor;
    use crate::ballot::compose;
    use crate::storage::MemoryStore;
    use crate::transport::SimClient;

    fn b(n: u64) -> BallotNumber {
        BallotNumber::new(n)
    }

    fn cluster(n: usize) -> Vec<SimClient<MemoryStore>> {
        (0..n)
            .map(|i| {
                SimClient::new(Arc::new(Acceptor::new(
                    format!("acc-{}", i),
                    MemoryStore::new(),
                )))
            })
            .collect()
    }

    fn proposer(id: u16, acceptors: Vec<SimClient<MemoryStore>>) -> Proposer<SimClient<MemoryStore>> {
        Proposer::new(
            ProposerConfig {
                proposer_id: id,
                rpc_timeout: Duration::from_millis(200),
            },
            acceptors,
        )
    }

    #[test]
    fn test_adopt_value_without_prior_acceptance() {
        let promises = vec![(BallotNumber::ZERO, None), (BallotNumber::ZERO, None)];
        assert_eq!(adopt_value(&promises, Value::from("mine")), Value::from("mine"));
        assert_eq!(adopt_value(&[], Value::from("mine")), Value::from("mine"));
    }

    #[test]
    fn test_adopt_value_picks_highest_ballot() {
        let promises = vec![
            (b(5), Some(Value::from("old"))),
            (BallotNumber::ZERO, None),
            (b(9), Some(Value::from("newer"))),
            (b(7), Some(Value::from("middle"))),
        ];
        assert_eq!(adopt_value(&promises, Value::from("mine")), Value::from("newer"));
    }

    #[tokio::test]
    async fn test_round_decides_own_value() {
        let proposer = proposer(1, cluster(3));
        let outcome = proposer.propose("k1", "X").await;
        assert!(outcome.decided());
        assert_eq!(outcome.value(), Some(&Value::from("X")));
    }

    #[tokio::test]
    async fn test_single_acceptor_cluster() {
        let proposer = proposer(1, cluster(1));
        let outcome = proposer.propose("k1", "solo").await;
        assert_eq!(outcome.value(), Some(&Value::from("solo")));
    }

    #[tokio::test]
    async fn test_no_acceptors_never_decides() {
        let proposer = proposer(1, Vec::new());
        let outcome = proposer.propose("k1", "X").await;
        assert!(!outcome.decided());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_no_response() {
        let acceptors = cluster(3);
        acceptors[1].faults().set_latency_ms(5_000..5_001);
        acceptors[2].faults().set_latency_ms(5_000..5_001);
        let proposer = proposer(1, acceptors);

        let start = std::time::Instant::now();
        let outcome = proposer.propose("k1", "X").await;
        assert!(!outcome.decided());
        assert!(start.elapsed() < Duration::from_secs(2));
        match outcome {
            RoundOutcome::NotDecided(reason) => {
                assert_eq!(reason.phase, Phase::Prepare);
                assert_eq!(reason.got, 1);
                assert_eq!(reason.needed, 2);
                assert_eq!(reason.highest_rejection, None);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejection_reported_and_observed() {
        let acceptors = cluster(3);
        for client in &acceptors {
            client.acceptor().prepare("k1", b(1_000_000)).await.expect("prepare");
        }
        let proposer = proposer(1, acceptors);

        let outcome = proposer.propose("k1", "X").await;
        assert_eq!(outcome.next_ballot_hint(), Some(b(1_000_000)));

        // the generator moved past the rejection, so the next round wins
        let outcome = proposer.propose("k1", "X").await;
        assert_eq!(outcome.value(), Some(&Value::from("X")));
    }

    #[tokio::test]
    async fn test_propose_after_explicit_round_uses_higher_ballot() {
        let proposer = proposer(1, cluster(3));
        let explicit = compose(1, 1);

        let first = proposer.run_round("k", explicit, Value::from("X")).await;
        assert_eq!(
            first,
            RoundOutcome::Decided {
                value: Value::from("X"),
                ballot: explicit,
            }
        );

        match proposer.propose("k", "Y").await {
            RoundOutcome::Decided { value, ballot } => {
                assert_eq!(value, Value::from("X"));
                assert!(ballot > explicit);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accept_phase_failure() {
        let acceptors = cluster(3);
        // every acceptor accepts the prepare, then two get promised higher
        // before the accept arrives
        let proposer = proposer(1, acceptors);
        let ballot = b(10);
        for client in proposer.acceptors() {
            client.acceptor().prepare("k1", ballot).await.expect("prepare");
        }
        for client in &proposer.acceptors()[1..] {
            client.acceptor().prepare("k1", b(50)).await.expect("prepare");
        }

        let (tally, rejection) = proposer.accept_phase("k1", ballot, &Value::from("X")).await;
        assert!(!tally.reached());
        assert_eq!(rejection, Some(b(50)));
    }
}
