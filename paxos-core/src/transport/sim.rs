//! In-process transport with fault injection.
//!
//! A [`SimClient`] calls an [`Acceptor`] directly, after optionally sleeping a
//! random latency and optionally losing the request or the reply. Losing the
//! reply still applies the request on the acceptor, which is the nastier case
//! for a proposer.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::acceptor::Acceptor;
use crate::error::PaxosError;
use crate::storage::RecordStore;
use crate::transport::AcceptorClient;
use crate::types::{AcceptReply, BallotNumber, PrepareReply, Value};

#[derive(Debug, Clone, Default)]
struct FaultSettings {
    latency_ms: Option<Range<u64>>,
    request_drop: f64,
    reply_drop: f64,
}

/// Fault knobs of one simulated link. Shared, so a test can flip them while
/// a round is in flight.
#[derive(Debug, Default)]
pub struct SimFaults {
    offline: AtomicBool,
    settings: Mutex<FaultSettings>,
}

impl SimFaults {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Sleep a uniformly random number of milliseconds in `range` per call.
    pub fn set_latency_ms(&self, range: Range<u64>) {
        self.with_settings(|s| s.latency_ms = (!range.is_empty()).then_some(range));
    }

    /// Probability that a request never reaches the acceptor.
    pub fn set_request_drop(&self, probability: f64) {
        self.with_settings(|s| s.request_drop = sanitize_probability(probability));
    }

    /// Probability that the acceptor handles the request but the reply is lost.
    pub fn set_reply_drop(&self, probability: f64) {
        self.with_settings(|s| s.reply_drop = sanitize_probability(probability));
    }

    fn with_settings(&self, f: impl FnOnce(&mut FaultSettings)) {
        if let Ok(mut settings) = self.settings.lock() {
            f(&mut settings);
        }
    }

    fn snapshot(&self) -> FaultSettings {
        self.settings
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Clamp into `[0, 1]`; NaN means "never".
fn sanitize_probability(probability: f64) -> f64 {
    if probability.is_nan() {
        0.0
    } else {
        probability.clamp(0.0, 1.0)
    }
}

enum Fate {
    Delivered,
    RequestLost,
    ReplyLost,
}

pub struct SimClient<S> {
    acceptor: Arc<Acceptor<S>>,
    faults: Arc<SimFaults>,
}

impl<S: RecordStore> SimClient<S> {
    pub fn new(acceptor: Arc<Acceptor<S>>) -> Self {
        Self {
            acceptor,
            faults: Arc::new(SimFaults::default()),
        }
    }

    pub fn acceptor(&self) -> &Arc<Acceptor<S>> {
        &self.acceptor
    }

    pub fn faults(&self) -> &Arc<SimFaults> {
        &self.faults
    }

    /// Apply latency and decide what happens to this call.
    async fn transmit(&self) -> Result<Fate, PaxosError> {
        if self.faults.is_offline() {
            return Err(PaxosError::unreachable(self.name(), "node offline"));
        }

        let settings = self.faults.snapshot();
        let (delay, request_lost, reply_lost) = {
            let mut rng = rand::rng();
            let delay = settings
                .latency_ms
                .map(|range| rng.random_range(range))
                .unwrap_or(0);
            (
                delay,
                rng.random_bool(settings.request_drop),
                rng.random_bool(settings.reply_drop),
            )
        };

        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        // the node may have gone down while the message was in flight
        if self.faults.is_offline() {
            return Err(PaxosError::unreachable(self.name(), "node offline"));
        }

        Ok(if request_lost {
            Fate::RequestLost
        } else if reply_lost {
            Fate::ReplyLost
        } else {
            Fate::Delivered
        })
    }

    fn lost(&self, what: &str) -> PaxosError {
        debug!(acceptor = %self.name(), "simulated loss of {}", what);
        PaxosError::unreachable(self.name(), format!("{} lost", what))
    }
}

impl<S: RecordStore> AcceptorClient for SimClient<S> {
    fn name(&self) -> &str {
        self.acceptor.name()
    }

    async fn prepare(&self, key: &str, ballot: BallotNumber) -> Result<PrepareReply, PaxosError> {
        match self.transmit().await? {
            Fate::RequestLost => Err(self.lost("request")),
            Fate::ReplyLost => {
                self.acceptor.prepare(key, ballot).await?;
                Err(self.lost("reply"))
            }
            Fate::Delivered => self.acceptor.prepare(key, ballot).await,
        }
    }

    async fn accept(
        &self,
        key: &str,
        ballot: BallotNumber,
        value: Value,
    ) -> Result<AcceptReply, PaxosError> {
        match self.transmit().await? {
            Fate::RequestLost => Err(self.lost("request")),
            Fate::ReplyLost => {
                self.acceptor.accept(key, ballot, value).await?;
                Err(self.lost("reply"))
            }
            Fate::Delivered => self.acceptor.accept(key, ballot, value).await,
        }
    }
}
