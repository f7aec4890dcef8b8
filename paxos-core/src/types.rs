//! Protocol types shared by the acceptor, the proposer and the transports.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A totally ordered proposal number. Higher always wins.
///
/// `BallotNumber::ZERO` is never handed out by a [`crate::ballot::BallotGenerator`];
/// in an [`AcceptorRecord`] it means "nothing promised" or "nothing accepted".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct BallotNumber(pub u64);

impl BallotNumber {
    pub const ZERO: Self = Self(0);

    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BallotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ballot({})", self.0)
    }
}

/// An opaque client payload being agreed upon.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Value(pub Vec<u8>);

impl Value {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Per-key acceptor state. The default value is the "no record yet" state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AcceptorRecord {
    /// Highest ballot this acceptor has promised not to go below.
    pub promised_ballot: BallotNumber,
    /// Ballot of the last accepted value, `ZERO` if nothing was accepted.
    pub accepted_ballot: BallotNumber,
    pub accepted_value: Option<Value>,
}

impl AcceptorRecord {
    /// The accepted `(ballot, value)` pair, if any Accept ever succeeded.
    pub fn accepted(&self) -> Option<(BallotNumber, &Value)> {
        self.accepted_value
            .as_ref()
            .map(|value| (self.accepted_ballot, value))
    }
}

/// Answer to a Prepare request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepareReply {
    /// The acceptor promised the ballot and reports what it accepted before, if anything.
    Promise {
        accepted_ballot: BallotNumber,
        accepted_value: Option<Value>,
    },
    /// The acceptor already promised a ballot at least this high.
    Rejected { promised_ballot: BallotNumber },
}

/// Answer to an Accept request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptReply {
    Accepted,
    Rejected { promised_ballot: BallotNumber },
}

/// Protocol phase, used when reporting a failed round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Prepare,
    Accept,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prepare => write!(f, "prepare"),
            Phase::Accept => write!(f, "accept"),
        }
    }
}

/// Why a round ended without a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumNotReached {
    pub phase: Phase,
    /// Successful responses collected in `phase`.
    pub got: usize,
    pub needed: usize,
    /// Highest ballot carried by a rejection during the round, if any.
    pub highest_rejection: Option<BallotNumber>,
}

/// Result of a single `Propose` round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundOutcome {
    /// A majority accepted `value` under `ballot`. The value may differ from
    /// the one the caller proposed.
    Decided { value: Value, ballot: BallotNumber },
    NotDecided(QuorumNotReached),
}

impl RoundOutcome {
    pub fn decided(&self) -> bool {
        matches!(self, RoundOutcome::Decided { .. })
    }

    /// The agreed value, present only when the round decided.
    pub fn value(&self) -> Option<&Value> {
        match self {
            RoundOutcome::Decided { value, .. } => Some(value),
            RoundOutcome::NotDecided(_) => None,
        }
    }

    /// A retrying caller should use a ballot strictly above this one.
    pub fn next_ballot_hint(&self) -> Option<BallotNumber> {
        match self {
            RoundOutcome::Decided { .. } => None,
            RoundOutcome::NotDecided(reason) => reason.highest_rejection,
        }
    }
}
