//! Ballot numbers built from a per-key round counter and the proposer id.
//!
//! Layout: `round << 16 | proposer_id`. The id occupies the low 16 bits so two
//! proposers never produce the same ballot, and rounds only move forward so a
//! proposer never reuses a ballot for a key. No wall clock is involved.

use dashmap::DashMap;

use crate::types::BallotNumber;

const ID_BITS: u32 = 16;
const ID_MASK: u64 = (1 << ID_BITS) - 1;

/// Largest round that fits above the proposer id. Rounds saturate here
/// instead of wrapping to a small ballot.
pub const MAX_ROUND: u64 = u64::MAX >> ID_BITS;

/// Round part of a ballot.
pub fn round_of(ballot: BallotNumber) -> u64 {
    ballot.get() >> ID_BITS
}

/// Proposer id part of a ballot.
pub fn proposer_of(ballot: BallotNumber) -> u16 {
    (ballot.get() & ID_MASK) as u16
}

pub fn compose(round: u64, proposer_id: u16) -> BallotNumber {
    BallotNumber::new((round.min(MAX_ROUND) << ID_BITS) | u64::from(proposer_id))
}

/// Hands out strictly increasing ballots per key for one proposer.
#[derive(Debug)]
pub struct BallotGenerator {
    proposer_id: u16,
    last_round: DashMap<String, u64>,
}

impl BallotGenerator {
    pub fn new(proposer_id: u16) -> Self {
        Self {
            proposer_id,
            last_round: DashMap::new(),
        }
    }

    pub fn proposer_id(&self) -> u16 {
        self.proposer_id
    }

    /// Next ballot for `key`, strictly greater than every ballot this
    /// generator returned for that key before and than any ballot passed to
    /// [`BallotGenerator::observe`].
    pub fn next(&self, key: &str) -> BallotNumber {
        let mut round = self.last_round.entry(key.to_owned()).or_insert(0);
        *round = round.saturating_add(1).min(MAX_ROUND);
        compose(*round, self.proposer_id)
    }

    /// Make sure the next ballot for `key` beats `seen`, typically the
    /// ballot carried by a rejection.
    pub fn observe(&self, key: &str, seen: BallotNumber) {
        // compose(round_of(seen) + 1, _) > seen for any proposer id, so
        // bringing the counter to round_of(seen) is enough.
        let floor = round_of(seen);
        let mut round = self.last_round.entry(key.to_owned()).or_insert(0);
        if *round < floor {
            *round = floor;
        }
    }
}
