//! Majority arithmetic and per-phase response counting.

/// Minimum number of acceptors that must answer positively: `floor(n / 2) + 1`.
pub const fn majority(n: usize) -> usize {
    n / 2 + 1
}

/// Whether `successes` positive answers out of `n` acceptors form a majority.
pub const fn is_quorum(successes: usize, n: usize) -> bool {
    successes >= majority(n)
}

/// Counts the answers of one phase and tells when its outcome is settled.
///
/// A phase is settled once a majority answered positively, or once so many
/// acceptors failed that a majority can no longer be reached.
#[derive(Debug, Clone)]
pub struct QuorumTally {
    total: usize,
    needed: usize,
    successes: usize,
    failures: usize,
}

impl QuorumTally {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            needed: majority(total),
            successes: 0,
            failures: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.successes += 1;
    }

    /// Rejections, timeouts and transport errors all count as failures.
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn successes(&self) -> usize {
        self.successes
    }

    pub fn needed(&self) -> usize {
        self.needed
    }

    pub fn reached(&self) -> bool {
        self.successes >= self.needed
    }

    pub fn unreachable(&self) -> bool {
        self.total - self.failures < self.needed
    }

    pub fn settled(&self) -> bool {
        self.reached() || self.unreachable()
    }
}
