//! Single-decree Paxos: a fixed set of acceptors agrees on exactly one value
//! per key, as long as a majority of them is reachable.
//!
//! | Module | Role |
//! |--------|------|
//! | [`acceptor`] | Per-key promise/acceptance state and the safety rule |
//! | [`proposer`] | One Prepare/Accept round against all acceptors |
//! | [`quorum`] | Majority arithmetic |
//! | [`ballot`] | Per-proposer, per-key ballot numbers |
//! | [`storage`] | Durable acceptor records (memory and file backends) |
//! | [`transport`] | Proposer-to-acceptor RPC (in-process simulation and TCP) |
//! | [`config`], [`logging`] | Node setup for the `paxos-node` binary |

#![deny(clippy::unwrap_used)]

pub mod acceptor;
pub mod ballot;
pub mod config;
pub mod error;
pub mod logging;
pub mod proposer;
pub mod quorum;
pub mod storage;
pub mod transport;
pub mod types;

pub use acceptor::Acceptor;
pub use error::PaxosError;
pub use proposer::{Proposer, ProposerConfig};
pub use types::{
    AcceptReply, AcceptorRecord, BallotNumber, PrepareReply, QuorumNotReached, RoundOutcome, Value,
};
