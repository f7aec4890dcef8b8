//! How a proposer reaches its acceptors.
//!
//! [`AcceptorClient`] is the two-call RPC surface. `sim` drives acceptors
//! in-process with injectable faults; `tcp` talks to remote `paxos-node
//! acceptor` processes.

use std::future::Future;

use crate::error::PaxosError;
use crate::types::{AcceptReply, BallotNumber, PrepareReply, Value};

pub mod sim;
pub mod tcp;

pub use sim::{SimClient, SimFaults};
pub use tcp::TcpClient;

/// Client side of one acceptor.
///
/// An `Err` means the acceptor did not answer usefully (connection failure,
/// lost reply, remote storage failure). Explicit refusals are `Ok(Rejected)`.
pub trait AcceptorClient: Send + Sync {
    /// Name used in logs and errors, usually the acceptor address.
    fn name(&self) -> &str;

    fn prepare(
        &self,
        key: &str,
        ballot: BallotNumber,
    ) -> impl Future<Output = Result<PrepareReply, PaxosError>> + Send;

    fn accept(
        &self,
        key: &str,
        ballot: BallotNumber,
        value: Value,
    ) -> impl Future<Output = Result<AcceptReply, PaxosError>> + Send;
}
