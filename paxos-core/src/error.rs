use thiserror::Error;

/// Errors surfaced by a single acceptor call, a storage backend or the node setup.
///
/// None of these abort a round: the proposer folds every per-acceptor error
/// into "no response" when counting towards a quorum.
#[derive(Debug, Error)]
pub enum PaxosError {
    /// The persistence layer failed a read or write. The stored record is untouched.
    #[error("storage error: {0}")]
    Storage(String),

    /// The acceptor could not be reached, or it failed the request.
    #[error("acceptor {acceptor} unreachable: {reason}")]
    Unreachable { acceptor: String, reason: String },

    /// The acceptor did not answer within the per-call timeout.
    #[error("acceptor {acceptor} timed out")]
    Timeout { acceptor: String },

    /// Encoding or decoding of a record or a wire frame failed.
    #[error("codec error: {0}")]
    Codec(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl PaxosError {
    pub(crate) fn unreachable(acceptor: impl Into<String>, reason: impl ToString) -> Self {
        PaxosError::Unreachable {
            acceptor: acceptor.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<bincode::error::EncodeError> for PaxosError {
    fn from(err: bincode::error::EncodeError) -> Self {
        PaxosError::Codec(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for PaxosError {
    fn from(err: bincode::error::DecodeError) -> Self {
        PaxosError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PaxosError::unreachable("node-a", "connection refused");
        assert_eq!(
            err.to_string(),
            "acceptor node-a unreachable: connection refused"
        );

        let err = PaxosError::Timeout {
            acceptor: "node-b".to_string(),
        };
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PaxosError = io.into();
        assert!(matches!(err, PaxosError::Io(_)));
    }
}
