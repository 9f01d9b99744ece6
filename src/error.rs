/// Crate-wide error type. Subsystems keep small local error enums for their
/// own parse/decode failures and convert into this one at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("cancelled")]
    Cancelled,

    #[error("pairing rejected")]
    PairingRejected,

    #[error("pairing timed out")]
    PairingTimeout,

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
        assert_eq!(
            Error::NotFound("command 7".into()).to_string(),
            "not found: command 7"
        );
    }
}
