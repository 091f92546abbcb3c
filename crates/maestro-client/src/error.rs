//! Client-side error taxonomy.
//!
//! Two families matter to callers: command errors (the node refused one
//! command; the connection is still healthy) and connection faults (the node
//! is gone or misbehaving; mid-plan this triggers a panic-stop).

use maestro_types::{ErrCode, ManifestError, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The node replied `ERR <code> <detail>`. Recoverable; the connection
    /// stays up.
    #[error("node refused command: {code} {detail}")]
    Command { code: ErrCode, detail: String },

    /// No reply arrived within the step timeout. Treated as a fault
    /// requiring a panic-stop of that node.
    #[error("timed out waiting for node reply")]
    StepTimeout,

    /// The socket closed or failed mid-exchange.
    #[error("connection lost: {0}")]
    Disconnected(String),

    /// The `HELLO` handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// No connection exists; `connect()` has not succeeded.
    #[error("not connected")]
    NotConnected,

    /// The node sent a reply the protocol does not allow here.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The node's manifest payload failed validation.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

impl ClientError {
    /// True for faults that poison the connection (as opposed to a refused
    /// command on a healthy link).
    pub fn is_connection_fault(&self) -> bool {
        !matches!(self, ClientError::Command { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_errors_do_not_fault_the_connection() {
        let err = ClientError::Command {
            code: ErrCode::Range,
            detail: "out_of_bounds".to_string(),
        };
        assert!(!err.is_connection_fault());
        assert!(err.to_string().contains("RANGE"));
    }

    #[test]
    fn timeouts_and_disconnects_are_faults() {
        assert!(ClientError::StepTimeout.is_connection_fault());
        assert!(ClientError::Disconnected("eof".to_string()).is_connection_fault());
        assert!(ClientError::NotConnected.is_connection_fault());
    }
}
