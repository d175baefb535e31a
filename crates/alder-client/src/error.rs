//! Client error model.

use alder_api::ResponsePayload;
use alder_transport::TransportError;

/// Errors surfaced by primitive operations.
///
/// Transport errors leave the session open and retry is the caller's
/// decision; `SessionExpired` and `SessionClosed` are terminal for the
/// session and the caller must obtain a fresh primitive handle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The underlying call failed; the session remains open.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Creating a session failed; the primitive was never usable.
    #[error("failed to open session: {reason}")]
    SessionOpenFailed {
        /// Description of the create failure.
        reason: String,
    },

    /// The server no longer recognizes the session.
    #[error("session expired")]
    SessionExpired,

    /// The session was closed by this client.
    #[error("session closed")]
    SessionClosed,

    /// A stream response arrived out of sequence.
    #[error("stream gap: expected response {expected}, received {received}")]
    StreamGap {
        /// The next response id the client was waiting for.
        expected: u64,
        /// The response id that actually arrived.
        received: u64,
    },

    /// The client was built with an empty partition list.
    #[error("no partitions configured")]
    NoPartitions,

    /// The caller's cancellation token fired. Only the in-flight call is
    /// aborted; the session remains open.
    #[error("operation cancelled")]
    Cancelled,

    /// A response carried an index older than one already observed.
    /// Defensive: a conforming server never produces this.
    #[error("response index {received} precedes last seen index {last}")]
    OutOfOrder {
        /// Highest index observed on the session.
        last: u64,
        /// Index carried by the offending response.
        received: u64,
    },

    /// A conditional write's version precondition failed.
    #[error("version mismatch")]
    VersionMismatch,

    /// A lock release was attempted without holding the lock.
    #[error("not the lock holder")]
    NotLocked,

    /// The server reported a request failure.
    #[error("server error: {message}")]
    Server {
        /// Server-provided failure description.
        message: String,
    },

    /// The peer violated the session protocol.
    #[error("protocol violation: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },
}

impl ClientError {
    /// Error for a response payload that does not match the issued request.
    pub(crate) fn unexpected(operation: &str, payload: &ResponsePayload) -> Self {
        Self::Protocol {
            message: format!("unexpected response for {operation}: {payload:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClientError::StreamGap {
            expected: 4,
            received: 6,
        };
        assert_eq!(err.to_string(), "stream gap: expected response 4, received 6");
        assert_eq!(ClientError::SessionExpired.to_string(), "session expired");
    }
}
