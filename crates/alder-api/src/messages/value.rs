//! Atomic value messages.

use serde::Deserialize;
use serde::Serialize;

/// Requests understood by the value service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueRequest {
    /// Create a session for the named value.
    Create {
        /// Session timeout requested by the client, in milliseconds.
        timeout_ms: u64,
    },
    /// Refresh the session. The header carries the highest completed
    /// request id and open-stream progress.
    KeepAlive,
    /// Close the session, optionally destroying the value's state.
    Close {
        /// Destroy server-side state instead of releasing it for reattach.
        delete: bool,
    },
    /// Set the value.
    Set {
        /// New value bytes.
        value: Vec<u8>,
        /// If nonzero, only set when the current version matches.
        expect_version: u64,
    },
    /// Read the value and its version.
    Get,
    /// Open an event stream delivering value updates.
    Events,
}

/// Responses produced by the value service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueResponse {
    /// Session created; the header carries the assigned session id.
    Created {
        /// Timeout the server granted, in milliseconds.
        session_timeout_ms: u64,
    },
    /// Session refreshed.
    KeepAlive,
    /// Session closed.
    Closed,
    /// Outcome of a set.
    Set {
        /// False when an `expect_version` precondition failed.
        succeeded: bool,
        /// Version after the write (unchanged on failure).
        version: u64,
    },
    /// Current value and version.
    Get {
        /// Value bytes; empty if never set.
        value: Vec<u8>,
        /// Current version; zero if never set.
        version: u64,
    },
    /// A value update on an event stream.
    Event {
        /// Value after the update.
        value: Vec<u8>,
        /// Version after the update.
        version: u64,
    },
}
