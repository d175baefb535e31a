//! Counter messages.

use serde::Deserialize;
use serde::Serialize;

/// Requests understood by the counter service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterRequest {
    /// Create a session for the named counter.
    Create {
        /// Session timeout requested by the client, in milliseconds.
        timeout_ms: u64,
    },
    /// Refresh the session.
    KeepAlive,
    /// Close the session, optionally destroying the counter's state.
    Close {
        /// Destroy server-side state instead of releasing it for reattach.
        delete: bool,
    },
    /// Read the current count.
    Get,
    /// Set the count to an absolute value.
    Set {
        /// New count.
        value: i64,
    },
    /// Add `delta` to the count.
    Increment {
        /// Amount to add.
        delta: i64,
    },
    /// Subtract `delta` from the count.
    Decrement {
        /// Amount to subtract.
        delta: i64,
    },
}

/// Responses produced by the counter service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterResponse {
    /// Session created; the header carries the assigned session id.
    Created {
        /// Timeout the server granted, in milliseconds.
        session_timeout_ms: u64,
    },
    /// Session refreshed.
    KeepAlive,
    /// Session closed.
    Closed,
    /// Current count.
    Get {
        /// The count.
        value: i64,
    },
    /// Count was set.
    Set,
    /// Count after an increment.
    Increment {
        /// New count.
        value: i64,
    },
    /// Count after a decrement.
    Decrement {
        /// New count.
        value: i64,
    },
}
