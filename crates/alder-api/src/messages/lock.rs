//! Lock messages.

use serde::Deserialize;
use serde::Serialize;

/// Requests understood by the lock service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockRequest {
    /// Create a session for the named lock.
    Create {
        /// Session timeout requested by the client, in milliseconds.
        timeout_ms: u64,
    },
    /// Refresh the session.
    KeepAlive,
    /// Close the session, optionally destroying the lock's state.
    Close {
        /// Destroy server-side state instead of releasing it for reattach.
        delete: bool,
    },
    /// Acquire the lock.
    Lock {
        /// Maximum time to wait for the lock, in milliseconds. `None` waits
        /// indefinitely; zero fails immediately if the lock is held.
        timeout_ms: Option<u64>,
    },
    /// Release the lock.
    Unlock {
        /// Fencing version returned by the acquisition. Zero releases the
        /// session's current hold regardless of version.
        version: u64,
    },
    /// Check whether the lock is held.
    IsLocked {
        /// If nonzero, check whether this specific acquisition still holds.
        version: u64,
    },
}

/// Responses produced by the lock service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockResponse {
    /// Session created; the header carries the assigned session id.
    Created {
        /// Timeout the server granted, in milliseconds.
        session_timeout_ms: u64,
    },
    /// Session refreshed.
    KeepAlive,
    /// Session closed.
    Closed,
    /// Outcome of an acquisition attempt.
    Lock {
        /// Whether the lock was acquired.
        acquired: bool,
        /// Fencing version of the acquisition; zero when not acquired.
        version: u64,
    },
    /// Outcome of a release.
    Unlock {
        /// False when the caller did not hold the lock.
        released: bool,
    },
    /// Whether the lock is held.
    IsLocked {
        /// True when held (by any holder, or the queried version).
        locked: bool,
    },
}
