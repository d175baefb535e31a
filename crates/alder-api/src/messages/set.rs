//! Set messages.
//!
//! A set is sharded: each partition holds one slice of the elements and each
//! slice has its own session. These messages describe a single partition's
//! view; routing and aggregation happen in the client.

use serde::Deserialize;
use serde::Serialize;

/// Kind of a set event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetEventKind {
    /// An element was added.
    Added,
    /// An element was removed.
    Removed,
}

/// Requests understood by the set service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetRequest {
    /// Create a session for this partition's slice of the named set.
    Create {
        /// Session timeout requested by the client, in milliseconds.
        timeout_ms: u64,
    },
    /// Refresh the session.
    KeepAlive,
    /// Close the session, optionally destroying this slice's state.
    Close {
        /// Destroy server-side state instead of releasing it for reattach.
        delete: bool,
    },
    /// Add an element.
    Add {
        /// Element to add.
        value: String,
    },
    /// Remove an element.
    Remove {
        /// Element to remove.
        value: String,
    },
    /// Test membership.
    Contains {
        /// Element to test.
        value: String,
    },
    /// Count this partition's elements.
    Size,
    /// Remove all of this partition's elements.
    Clear,
    /// Open an event stream delivering membership changes.
    Events,
}

/// Responses produced by the set service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetResponse {
    /// Session created; the header carries the assigned session id.
    Created {
        /// Timeout the server granted, in milliseconds.
        session_timeout_ms: u64,
    },
    /// Session refreshed.
    KeepAlive,
    /// Session closed.
    Closed,
    /// Outcome of an add.
    Add {
        /// False when the element was already present.
        added: bool,
    },
    /// Outcome of a remove.
    Remove {
        /// False when the element was not present.
        removed: bool,
    },
    /// Membership test result.
    Contains {
        /// Whether the element is present.
        contained: bool,
    },
    /// This partition's element count.
    Size {
        /// Number of elements.
        size: u64,
    },
    /// Partition cleared.
    Clear,
    /// A membership change on an event stream.
    Event {
        /// What happened.
        kind: SetEventKind,
        /// The element concerned.
        value: String,
    },
}
