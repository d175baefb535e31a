//! Map messages.
//!
//! A map is sharded by key: each partition holds one slice of the entries and
//! each slice has its own session. Entries are versioned; conditional writes
//! compare against the entry version.

use serde::Deserialize;
use serde::Serialize;

/// A map entry with its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    /// Entry key.
    pub key: String,
    /// Entry value.
    pub value: Vec<u8>,
    /// Version assigned when the entry was last written.
    pub version: u64,
}

/// Kind of a map event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapEventKind {
    /// A new entry was inserted.
    Inserted,
    /// An existing entry's value changed.
    Updated,
    /// An entry was removed.
    Removed,
}

/// Requests understood by the map service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapRequest {
    /// Create a session for this partition's slice of the named map.
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
    /// Write an entry.
    Put {
        /// Entry key.
        key: String,
        /// Entry value.
        value: Vec<u8>,
        /// If nonzero, only write when the current version matches.
        expect_version: u64,
    },
    /// Read an entry.
    Get {
        /// Entry key.
        key: String,
    },
    /// Remove an entry.
    Remove {
        /// Entry key.
        key: String,
        /// If nonzero, only remove when the current version matches.
        expect_version: u64,
    },
    /// Count this partition's entries.
    Size,
    /// Remove all of this partition's entries.
    Clear,
    /// List this partition's keys.
    Keys,
    /// List this partition's entries.
    Entries,
    /// Open an event stream delivering entry changes.
    Events,
}

/// Responses produced by the map service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapResponse {
    /// Session created; the header carries the assigned session id.
    Created {
        /// Timeout the server granted, in milliseconds.
        session_timeout_ms: u64,
    },
    /// Session refreshed.
    KeepAlive,
    /// Session closed.
    Closed,
    /// Outcome of a put.
    Put {
        /// False when an `expect_version` precondition failed.
        succeeded: bool,
        /// Version after the write (unchanged on failure).
        version: u64,
        /// Entry replaced by the write, if any.
        previous: Option<MapEntry>,
    },
    /// Entry read result.
    Get {
        /// The entry, if present.
        entry: Option<MapEntry>,
    },
    /// Outcome of a remove.
    Remove {
        /// False when the entry was absent or a precondition failed.
        succeeded: bool,
        /// The removed entry, if any.
        previous: Option<MapEntry>,
    },
    /// This partition's entry count.
    Size {
        /// Number of entries.
        size: u64,
    },
    /// Partition cleared.
    Clear,
    /// This partition's keys.
    Keys {
        /// The keys.
        keys: Vec<String>,
    },
    /// This partition's entries.
    Entries {
        /// The entries.
        entries: Vec<MapEntry>,
    },
    /// An entry change on an event stream.
    Event {
        /// What happened.
        kind: MapEventKind,
        /// The entry after the change (the removed entry for `Removed`).
        entry: MapEntry,
    },
}
