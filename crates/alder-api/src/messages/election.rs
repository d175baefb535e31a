//! Leader election messages.

use serde::Deserialize;
use serde::Serialize;

/// A leadership term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermInfo {
    /// Monotonically increasing term number; bumps on each leader change.
    pub term: u64,
    /// Current leader, if any candidate is enrolled.
    pub leader: Option<String>,
    /// Enrolled candidates in priority order; the leader is first.
    pub candidates: Vec<String>,
}

/// Requests understood by the election service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionRequest {
    /// Create a session for the named election.
    Create {
        /// Session timeout requested by the client, in milliseconds.
        timeout_ms: u64,
    },
    /// Refresh the session.
    KeepAlive,
    /// Close the session, optionally destroying the election's state.
    Close {
        /// Destroy server-side state instead of releasing it for reattach.
        delete: bool,
    },
    /// Enroll a candidate.
    Enter {
        /// Identifier of the candidate to enroll.
        candidate_id: String,
    },
    /// Withdraw a candidate, ceding leadership if it leads.
    Leave {
        /// Identifier of the candidate to withdraw.
        candidate_id: String,
    },
    /// Read the current term.
    GetTerm,
    /// Open an event stream delivering term changes.
    Events,
}

/// Responses produced by the election service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionResponse {
    /// Session created; the header carries the assigned session id.
    Created {
        /// Timeout the server granted, in milliseconds.
        session_timeout_ms: u64,
    },
    /// Session refreshed.
    KeepAlive,
    /// Session closed.
    Closed,
    /// Term after enrolling.
    Enter {
        /// The resulting term.
        term: TermInfo,
    },
    /// Term after withdrawing.
    Leave {
        /// The resulting term.
        term: TermInfo,
    },
    /// The current term.
    Term {
        /// The current term.
        term: TermInfo,
    },
    /// A term change on an event stream.
    Event {
        /// The new term.
        term: TermInfo,
    },
}
