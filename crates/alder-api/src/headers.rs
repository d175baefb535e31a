//! Request and response headers.
//!
//! Headers are the session protocol's only view of a message. The client
//! assigns `request_id`s to establish per-session command order; the server
//! assigns `response_id`s to establish per-stream delivery order and reports
//! its state-machine `index`, which is monotone nondecreasing within a
//! session.

use serde::Deserialize;
use serde::Serialize;

use crate::name::PrimitiveName;

/// Header carried by every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Identity of the primitive this request addresses.
    pub name: PrimitiveName,
    /// Server-assigned session identifier. Zero until the session is created.
    pub session_id: u64,
    /// Client-assigned command number, strictly increasing per session.
    /// Queries carry the id of the last completed command instead of
    /// allocating a new one.
    pub request_id: u64,
    /// Read floor for queries: the server may not answer from a state older
    /// than this index. Zero on commands.
    pub index: u64,
    /// Progress of the session's open streams. Populated on keep-alives so
    /// the server can trim replay state; empty otherwise.
    pub streams: Vec<StreamHeader>,
}

/// Per-stream progress reported in keep-alive headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeader {
    /// Stream identifier (the `request_id` of the command that opened it).
    pub stream_id: u64,
    /// Highest `response_id` the client has consumed on this stream.
    pub response_id: u64,
}

/// Header carried by every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Session the response belongs to. Assigned by the server at creation.
    pub session_id: u64,
    /// Stream the response belongs to; zero for unary responses.
    pub stream_id: u64,
    /// Server-assigned per-stream sequence number, starting at 1 with no
    /// gaps; zero for unary responses.
    pub response_id: u64,
    /// Server state-machine index at response time.
    pub index: u64,
    /// Outcome of the request at the session layer.
    pub status: ResponseStatus,
}

impl ResponseHeader {
    /// Header for a unary response on the given session.
    pub fn unary(session_id: u64, index: u64) -> Self {
        Self {
            session_id,
            stream_id: 0,
            response_id: 0,
            index,
            status: ResponseStatus::Ok,
        }
    }
}

/// Session-layer status of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// The request was executed.
    Ok,
    /// The request failed; the payload carries the error message.
    Error,
    /// The session is unknown to the server or its timeout elapsed. The
    /// client must stop using the session.
    SessionExpired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unary_header_defaults() {
        let header = ResponseHeader::unary(7, 42);
        assert_eq!(header.session_id, 7);
        assert_eq!(header.stream_id, 0);
        assert_eq!(header.response_id, 0);
        assert_eq!(header.index, 42);
        assert_eq!(header.status, ResponseStatus::Ok);
    }
}
