//! Request and response envelopes.
//!
//! A request is a header plus a primitive-specific payload; the session
//! runtime reads and writes only the header. Each primitive contributes one
//! request enum and one response enum, each carrying the session lifecycle
//! variants (`Create`, `KeepAlive`, `Close`) alongside its operations.

pub mod counter;
pub mod election;
pub mod lock;
pub mod map;
pub mod set;
pub mod value;

use serde::Deserialize;
use serde::Serialize;

use crate::headers::RequestHeader;
use crate::headers::ResponseHeader;

/// A single request to a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveRequest {
    /// Session protocol header.
    pub header: RequestHeader,
    /// Primitive-specific payload, opaque to the session runtime.
    pub payload: RequestPayload,
}

/// A single response from a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveResponse {
    /// Session protocol header.
    pub header: ResponseHeader,
    /// Primitive-specific payload, opaque to the session runtime.
    pub payload: ResponsePayload,
}

/// Primitive-specific request payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPayload {
    /// Atomic value operations.
    Value(value::ValueRequest),
    /// Counter operations.
    Counter(counter::CounterRequest),
    /// Lock operations.
    Lock(lock::LockRequest),
    /// Leader election operations.
    Election(election::ElectionRequest),
    /// Set operations.
    Set(set::SetRequest),
    /// Map operations.
    Map(map::MapRequest),
}

/// Primitive-specific response payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Atomic value responses.
    Value(value::ValueResponse),
    /// Counter responses.
    Counter(counter::CounterResponse),
    /// Lock responses.
    Lock(lock::LockResponse),
    /// Leader election responses.
    Election(election::ElectionResponse),
    /// Set responses.
    Set(set::SetResponse),
    /// Map responses.
    Map(map::MapResponse),
    /// Server-side failure; the header status is `Error`.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}
