//! Wire protocol types for alder primitive sessions.
//!
//! This crate defines the messages exchanged between the primitive client and
//! the partition servers. Every request and response carries a header as its
//! first field; the header establishes session identity, per-session command
//! order and per-stream delivery order. The primitive-specific payloads are
//! opaque to the session runtime.

mod headers;
mod messages;
mod name;

pub use headers::RequestHeader;
pub use headers::ResponseHeader;
pub use headers::ResponseStatus;
pub use headers::StreamHeader;
pub use messages::PrimitiveRequest;
pub use messages::PrimitiveResponse;
pub use messages::RequestPayload;
pub use messages::ResponsePayload;
pub use messages::counter::CounterRequest;
pub use messages::counter::CounterResponse;
pub use messages::election::ElectionRequest;
pub use messages::election::ElectionResponse;
pub use messages::election::TermInfo;
pub use messages::lock::LockRequest;
pub use messages::lock::LockResponse;
pub use messages::map::MapEntry;
pub use messages::map::MapEventKind;
pub use messages::map::MapRequest;
pub use messages::map::MapResponse;
pub use messages::set::SetEventKind;
pub use messages::set::SetRequest;
pub use messages::set::SetResponse;
pub use messages::value::ValueRequest;
pub use messages::value::ValueResponse;
pub use name::PrimitiveName;
