//! Session-oriented client runtime for alder distributed primitives.
//!
//! This crate is the core of the alder client: it binds logically named
//! primitives to consensus-backed partitions, maintains ordered sessions
//! with each partition, fans operations out across partitions, and preserves
//! per-client linearizability and streaming-event ordering.
//!
//! # Key Components
//!
//! - [`CoordinationClient`]: entry point owning the partition connections
//! - [`Session`]: the per-(primitive, partition) ordered channel
//! - [`Primitive`]: base contract every primitive fulfills
//! - [`AtomicValue`], [`DistributedCounter`], [`DistributedLock`],
//!   [`LeaderElection`]: single-partition primitives
//! - [`DistributedSet`], [`DistributedMap`]: sharded primitives
//!
//! Every operation takes a [`CancellationToken`]; observing it aborts the
//! in-flight call without closing the session.
//!
//! # Example
//!
//! ```rust,ignore
//! use alder_client::{CancellationToken, CoordinationClient, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), alder_client::ClientError> {
//!     let client = CoordinationClient::new(connections, SessionOptions::default())?;
//!     let cancel = CancellationToken::new();
//!
//!     let set = client.get_set("active-users").await?;
//!     set.add("alice", &cancel).await?;
//!     assert!(set.contains("alice", &cancel).await?);
//!
//!     Ok(())
//! }
//! ```

mod client;
mod counter;
mod election;
mod error;
mod fanout;
mod lock;
mod map;
mod partition;
mod primitive;
mod session;
mod set;
mod stream;
mod value;

pub use alder_api::MapEntry;
pub use alder_api::MapEventKind;
pub use alder_api::PrimitiveName;
pub use alder_api::SetEventKind;
pub use alder_api::TermInfo;
pub use client::CoordinationClient;
pub use counter::DistributedCounter;
pub use election::ElectionEvent;
pub use election::LeaderElection;
pub use error::ClientError;
pub use fanout::execute_ordered;
pub use fanout::execute_unordered;
pub use fanout::iter_async;
pub use lock::DistributedLock;
pub use map::DistributedMap;
pub use map::MapEvent;
pub use partition::PartitionId;
pub use partition::partition_index;
pub use primitive::Primitive;
pub use primitive::SessionHandler;
pub use session::Session;
pub use session::SessionOptions;
pub use session::SessionState;
pub use set::DistributedSet;
pub use set::SetEvent;
pub use stream::EventStream;
// Re-exported so callers do not need a direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
pub use value::AtomicValue;
pub use value::ValueEvent;
pub use value::ValueEventKind;
