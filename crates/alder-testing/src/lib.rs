//! Deterministic in-process partition servers for alder client tests.
//!
//! [`TestPartition`] implements the full session wire protocol behind the
//! [`PartitionConnection`](alder_transport::PartitionConnection) trait:
//! session tables with timeouts, per-primitive state machines, event
//! broadcast with per-stream response ids, and a monotone state-machine
//! index. Fault switches let tests drop keep-alive responses, fail requests
//! outright, or inject a response-id gap into event delivery.
//!
//! [`TestCluster`] wires N partitions into a
//! [`CoordinationClient`](alder_client::CoordinationClient).

mod cluster;
mod partition;

pub use cluster::TestCluster;
pub use partition::TestPartition;
