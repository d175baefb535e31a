//! The top-level client.

use std::sync::Arc;

use alder_api::PrimitiveName;
use alder_transport::PartitionConnection;

use crate::counter::DistributedCounter;
use crate::election::LeaderElection;
use crate::error::ClientError;
use crate::lock::DistributedLock;
use crate::map::DistributedMap;
use crate::partition::PartitionId;
use crate::partition::partition_index;
use crate::session::SessionOptions;
use crate::set::DistributedSet;
use crate::value::AtomicValue;

/// Client for a partition group of replicated primitives.
///
/// The client owns an ordered list of partition connections; the index of a
/// connection in the list is its partition id, fixed for the client's
/// lifetime. Primitives obtained from the client open their sessions eagerly
/// and keep them alive until closed or deleted.
///
/// # Example
///
/// ```rust,ignore
/// use alder_client::{CancellationToken, CoordinationClient, SessionOptions};
///
/// let client = CoordinationClient::new(connections, SessionOptions::default())?;
/// let cancel = CancellationToken::new();
/// let value = client.get_value("greeting").await?;
/// let version = value.set(b"hello".to_vec(), &cancel).await?;
/// let (bytes, current) = value.get(&cancel).await?;
/// assert_eq!(current, version);
/// ```
pub struct CoordinationClient {
    namespace: String,
    partitions: Vec<Arc<dyn PartitionConnection>>,
    options: SessionOptions,
}

impl CoordinationClient {
    /// Create a client over an ordered partition connection list.
    pub fn new(
        partitions: Vec<Arc<dyn PartitionConnection>>,
        options: SessionOptions,
    ) -> Result<Self, ClientError> {
        if partitions.is_empty() {
            return Err(ClientError::NoPartitions);
        }
        Ok(Self {
            namespace: "default".to_string(),
            partitions,
            options,
        })
    }

    /// Scope primitives created by this client to a namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Number of partitions backing this client.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn primitive_name(&self, name: &str) -> PrimitiveName {
        PrimitiveName::new(self.namespace.clone(), name)
    }

    /// Partition owning a single-partition primitive with this name.
    fn home_partition(&self, name: &PrimitiveName) -> Result<usize, ClientError> {
        partition_index(&name.name, self.partitions.len())
    }

    /// Get an atomic value, opening its session.
    pub async fn get_value(&self, name: &str) -> Result<AtomicValue, ClientError> {
        let name = self.primitive_name(name);
        let index = self.home_partition(&name)?;
        AtomicValue::open(name, index as PartitionId, self.partitions[index].clone(), self.options.clone()).await
    }

    /// Get a counter, opening its session.
    pub async fn get_counter(&self, name: &str) -> Result<DistributedCounter, ClientError> {
        let name = self.primitive_name(name);
        let index = self.home_partition(&name)?;
        DistributedCounter::open(name, index as PartitionId, self.partitions[index].clone(), self.options.clone())
            .await
    }

    /// Get a lock, opening its session.
    pub async fn get_lock(&self, name: &str) -> Result<DistributedLock, ClientError> {
        let name = self.primitive_name(name);
        let index = self.home_partition(&name)?;
        DistributedLock::open(name, index as PartitionId, self.partitions[index].clone(), self.options.clone())
            .await
    }

    /// Get a leader election, opening its session.
    pub async fn get_election(&self, name: &str) -> Result<LeaderElection, ClientError> {
        let name = self.primitive_name(name);
        let index = self.home_partition(&name)?;
        LeaderElection::open(name, index as PartitionId, self.partitions[index].clone(), self.options.clone()).await
    }

    /// Get a sharded set, opening one session per partition.
    pub async fn get_set(&self, name: &str) -> Result<DistributedSet, ClientError> {
        DistributedSet::open(self.primitive_name(name), self.partitions.clone(), self.options.clone()).await
    }

    /// Get a sharded map, opening one session per partition.
    pub async fn get_map(&self, name: &str) -> Result<DistributedMap, ClientError> {
        DistributedMap::open(self.primitive_name(name), self.partitions.clone(), self.options.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_rejects_empty_partition_list() {
        let result = CoordinationClient::new(Vec::new(), SessionOptions::default());
        assert!(matches!(result, Err(ClientError::NoPartitions)));
    }
}
