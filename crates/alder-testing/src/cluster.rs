//! An N-partition cluster of test servers.

use std::sync::Arc;

use alder_client::ClientError;
use alder_client::CoordinationClient;
use alder_client::SessionOptions;
use alder_transport::PartitionConnection;

use crate::partition::TestPartition;

/// A group of in-process partitions and clients over them.
pub struct TestCluster {
    partitions: Vec<TestPartition>,
}

impl TestCluster {
    /// Create a cluster with `partition_count` empty partitions.
    pub fn new(partition_count: usize) -> Self {
        Self {
            partitions: (0..partition_count).map(|_| TestPartition::new()).collect(),
        }
    }

    /// The partition at `index`, for state inspection and fault injection.
    pub fn partition(&self, index: usize) -> &TestPartition {
        &self.partitions[index]
    }

    /// Connection handles in partition order.
    pub fn connections(&self) -> Vec<Arc<dyn PartitionConnection>> {
        self.partitions.iter().map(|partition| Arc::new(partition.clone()) as Arc<dyn PartitionConnection>).collect()
    }

    /// A client over all partitions with default session options.
    pub fn client(&self) -> Result<CoordinationClient, ClientError> {
        self.client_with_options(SessionOptions::default())
    }

    /// A client over all partitions with the given session options.
    pub fn client_with_options(&self, options: SessionOptions) -> Result<CoordinationClient, ClientError> {
        CoordinationClient::new(self.connections(), options)
    }
}
