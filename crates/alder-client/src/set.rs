//! Sharded distributed set.

use std::sync::Arc;

use alder_api::PrimitiveName;
use alder_api::RequestPayload;
use alder_api::ResponsePayload;
use alder_api::SetEventKind;
use alder_api::SetRequest;
use alder_api::SetResponse;
use alder_transport::PartitionConnection;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::fanout::execute_ordered;
use crate::fanout::execute_unordered;
use crate::fanout::iter_async;
use crate::partition::PartitionId;
use crate::partition::partition_index;
use crate::primitive::Primitive;
use crate::primitive::SessionHandler;
use crate::session::Session;
use crate::session::SessionOptions;
use crate::stream::EventStream;

/// A membership change observed on a watched set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEvent {
    /// What happened.
    pub kind: SetEventKind,
    /// The element concerned.
    pub value: String,
}

struct SetHandler;

#[async_trait]
impl SessionHandler for SetHandler {
    async fn create(&self, session: &Session) -> Result<(), ClientError> {
        let payload = session
            .create_with(RequestPayload::Set(SetRequest::Create {
                timeout_ms: session.requested_timeout_ms(),
            }))
            .await?;
        match payload {
            ResponsePayload::Set(SetResponse::Created { session_timeout_ms }) => {
                session.adopt_timeout(session_timeout_ms).await;
                Ok(())
            }
            other => Err(ClientError::unexpected("set create", &other)),
        }
    }

    async fn keep_alive(&self, session: &Session) -> Result<(), ClientError> {
        match session.keep_alive_with(RequestPayload::Set(SetRequest::KeepAlive)).await? {
            ResponsePayload::Set(SetResponse::KeepAlive) => Ok(()),
            other => Err(ClientError::unexpected("set keep-alive", &other)),
        }
    }

    async fn close(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Set(SetRequest::Close { delete: false })).await.map(|_| ())
    }

    async fn delete(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Set(SetRequest::Close { delete: true })).await.map(|_| ())
    }
}

/// One partition's slice of a sharded set.
struct SetPartition {
    session: Arc<Session>,
}

impl SetPartition {
    async fn open(
        name: PrimitiveName,
        partition: PartitionId,
        connection: Arc<dyn PartitionConnection>,
        options: SessionOptions,
    ) -> Result<Arc<Self>, ClientError> {
        let session = Session::open(name, partition, connection, Arc::new(SetHandler), options).await?;
        Ok(Arc::new(Self { session }))
    }

    async fn add(&self, value: String, cancel: &CancellationToken) -> Result<bool, ClientError> {
        self.session
            .command(RequestPayload::Set(SetRequest::Add { value }), cancel, |payload| match payload {
                ResponsePayload::Set(SetResponse::Add { added }) => Ok(added),
                other => Err(ClientError::unexpected("set add", &other)),
            })
            .await
    }

    async fn remove(&self, value: String, cancel: &CancellationToken) -> Result<bool, ClientError> {
        self.session
            .command(RequestPayload::Set(SetRequest::Remove { value }), cancel, |payload| match payload {
                ResponsePayload::Set(SetResponse::Remove { removed }) => Ok(removed),
                other => Err(ClientError::unexpected("set remove", &other)),
            })
            .await
    }

    async fn contains(&self, value: String, cancel: &CancellationToken) -> Result<bool, ClientError> {
        self.session
            .query(RequestPayload::Set(SetRequest::Contains { value }), cancel, |payload| match payload {
                ResponsePayload::Set(SetResponse::Contains { contained }) => Ok(contained),
                other => Err(ClientError::unexpected("set contains", &other)),
            })
            .await
    }

    async fn size(&self, cancel: &CancellationToken) -> Result<u64, ClientError> {
        self.session
            .query(RequestPayload::Set(SetRequest::Size), cancel, |payload| match payload {
                ResponsePayload::Set(SetResponse::Size { size }) => Ok(size),
                other => Err(ClientError::unexpected("set size", &other)),
            })
            .await
    }

    async fn clear(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.session
            .command(RequestPayload::Set(SetRequest::Clear), cancel, |payload| match payload {
                ResponsePayload::Set(SetResponse::Clear) => Ok(()),
                other => Err(ClientError::unexpected("set clear", &other)),
            })
            .await
    }

    async fn watch(&self, cancel: &CancellationToken) -> Result<EventStream<SetEvent>, ClientError> {
        self.session
            .command_stream(RequestPayload::Set(SetRequest::Events), cancel, |payload| match payload {
                ResponsePayload::Set(SetResponse::Event { kind, value }) => Ok(Some(SetEvent { kind, value })),
                other => Err(ClientError::unexpected("set event", &other)),
            })
            .await
    }
}

/// A distributed set striped over all partitions.
///
/// Elements are routed to partitions by hash, so per-element operations
/// touch exactly one partition. Aggregates fan out across all partitions
/// and combine the slices; a watch multiplexes every partition's event
/// stream into one, preserving per-partition order but not global order.
/// Every operation takes a cancellation token, propagated through the
/// fan-out into each per-partition call.
pub struct DistributedSet {
    name: PrimitiveName,
    partitions: Vec<Arc<SetPartition>>,
}

impl DistributedSet {
    pub(crate) async fn open(
        name: PrimitiveName,
        connections: Vec<Arc<dyn PartitionConnection>>,
        options: SessionOptions,
    ) -> Result<Self, ClientError> {
        if connections.is_empty() {
            return Err(ClientError::NoPartitions);
        }
        let open_cancel = CancellationToken::new();
        let partitions = execute_ordered(connections.len(), &open_cancel, |i| {
            let name = name.clone();
            let connection = connections[i].clone();
            let options = options.clone();
            async move { SetPartition::open(name, i as PartitionId, connection, options).await }
        })
        .await?;
        Ok(Self { name, partitions })
    }

    fn partition_for(&self, value: &str) -> Result<&Arc<SetPartition>, ClientError> {
        let index = partition_index(value, self.partitions.len())?;
        Ok(&self.partitions[index])
    }

    /// Add an element. Returns false when it was already present.
    pub async fn add(&self, value: impl Into<String>, cancel: &CancellationToken) -> Result<bool, ClientError> {
        let value = value.into();
        self.partition_for(&value)?.add(value, cancel).await
    }

    /// Remove an element. Returns false when it was not present.
    pub async fn remove(&self, value: impl Into<String>, cancel: &CancellationToken) -> Result<bool, ClientError> {
        let value = value.into();
        self.partition_for(&value)?.remove(value, cancel).await
    }

    /// Test membership.
    pub async fn contains(
        &self,
        value: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<bool, ClientError> {
        let value = value.into();
        self.partition_for(&value)?.contains(value, cancel).await
    }

    /// Count elements across all partitions.
    pub async fn size(&self, cancel: &CancellationToken) -> Result<u64, ClientError> {
        let partitions = self.partitions.clone();
        let sizes = execute_unordered(partitions.len(), cancel, |i| {
            let partition = partitions[i].clone();
            let cancel = cancel.clone();
            async move { partition.size(&cancel).await }
        })
        .await?;
        Ok(sizes.into_iter().sum())
    }

    /// Whether every partition's slice is empty.
    pub async fn is_empty(&self, cancel: &CancellationToken) -> Result<bool, ClientError> {
        let partitions = self.partitions.clone();
        let sizes = execute_unordered(partitions.len(), cancel, |i| {
            let partition = partitions[i].clone();
            let cancel = cancel.clone();
            async move { partition.size(&cancel).await }
        })
        .await?;
        Ok(sizes.into_iter().all(|size| size == 0))
    }

    /// Remove all elements from all partitions.
    pub async fn clear(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let partitions = self.partitions.clone();
        iter_async(partitions.len(), cancel, |i| {
            let partition = partitions[i].clone();
            let cancel = cancel.clone();
            async move { partition.clear(&cancel).await }
        })
        .await
    }

    /// Watch the set for membership changes across all partitions.
    ///
    /// Dropping the returned stream closes every per-partition stream.
    pub async fn watch(&self, cancel: &CancellationToken) -> Result<EventStream<SetEvent>, ClientError> {
        let partitions = self.partitions.clone();
        let streams = execute_ordered(partitions.len(), cancel, |i| {
            let partition = partitions[i].clone();
            let cancel = cancel.clone();
            async move { partition.watch(&cancel).await }
        })
        .await?;
        Ok(EventStream::merge(streams))
    }
}

#[async_trait]
impl Primitive for DistributedSet {
    fn name(&self) -> &PrimitiveName {
        &self.name
    }

    async fn close(&self) -> Result<(), ClientError> {
        let partitions = self.partitions.clone();
        iter_async(partitions.len(), &CancellationToken::new(), |i| {
            let partition = partitions[i].clone();
            async move { partition.session.close().await }
        })
        .await
    }

    async fn delete(&self) -> Result<(), ClientError> {
        let partitions = self.partitions.clone();
        iter_async(partitions.len(), &CancellationToken::new(), |i| {
            let partition = partitions[i].clone();
            async move { partition.session.delete().await }
        })
        .await
    }
}
