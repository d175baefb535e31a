//! Sharded distributed map with versioned entries.

use std::sync::Arc;

use alder_api::MapEntry;
use alder_api::MapEventKind;
use alder_api::MapRequest;
use alder_api::MapResponse;
use alder_api::PrimitiveName;
use alder_api::RequestPayload;
use alder_api::ResponsePayload;
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

/// An entry change observed on a watched map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEvent {
    /// What happened.
    pub kind: MapEventKind,
    /// The entry after the change (the removed entry for `Removed`).
    pub entry: MapEntry,
}

struct MapHandler;

#[async_trait]
impl SessionHandler for MapHandler {
    async fn create(&self, session: &Session) -> Result<(), ClientError> {
        let payload = session
            .create_with(RequestPayload::Map(MapRequest::Create {
                timeout_ms: session.requested_timeout_ms(),
            }))
            .await?;
        match payload {
            ResponsePayload::Map(MapResponse::Created { session_timeout_ms }) => {
                session.adopt_timeout(session_timeout_ms).await;
                Ok(())
            }
            other => Err(ClientError::unexpected("map create", &other)),
        }
    }

    async fn keep_alive(&self, session: &Session) -> Result<(), ClientError> {
        match session.keep_alive_with(RequestPayload::Map(MapRequest::KeepAlive)).await? {
            ResponsePayload::Map(MapResponse::KeepAlive) => Ok(()),
            other => Err(ClientError::unexpected("map keep-alive", &other)),
        }
    }

    async fn close(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Map(MapRequest::Close { delete: false })).await.map(|_| ())
    }

    async fn delete(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Map(MapRequest::Close { delete: true })).await.map(|_| ())
    }
}

/// One partition's slice of a sharded map.
struct MapPartition {
    session: Arc<Session>,
}

impl MapPartition {
    async fn open(
        name: PrimitiveName,
        partition: PartitionId,
        connection: Arc<dyn PartitionConnection>,
        options: SessionOptions,
    ) -> Result<Arc<Self>, ClientError> {
        let session = Session::open(name, partition, connection, Arc::new(MapHandler), options).await?;
        Ok(Arc::new(Self { session }))
    }

    async fn put(
        &self,
        key: String,
        value: Vec<u8>,
        expect_version: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, ClientError> {
        self.session
            .command(
                RequestPayload::Map(MapRequest::Put {
                    key,
                    value,
                    expect_version,
                }),
                cancel,
                move |payload| match payload {
                    ResponsePayload::Map(MapResponse::Put { succeeded: true, version, .. }) => Ok(version),
                    ResponsePayload::Map(MapResponse::Put { succeeded: false, .. }) => {
                        Err(ClientError::VersionMismatch)
                    }
                    other => Err(ClientError::unexpected("map put", &other)),
                },
            )
            .await
    }

    async fn get(&self, key: String, cancel: &CancellationToken) -> Result<Option<MapEntry>, ClientError> {
        self.session
            .query(RequestPayload::Map(MapRequest::Get { key }), cancel, |payload| match payload {
                ResponsePayload::Map(MapResponse::Get { entry }) => Ok(entry),
                other => Err(ClientError::unexpected("map get", &other)),
            })
            .await
    }

    async fn remove(
        &self,
        key: String,
        expect_version: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<MapEntry>, ClientError> {
        let conditional = expect_version > 0;
        self.session
            .command(
                RequestPayload::Map(MapRequest::Remove { key, expect_version }),
                cancel,
                move |payload| match payload {
                    ResponsePayload::Map(MapResponse::Remove { succeeded: true, previous }) => Ok(previous),
                    ResponsePayload::Map(MapResponse::Remove { succeeded: false, .. }) if conditional => {
                        Err(ClientError::VersionMismatch)
                    }
                    ResponsePayload::Map(MapResponse::Remove { succeeded: false, .. }) => Ok(None),
                    other => Err(ClientError::unexpected("map remove", &other)),
                },
            )
            .await
    }

    async fn size(&self, cancel: &CancellationToken) -> Result<u64, ClientError> {
        self.session
            .query(RequestPayload::Map(MapRequest::Size), cancel, |payload| match payload {
                ResponsePayload::Map(MapResponse::Size { size }) => Ok(size),
                other => Err(ClientError::unexpected("map size", &other)),
            })
            .await
    }

    async fn keys(&self, cancel: &CancellationToken) -> Result<Vec<String>, ClientError> {
        self.session
            .query(RequestPayload::Map(MapRequest::Keys), cancel, |payload| match payload {
                ResponsePayload::Map(MapResponse::Keys { keys }) => Ok(keys),
                other => Err(ClientError::unexpected("map keys", &other)),
            })
            .await
    }

    async fn entries(&self, cancel: &CancellationToken) -> Result<Vec<MapEntry>, ClientError> {
        self.session
            .query(RequestPayload::Map(MapRequest::Entries), cancel, |payload| match payload {
                ResponsePayload::Map(MapResponse::Entries { entries }) => Ok(entries),
                other => Err(ClientError::unexpected("map entries", &other)),
            })
            .await
    }

    async fn clear(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.session
            .command(RequestPayload::Map(MapRequest::Clear), cancel, |payload| match payload {
                ResponsePayload::Map(MapResponse::Clear) => Ok(()),
                other => Err(ClientError::unexpected("map clear", &other)),
            })
            .await
    }

    async fn watch(&self, cancel: &CancellationToken) -> Result<EventStream<MapEvent>, ClientError> {
        self.session
            .command_stream(RequestPayload::Map(MapRequest::Events), cancel, |payload| match payload {
                ResponsePayload::Map(MapResponse::Event { kind, entry }) => Ok(Some(MapEvent { kind, entry })),
                other => Err(ClientError::unexpected("map event", &other)),
            })
            .await
    }
}

/// A distributed map striped over all partitions by key.
///
/// Every operation takes a cancellation token, propagated through the
/// fan-out into each per-partition call.
pub struct DistributedMap {
    name: PrimitiveName,
    partitions: Vec<Arc<MapPartition>>,
}

impl DistributedMap {
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
            async move { MapPartition::open(name, i as PartitionId, connection, options).await }
        })
        .await?;
        Ok(Self { name, partitions })
    }

    fn partition_for(&self, key: &str) -> Result<&Arc<MapPartition>, ClientError> {
        let index = partition_index(key, self.partitions.len())?;
        Ok(&self.partitions[index])
    }

    /// Write an entry unconditionally. Returns the entry's new version.
    pub async fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<u64, ClientError> {
        let key = key.into();
        self.partition_for(&key)?.put(key, value.into(), 0, cancel).await
    }

    /// Write an entry only if its current version is `expect_version`.
    /// Returns the new version, or [`ClientError::VersionMismatch`].
    pub async fn put_if_version(
        &self,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        expect_version: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, ClientError> {
        let key = key.into();
        self.partition_for(&key)?.put(key, value.into(), expect_version, cancel).await
    }

    /// Read an entry.
    pub async fn get(
        &self,
        key: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<Option<MapEntry>, ClientError> {
        let key = key.into();
        self.partition_for(&key)?.get(key, cancel).await
    }

    /// Remove an entry. Returns the removed entry, if any.
    pub async fn remove(
        &self,
        key: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<Option<MapEntry>, ClientError> {
        let key = key.into();
        self.partition_for(&key)?.remove(key, 0, cancel).await
    }

    /// Remove an entry only if its current version is `expect_version`.
    pub async fn remove_if_version(
        &self,
        key: impl Into<String>,
        expect_version: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<MapEntry>, ClientError> {
        let key = key.into();
        self.partition_for(&key)?.remove(key, expect_version, cancel).await
    }

    /// Count entries across all partitions.
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

    /// Collect every key across all partitions. Order is unspecified.
    pub async fn keys(&self, cancel: &CancellationToken) -> Result<Vec<String>, ClientError> {
        let partitions = self.partitions.clone();
        let slices = execute_unordered(partitions.len(), cancel, |i| {
            let partition = partitions[i].clone();
            let cancel = cancel.clone();
            async move { partition.keys(&cancel).await }
        })
        .await?;
        Ok(slices.into_iter().flatten().collect())
    }

    /// Collect every entry across all partitions. Order is unspecified.
    pub async fn entries(&self, cancel: &CancellationToken) -> Result<Vec<MapEntry>, ClientError> {
        let partitions = self.partitions.clone();
        let slices = execute_unordered(partitions.len(), cancel, |i| {
            let partition = partitions[i].clone();
            let cancel = cancel.clone();
            async move { partition.entries(&cancel).await }
        })
        .await?;
        Ok(slices.into_iter().flatten().collect())
    }

    /// Remove all entries from all partitions.
    pub async fn clear(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let partitions = self.partitions.clone();
        iter_async(partitions.len(), cancel, |i| {
            let partition = partitions[i].clone();
            let cancel = cancel.clone();
            async move { partition.clear(&cancel).await }
        })
        .await
    }

    /// Watch the map for entry changes across all partitions.
    ///
    /// Dropping the returned stream closes every per-partition stream.
    pub async fn watch(&self, cancel: &CancellationToken) -> Result<EventStream<MapEvent>, ClientError> {
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
impl Primitive for DistributedMap {
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
