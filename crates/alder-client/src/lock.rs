//! Distributed lock with fencing versions.

use std::sync::Arc;
use std::time::Duration;

use alder_api::LockRequest;
use alder_api::LockResponse;
use alder_api::PrimitiveName;
use alder_api::RequestPayload;
use alder_api::ResponsePayload;
use alder_transport::PartitionConnection;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::partition::PartitionId;
use crate::primitive::Primitive;
use crate::primitive::SessionHandler;
use crate::session::Session;
use crate::session::SessionOptions;

struct LockHandler;

#[async_trait]
impl SessionHandler for LockHandler {
    async fn create(&self, session: &Session) -> Result<(), ClientError> {
        let payload = session
            .create_with(RequestPayload::Lock(LockRequest::Create {
                timeout_ms: session.requested_timeout_ms(),
            }))
            .await?;
        match payload {
            ResponsePayload::Lock(LockResponse::Created { session_timeout_ms }) => {
                session.adopt_timeout(session_timeout_ms).await;
                Ok(())
            }
            other => Err(ClientError::unexpected("lock create", &other)),
        }
    }

    async fn keep_alive(&self, session: &Session) -> Result<(), ClientError> {
        match session.keep_alive_with(RequestPayload::Lock(LockRequest::KeepAlive)).await? {
            ResponsePayload::Lock(LockResponse::KeepAlive) => Ok(()),
            other => Err(ClientError::unexpected("lock keep-alive", &other)),
        }
    }

    async fn close(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Lock(LockRequest::Close { delete: false })).await.map(|_| ())
    }

    async fn delete(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Lock(LockRequest::Close { delete: true })).await.map(|_| ())
    }
}

/// A distributed lock on a single partition.
///
/// Acquisitions return a fencing version: a number that increases with each
/// grant, letting downstream systems reject writes from stale holders.
/// Cancelling a blocked [`lock`](Self::lock) aborts the wait without
/// closing the session.
pub struct DistributedLock {
    name: PrimitiveName,
    session: Arc<Session>,
}

impl DistributedLock {
    pub(crate) async fn open(
        name: PrimitiveName,
        partition: PartitionId,
        connection: Arc<dyn PartitionConnection>,
        options: SessionOptions,
    ) -> Result<Self, ClientError> {
        let session = Session::open(name.clone(), partition, connection, Arc::new(LockHandler), options).await?;
        Ok(Self { name, session })
    }

    /// Acquire the lock, waiting until it is granted. Returns the fencing
    /// version of the acquisition.
    pub async fn lock(&self, cancel: &CancellationToken) -> Result<u64, ClientError> {
        let version = self
            .session
            .command(
                RequestPayload::Lock(LockRequest::Lock { timeout_ms: None }),
                cancel,
                |payload| match payload {
                    ResponsePayload::Lock(LockResponse::Lock { acquired: true, version }) => Ok(version),
                    ResponsePayload::Lock(LockResponse::Lock { acquired: false, .. }) => Err(ClientError::Server {
                        message: "lock wait aborted".to_string(),
                    }),
                    other => Err(ClientError::unexpected("lock acquire", &other)),
                },
            )
            .await?;
        Ok(version)
    }

    /// Acquire the lock only if it is free. Returns the fencing version, or
    /// `None` when the lock is held.
    pub async fn try_lock(&self, cancel: &CancellationToken) -> Result<Option<u64>, ClientError> {
        self.session
            .command(
                RequestPayload::Lock(LockRequest::Lock { timeout_ms: Some(0) }),
                cancel,
                |payload| match payload {
                    ResponsePayload::Lock(LockResponse::Lock { acquired: true, version }) => Ok(Some(version)),
                    ResponsePayload::Lock(LockResponse::Lock { acquired: false, .. }) => Ok(None),
                    other => Err(ClientError::unexpected("lock try-acquire", &other)),
                },
            )
            .await
    }

    /// Acquire the lock, waiting at most `timeout`. Returns the fencing
    /// version, or `None` when the wait timed out.
    pub async fn lock_timeout(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, ClientError> {
        self.session
            .command(
                RequestPayload::Lock(LockRequest::Lock {
                    timeout_ms: Some(timeout.as_millis() as u64),
                }),
                cancel,
                |payload| match payload {
                    ResponsePayload::Lock(LockResponse::Lock { acquired: true, version }) => Ok(Some(version)),
                    ResponsePayload::Lock(LockResponse::Lock { acquired: false, .. }) => Ok(None),
                    other => Err(ClientError::unexpected("lock acquire", &other)),
                },
            )
            .await
    }

    /// Release the lock acquired with `version`. Fails with
    /// [`ClientError::NotLocked`] when the caller does not hold it.
    pub async fn unlock(&self, version: u64, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.session
            .command(RequestPayload::Lock(LockRequest::Unlock { version }), cancel, |payload| match payload {
                ResponsePayload::Lock(LockResponse::Unlock { released: true }) => Ok(()),
                ResponsePayload::Lock(LockResponse::Unlock { released: false }) => Err(ClientError::NotLocked),
                other => Err(ClientError::unexpected("lock release", &other)),
            })
            .await
    }

    /// Check whether the lock is currently held by anyone.
    pub async fn is_locked(&self, cancel: &CancellationToken) -> Result<bool, ClientError> {
        self.is_locked_inner(0, cancel).await
    }

    /// Check whether the acquisition with `version` still holds the lock.
    pub async fn is_locked_version(&self, version: u64, cancel: &CancellationToken) -> Result<bool, ClientError> {
        self.is_locked_inner(version, cancel).await
    }

    async fn is_locked_inner(&self, version: u64, cancel: &CancellationToken) -> Result<bool, ClientError> {
        self.session
            .query(RequestPayload::Lock(LockRequest::IsLocked { version }), cancel, |payload| match payload {
                ResponsePayload::Lock(LockResponse::IsLocked { locked }) => Ok(locked),
                other => Err(ClientError::unexpected("lock status", &other)),
            })
            .await
    }
}

#[async_trait]
impl Primitive for DistributedLock {
    fn name(&self) -> &PrimitiveName {
        &self.name
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.session.close().await
    }

    async fn delete(&self) -> Result<(), ClientError> {
        self.session.delete().await
    }
}
