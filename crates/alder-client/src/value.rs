//! Atomic versioned value.

use std::sync::Arc;

use alder_api::PrimitiveName;
use alder_api::RequestPayload;
use alder_api::ResponsePayload;
use alder_api::ValueRequest;
use alder_api::ValueResponse;
use alder_transport::PartitionConnection;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::partition::PartitionId;
use crate::primitive::Primitive;
use crate::primitive::SessionHandler;
use crate::session::Session;
use crate::session::SessionOptions;
use crate::stream::EventStream;

/// Kind of a value event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEventKind {
    /// The value was updated.
    Updated,
}

/// A change observed on a watched value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEvent {
    /// What happened.
    pub kind: ValueEventKind,
    /// Value after the update.
    pub value: Vec<u8>,
    /// Version after the update.
    pub version: u64,
}

struct ValueHandler;

#[async_trait]
impl SessionHandler for ValueHandler {
    async fn create(&self, session: &Session) -> Result<(), ClientError> {
        let payload = session
            .create_with(RequestPayload::Value(ValueRequest::Create {
                timeout_ms: session.requested_timeout_ms(),
            }))
            .await?;
        match payload {
            ResponsePayload::Value(ValueResponse::Created { session_timeout_ms }) => {
                session.adopt_timeout(session_timeout_ms).await;
                Ok(())
            }
            other => Err(ClientError::unexpected("value create", &other)),
        }
    }

    async fn keep_alive(&self, session: &Session) -> Result<(), ClientError> {
        match session.keep_alive_with(RequestPayload::Value(ValueRequest::KeepAlive)).await? {
            ResponsePayload::Value(ValueResponse::KeepAlive) => Ok(()),
            other => Err(ClientError::unexpected("value keep-alive", &other)),
        }
    }

    async fn close(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Value(ValueRequest::Close { delete: false })).await.map(|_| ())
    }

    async fn delete(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Value(ValueRequest::Close { delete: true })).await.map(|_| ())
    }
}

/// A distributed atomic value with optimistic versioning.
///
/// The value lives on a single partition chosen by hashing the primitive
/// name, so all clients naming the same value reach the same partition.
/// Every operation takes a cancellation token; observing it aborts the
/// in-flight call without closing the session.
pub struct AtomicValue {
    name: PrimitiveName,
    session: Arc<Session>,
}

impl AtomicValue {
    pub(crate) async fn open(
        name: PrimitiveName,
        partition: PartitionId,
        connection: Arc<dyn PartitionConnection>,
        options: SessionOptions,
    ) -> Result<Self, ClientError> {
        let session = Session::open(name.clone(), partition, connection, Arc::new(ValueHandler), options).await?;
        Ok(Self { name, session })
    }

    /// Set the value unconditionally. Returns the new version.
    pub async fn set(&self, value: impl Into<Vec<u8>>, cancel: &CancellationToken) -> Result<u64, ClientError> {
        self.set_inner(value.into(), 0, cancel).await
    }

    /// Set the value only if its current version is `expect_version`.
    /// Returns the new version, or [`ClientError::VersionMismatch`].
    pub async fn set_with_version(
        &self,
        value: impl Into<Vec<u8>>,
        expect_version: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, ClientError> {
        self.set_inner(value.into(), expect_version, cancel).await
    }

    async fn set_inner(
        &self,
        value: Vec<u8>,
        expect_version: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, ClientError> {
        self.session
            .command(
                RequestPayload::Value(ValueRequest::Set { value, expect_version }),
                cancel,
                move |payload| match payload {
                    ResponsePayload::Value(ValueResponse::Set { succeeded: true, version }) => Ok(version),
                    ResponsePayload::Value(ValueResponse::Set { succeeded: false, .. }) => {
                        if expect_version > 0 {
                            Err(ClientError::VersionMismatch)
                        } else {
                            Err(ClientError::Server {
                                message: "set rejected".to_string(),
                            })
                        }
                    }
                    other => Err(ClientError::unexpected("value set", &other)),
                },
            )
            .await
    }

    /// Read the current value and its version.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<(Vec<u8>, u64), ClientError> {
        self.session
            .query(RequestPayload::Value(ValueRequest::Get), cancel, |payload| match payload {
                ResponsePayload::Value(ValueResponse::Get { value, version }) => Ok((value, version)),
                other => Err(ClientError::unexpected("value get", &other)),
            })
            .await
    }

    /// Watch the value for changes.
    ///
    /// Events are delivered in server order with no gaps; a delivery gap
    /// fails the stream with [`ClientError::StreamGap`]. Dropping the
    /// returned stream closes it.
    pub async fn watch(&self, cancel: &CancellationToken) -> Result<EventStream<ValueEvent>, ClientError> {
        self.session
            .command_stream(RequestPayload::Value(ValueRequest::Events), cancel, |payload| match payload {
                ResponsePayload::Value(ValueResponse::Event { value, version }) => Ok(Some(ValueEvent {
                    kind: ValueEventKind::Updated,
                    value,
                    version,
                })),
                other => Err(ClientError::unexpected("value event", &other)),
            })
            .await
    }
}

#[async_trait]
impl Primitive for AtomicValue {
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
