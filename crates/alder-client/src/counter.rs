//! Distributed counter.

use std::sync::Arc;

use alder_api::CounterRequest;
use alder_api::CounterResponse;
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

struct CounterHandler;

#[async_trait]
impl SessionHandler for CounterHandler {
    async fn create(&self, session: &Session) -> Result<(), ClientError> {
        let payload = session
            .create_with(RequestPayload::Counter(CounterRequest::Create {
                timeout_ms: session.requested_timeout_ms(),
            }))
            .await?;
        match payload {
            ResponsePayload::Counter(CounterResponse::Created { session_timeout_ms }) => {
                session.adopt_timeout(session_timeout_ms).await;
                Ok(())
            }
            other => Err(ClientError::unexpected("counter create", &other)),
        }
    }

    async fn keep_alive(&self, session: &Session) -> Result<(), ClientError> {
        match session.keep_alive_with(RequestPayload::Counter(CounterRequest::KeepAlive)).await? {
            ResponsePayload::Counter(CounterResponse::KeepAlive) => Ok(()),
            other => Err(ClientError::unexpected("counter keep-alive", &other)),
        }
    }

    async fn close(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Counter(CounterRequest::Close { delete: false })).await.map(|_| ())
    }

    async fn delete(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Counter(CounterRequest::Close { delete: true })).await.map(|_| ())
    }
}

/// A distributed counter on a single partition.
pub struct DistributedCounter {
    name: PrimitiveName,
    session: Arc<Session>,
}

impl DistributedCounter {
    pub(crate) async fn open(
        name: PrimitiveName,
        partition: PartitionId,
        connection: Arc<dyn PartitionConnection>,
        options: SessionOptions,
    ) -> Result<Self, ClientError> {
        let session = Session::open(name.clone(), partition, connection, Arc::new(CounterHandler), options).await?;
        Ok(Self { name, session })
    }

    /// Read the current count.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<i64, ClientError> {
        self.session
            .query(RequestPayload::Counter(CounterRequest::Get), cancel, |payload| match payload {
                ResponsePayload::Counter(CounterResponse::Get { value }) => Ok(value),
                other => Err(ClientError::unexpected("counter get", &other)),
            })
            .await
    }

    /// Set the count to an absolute value.
    pub async fn set(&self, value: i64, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.session
            .command(RequestPayload::Counter(CounterRequest::Set { value }), cancel, |payload| match payload {
                ResponsePayload::Counter(CounterResponse::Set) => Ok(()),
                other => Err(ClientError::unexpected("counter set", &other)),
            })
            .await
    }

    /// Add `delta` to the count. Returns the new count.
    pub async fn increment(&self, delta: i64, cancel: &CancellationToken) -> Result<i64, ClientError> {
        self.session
            .command(
                RequestPayload::Counter(CounterRequest::Increment { delta }),
                cancel,
                |payload| match payload {
                    ResponsePayload::Counter(CounterResponse::Increment { value }) => Ok(value),
                    other => Err(ClientError::unexpected("counter increment", &other)),
                },
            )
            .await
    }

    /// Subtract `delta` from the count. Returns the new count.
    pub async fn decrement(&self, delta: i64, cancel: &CancellationToken) -> Result<i64, ClientError> {
        self.session
            .command(
                RequestPayload::Counter(CounterRequest::Decrement { delta }),
                cancel,
                |payload| match payload {
                    ResponsePayload::Counter(CounterResponse::Decrement { value }) => Ok(value),
                    other => Err(ClientError::unexpected("counter decrement", &other)),
                },
            )
            .await
    }
}

#[async_trait]
impl Primitive for DistributedCounter {
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
