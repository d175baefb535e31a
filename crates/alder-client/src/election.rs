//! Leader election.

use std::sync::Arc;

use alder_api::ElectionRequest;
use alder_api::ElectionResponse;
use alder_api::PrimitiveName;
use alder_api::RequestPayload;
use alder_api::ResponsePayload;
use alder_api::TermInfo;
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

/// A change of leadership observed on a watched election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionEvent {
    /// The term after the change.
    pub term: TermInfo,
}

struct ElectionHandler;

#[async_trait]
impl SessionHandler for ElectionHandler {
    async fn create(&self, session: &Session) -> Result<(), ClientError> {
        let payload = session
            .create_with(RequestPayload::Election(ElectionRequest::Create {
                timeout_ms: session.requested_timeout_ms(),
            }))
            .await?;
        match payload {
            ResponsePayload::Election(ElectionResponse::Created { session_timeout_ms }) => {
                session.adopt_timeout(session_timeout_ms).await;
                Ok(())
            }
            other => Err(ClientError::unexpected("election create", &other)),
        }
    }

    async fn keep_alive(&self, session: &Session) -> Result<(), ClientError> {
        match session.keep_alive_with(RequestPayload::Election(ElectionRequest::KeepAlive)).await? {
            ResponsePayload::Election(ElectionResponse::KeepAlive) => Ok(()),
            other => Err(ClientError::unexpected("election keep-alive", &other)),
        }
    }

    async fn close(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Election(ElectionRequest::Close { delete: false })).await.map(|_| ())
    }

    async fn delete(&self, session: &Session) -> Result<(), ClientError> {
        session.close_with(RequestPayload::Election(ElectionRequest::Close { delete: true })).await.map(|_| ())
    }
}

/// A leader election on a single partition.
///
/// Candidates enroll with `enter`; the earliest enrolled candidate leads.
/// Term numbers increase on every leadership change and double as fencing
/// tokens for work the leader performs.
pub struct LeaderElection {
    name: PrimitiveName,
    session: Arc<Session>,
}

impl LeaderElection {
    pub(crate) async fn open(
        name: PrimitiveName,
        partition: PartitionId,
        connection: Arc<dyn PartitionConnection>,
        options: SessionOptions,
    ) -> Result<Self, ClientError> {
        let session = Session::open(name.clone(), partition, connection, Arc::new(ElectionHandler), options).await?;
        Ok(Self { name, session })
    }

    /// Enroll a candidate. Returns the resulting term.
    pub async fn enter(
        &self,
        candidate_id: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<TermInfo, ClientError> {
        self.session
            .command(
                RequestPayload::Election(ElectionRequest::Enter {
                    candidate_id: candidate_id.into(),
                }),
                cancel,
                |payload| match payload {
                    ResponsePayload::Election(ElectionResponse::Enter { term }) => Ok(term),
                    other => Err(ClientError::unexpected("election enter", &other)),
                },
            )
            .await
    }

    /// Withdraw a candidate, ceding leadership if it leads. Returns the
    /// resulting term.
    pub async fn leave(
        &self,
        candidate_id: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<TermInfo, ClientError> {
        self.session
            .command(
                RequestPayload::Election(ElectionRequest::Leave {
                    candidate_id: candidate_id.into(),
                }),
                cancel,
                |payload| match payload {
                    ResponsePayload::Election(ElectionResponse::Leave { term }) => Ok(term),
                    other => Err(ClientError::unexpected("election leave", &other)),
                },
            )
            .await
    }

    /// Read the current term.
    pub async fn get_term(&self, cancel: &CancellationToken) -> Result<TermInfo, ClientError> {
        self.session
            .query(RequestPayload::Election(ElectionRequest::GetTerm), cancel, |payload| match payload {
                ResponsePayload::Election(ElectionResponse::Term { term }) => Ok(term),
                other => Err(ClientError::unexpected("election term", &other)),
            })
            .await
    }

    /// Watch the election for leadership changes.
    pub async fn watch(&self, cancel: &CancellationToken) -> Result<EventStream<ElectionEvent>, ClientError> {
        self.session
            .command_stream(RequestPayload::Election(ElectionRequest::Events), cancel, |payload| match payload {
                ResponsePayload::Election(ElectionResponse::Event { term }) => Ok(Some(ElectionEvent { term })),
                other => Err(ClientError::unexpected("election event", &other)),
            })
            .await
    }
}

#[async_trait]
impl Primitive for LeaderElection {
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
