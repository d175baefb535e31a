//! The per-(primitive, partition) session.
//!
//! A session layers per-client linearizable semantics on a stateless
//! request/response transport: the client numbers commands under an ordering
//! lock, the server executes them in number order and reports its
//! state-machine index, and the client reconciles indexes monotonically.
//! Queries carry the last observed index as a read floor, which yields
//! read-your-writes and monotonic reads. A dedicated task refreshes the
//! session with keep-alives carrying command and stream progress, keeping
//! timer logic off the command path.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use alder_api::PrimitiveName;
use alder_api::PrimitiveRequest;
use alder_api::PrimitiveResponse;
use alder_api::RequestHeader;
use alder_api::RequestPayload;
use alder_api::ResponseHeader;
use alder_api::ResponsePayload;
use alder_api::ResponseStatus;
use alder_api::StreamHeader;
use alder_transport::PartitionConnection;
use alder_transport::ResponseStream;
use alder_transport::TransportError;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::ClientError;
use crate::partition::PartitionId;
use crate::primitive::SessionHandler;
use crate::stream::EVENT_CHANNEL_CAPACITY;
use crate::stream::EventStream;
use crate::stream::StreamTracker;

/// Session configuration.
///
/// The session timeout is communicated to the server at create time; the
/// keep-alive cadence defaults to half of it and the per-call deadline
/// defaults to the timeout itself. Set the timeout first when combining
/// builders: it re-derives the other two.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Server-side session timeout requested at create.
    pub session_timeout: Duration,
    /// Per-call deadline.
    pub request_timeout: Duration,
    /// Keep-alive period.
    pub keep_alive: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl SessionOptions {
    /// Set the session timeout, re-deriving the request timeout and the
    /// keep-alive period from it.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self.request_timeout = timeout;
        self.keep_alive = timeout / 2;
        self
    }

    /// Set the per-call deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the keep-alive period.
    pub fn with_keep_alive(mut self, period: Duration) -> Self {
        self.keep_alive = period;
        self
    }
}

/// Session lifecycle states.
///
/// `Closed` and `Expired` are terminal: every operation on a session in one
/// of those states fails fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but the `Create` RPC has not completed.
    Opening,
    /// Live: operations are accepted and keep-alives run.
    Open,
    /// A close or delete is in flight.
    Closing,
    /// Closed by this client.
    Closed,
    /// The server no longer recognizes the session.
    Expired,
}

struct Shared {
    state: SessionState,
    session_id: u64,
    last_request_id: u64,
    completed_request_id: u64,
    last_index: u64,
    granted_timeout: Duration,
}

/// A session with one partition on behalf of one primitive.
pub struct Session {
    name: PrimitiveName,
    partition: PartitionId,
    connection: Arc<dyn PartitionConnection>,
    handler: Arc<dyn SessionHandler>,
    options: SessionOptions,
    shared: Mutex<Shared>,
    streams: Mutex<HashMap<u64, Weak<StreamTracker>>>,
    shutdown: CancellationToken,
}

impl Session {
    /// Open a session: issue the handler's `Create` RPC and start the
    /// keep-alive task.
    pub async fn open(
        name: PrimitiveName,
        partition: PartitionId,
        connection: Arc<dyn PartitionConnection>,
        handler: Arc<dyn SessionHandler>,
        options: SessionOptions,
    ) -> Result<Arc<Self>, ClientError> {
        let granted_timeout = options.session_timeout;
        let session = Arc::new(Self {
            name,
            partition,
            connection,
            handler: handler.clone(),
            options,
            shared: Mutex::new(Shared {
                state: SessionState::Opening,
                session_id: 0,
                last_request_id: 0,
                completed_request_id: 0,
                last_index: 0,
                granted_timeout,
            }),
            streams: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        });

        if let Err(err) = handler.create(&session).await {
            session.shared.lock().await.state = SessionState::Closed;
            return Err(ClientError::SessionOpenFailed {
                reason: err.to_string(),
            });
        }

        let (period, timeout) = {
            let mut shared = session.shared.lock().await;
            shared.state = SessionState::Open;
            let period = session.options.keep_alive.min(shared.granted_timeout / 2).max(Duration::from_millis(1));
            (period, shared.granted_timeout)
        };
        debug!(
            session = %session.name,
            partition = session.partition,
            keep_alive_ms = period.as_millis() as u64,
            "session open"
        );
        session.spawn_keep_alive(period, timeout);

        Ok(session)
    }

    /// The primitive identity this session serves.
    pub fn name(&self) -> &PrimitiveName {
        &self.name
    }

    /// The partition this session is bound to.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.shared.lock().await.state
    }

    /// Session timeout to request at create, in milliseconds.
    pub fn requested_timeout_ms(&self) -> u64 {
        self.options.session_timeout.as_millis() as u64
    }

    /// Adopt the timeout granted by the server at create.
    pub async fn adopt_timeout(&self, granted_ms: u64) {
        let mut shared = self.shared.lock().await;
        shared.granted_timeout = Duration::from_millis(granted_ms.max(1));
    }

    // ------------------------------------------------------------------
    // Command, query, stream paths
    // ------------------------------------------------------------------

    /// Issue a write.
    ///
    /// Allocates the next request id under the session's ordering lock,
    /// sends the payload, and reconciles the response header before
    /// decoding. Observing `cancel` aborts the in-flight call with
    /// [`ClientError::Cancelled`]; the session stays open.
    pub async fn command<T>(
        &self,
        payload: RequestPayload,
        cancel: &CancellationToken,
        decode: impl FnOnce(ResponsePayload) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let (header, request_id) = {
            let mut shared = self.shared.lock().await;
            ensure_open(&shared)?;
            shared.last_request_id += 1;
            let request_id = shared.last_request_id;
            (
                RequestHeader {
                    name: self.name.clone(),
                    session_id: shared.session_id,
                    request_id,
                    index: 0,
                    streams: Vec::new(),
                },
                request_id,
            )
        };

        let response = self.call(PrimitiveRequest { header, payload }, cancel).await?;
        self.accept(&response.header, Some(request_id)).await?;
        decode_payload(response.payload, decode)
    }

    /// Issue a read.
    ///
    /// Does not allocate a request id; carries the last observed index as a
    /// read floor so the server may not answer from an older state.
    /// Observing `cancel` aborts the in-flight call.
    pub async fn query<T>(
        &self,
        payload: RequestPayload,
        cancel: &CancellationToken,
        decode: impl FnOnce(ResponsePayload) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let header = {
            let shared = self.shared.lock().await;
            ensure_open(&shared)?;
            RequestHeader {
                name: self.name.clone(),
                session_id: shared.session_id,
                request_id: shared.last_request_id,
                index: shared.last_index,
                streams: Vec::new(),
            }
        };

        let response = self.call(PrimitiveRequest { header, payload }, cancel).await?;
        self.accept(&response.header, None).await?;
        decode_payload(response.payload, decode)
    }

    /// Open a server-stream for a write-path subscription.
    ///
    /// The stream id is the request id of the opening command. The decode
    /// hook returns `Ok(None)` to skip a frame (acks, padding) and
    /// `Ok(Some(event))` to deliver one. `cancel` aborts the open; once the
    /// stream is established, dropping it closes it.
    pub async fn command_stream<T, D>(
        self: &Arc<Self>,
        payload: RequestPayload,
        cancel: &CancellationToken,
        decode: D,
    ) -> Result<EventStream<T>, ClientError>
    where
        T: Send + 'static,
        D: Fn(ResponsePayload) -> Result<Option<T>, ClientError> + Send + 'static,
    {
        self.open_stream(payload, cancel, decode, false).await
    }

    /// Open a server-stream for a read-path subscription, carrying the last
    /// observed index as a read floor.
    pub async fn query_stream<T, D>(
        self: &Arc<Self>,
        payload: RequestPayload,
        cancel: &CancellationToken,
        decode: D,
    ) -> Result<EventStream<T>, ClientError>
    where
        T: Send + 'static,
        D: Fn(ResponsePayload) -> Result<Option<T>, ClientError> + Send + 'static,
    {
        self.open_stream(payload, cancel, decode, true).await
    }

    async fn open_stream<T, D>(
        self: &Arc<Self>,
        payload: RequestPayload,
        cancel: &CancellationToken,
        decode: D,
        read_floor: bool,
    ) -> Result<EventStream<T>, ClientError>
    where
        T: Send + 'static,
        D: Fn(ResponsePayload) -> Result<Option<T>, ClientError> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let header = {
            let mut shared = self.shared.lock().await;
            ensure_open(&shared)?;
            shared.last_request_id += 1;
            RequestHeader {
                name: self.name.clone(),
                session_id: shared.session_id,
                request_id: shared.last_request_id,
                index: if read_floor { shared.last_index } else { 0 },
                streams: Vec::new(),
            }
        };
        let stream_id = header.request_id;

        // The stream's own token: cancelled by session shutdown (parent) or
        // by the consumer dropping the returned stream (drop guard).
        let stream_token = self.shutdown.child_token();
        let transport_stream = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            result = self.connection.open_stream(PrimitiveRequest { header, payload }, &stream_token) => {
                result.map_err(transport_error)?
            }
        };

        let tracker = Arc::new(StreamTracker::new(stream_id));
        self.streams.lock().await.insert(stream_id, Arc::downgrade(&tracker));

        let (tx, mut events) = EventStream::channel(EVENT_CHANNEL_CAPACITY);
        events.attach_guard(stream_token.clone());
        let session = Arc::downgrade(self);
        tokio::spawn(run_stream(session, tracker, transport_stream, tx, stream_token, decode));

        Ok(events)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Close the session, releasing server-side session state.
    ///
    /// Fire-and-forget: the session transitions to `Closed` regardless of
    /// the close RPC's outcome. Idempotent.
    pub async fn close(&self) -> Result<(), ClientError> {
        {
            let mut shared = self.shared.lock().await;
            match shared.state {
                SessionState::Closing | SessionState::Closed | SessionState::Expired => return Ok(()),
                _ => shared.state = SessionState::Closing,
            }
        }
        self.shutdown.cancel();
        if let Err(err) = self.handler.close(self).await {
            debug!(session = %self.name, error = %err, "close session request failed");
        }
        self.shared.lock().await.state = SessionState::Closed;
        Ok(())
    }

    /// Close the session and destroy the primitive's server-side state.
    pub async fn delete(&self) -> Result<(), ClientError> {
        {
            let mut shared = self.shared.lock().await;
            match shared.state {
                SessionState::Closing | SessionState::Closed => return Err(ClientError::SessionClosed),
                SessionState::Expired => return Err(ClientError::SessionExpired),
                _ => shared.state = SessionState::Closing,
            }
        }
        self.shutdown.cancel();
        let result = self.handler.delete(self).await;
        self.shared.lock().await.state = SessionState::Closed;
        result
    }

    /// Mark the session expired and stop its keep-alives and streams.
    pub(crate) async fn expire(&self) {
        {
            let mut shared = self.shared.lock().await;
            if matches!(shared.state, SessionState::Opening | SessionState::Open) {
                shared.state = SessionState::Expired;
                warn!(session = %self.name, partition = self.partition, "session expired");
            }
        }
        self.shutdown.cancel();
    }

    // ------------------------------------------------------------------
    // Handler plumbing
    // ------------------------------------------------------------------

    /// Send the session-creating RPC built from `payload` and adopt the
    /// assigned session id. For use by [`SessionHandler::create`].
    pub async fn create_with(&self, payload: RequestPayload) -> Result<ResponsePayload, ClientError> {
        let header = RequestHeader {
            name: self.name.clone(),
            session_id: 0,
            request_id: 0,
            index: 0,
            streams: Vec::new(),
        };
        let response = self.call(PrimitiveRequest { header, payload }, &CancellationToken::new()).await?;
        if response.header.status == ResponseStatus::SessionExpired {
            return Err(ClientError::SessionExpired);
        }
        {
            let mut shared = self.shared.lock().await;
            shared.session_id = response.header.session_id;
            shared.last_index = response.header.index;
        }
        decode_payload(response.payload, Ok)
    }

    /// Send a keep-alive RPC built from `payload`. The header carries the
    /// highest completed request id, the last observed index, and the
    /// progress of every open stream. For use by
    /// [`SessionHandler::keep_alive`].
    pub async fn keep_alive_with(&self, payload: RequestPayload) -> Result<ResponsePayload, ClientError> {
        let streams = self.stream_headers().await;
        let header = {
            let shared = self.shared.lock().await;
            ensure_open(&shared)?;
            RequestHeader {
                name: self.name.clone(),
                session_id: shared.session_id,
                request_id: shared.completed_request_id,
                index: shared.last_index,
                streams,
            }
        };
        // Keyed to the shutdown token so a close aborts an in-flight
        // keep-alive promptly.
        let response = self.call(PrimitiveRequest { header, payload }, &self.shutdown).await?;
        self.accept(&response.header, None).await?;
        decode_payload(response.payload, Ok)
    }

    /// Send a close RPC built from `payload`, bypassing state checks. For
    /// use by [`SessionHandler::close`] and [`SessionHandler::delete`].
    pub async fn close_with(&self, payload: RequestPayload) -> Result<ResponsePayload, ClientError> {
        let header = {
            let shared = self.shared.lock().await;
            RequestHeader {
                name: self.name.clone(),
                session_id: shared.session_id,
                request_id: shared.completed_request_id,
                index: 0,
                streams: Vec::new(),
            }
        };
        // A fresh token: the shutdown token is already cancelled by the
        // time the close RPC goes out.
        let response = self.call(PrimitiveRequest { header, payload }, &CancellationToken::new()).await?;
        if response.header.status == ResponseStatus::SessionExpired {
            return Err(ClientError::SessionExpired);
        }
        decode_payload(response.payload, Ok)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn call(
        &self,
        request: PrimitiveRequest,
        cancel: &CancellationToken,
    ) -> Result<PrimitiveResponse, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let deadline = self.options.request_timeout;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            outcome = tokio::time::timeout(deadline, self.connection.unary(request, cancel)) => outcome,
        };
        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(transport_error(err)),
            Err(_) => Err(ClientError::Transport(TransportError::Timeout {
                duration_ms: deadline.as_millis() as u64,
            })),
        }
    }

    /// Reconcile a unary response header: expiry status, index monotonicity,
    /// and command completion.
    async fn accept(&self, header: &ResponseHeader, completed: Option<u64>) -> Result<(), ClientError> {
        if header.status == ResponseStatus::SessionExpired {
            self.expire().await;
            return Err(ClientError::SessionExpired);
        }
        let mut shared = self.shared.lock().await;
        if header.index < shared.last_index {
            return Err(ClientError::OutOfOrder {
                last: shared.last_index,
                received: header.index,
            });
        }
        shared.last_index = header.index;
        if let Some(request_id) = completed {
            shared.completed_request_id = shared.completed_request_id.max(request_id);
        }
        Ok(())
    }

    /// Advance the observed index from a stream response. Stream responses
    /// may interleave with command responses, so regressions are ignored
    /// rather than failed.
    async fn observe_index(&self, index: u64) {
        let mut shared = self.shared.lock().await;
        if index > shared.last_index {
            shared.last_index = index;
        }
    }

    async fn stream_headers(&self) -> Vec<StreamHeader> {
        let streams = self.streams.lock().await;
        streams
            .values()
            .filter_map(|weak| weak.upgrade())
            .map(|tracker| StreamHeader {
                stream_id: tracker.stream_id(),
                response_id: tracker.last_response_id(),
            })
            .collect()
    }

    async fn unregister_stream(&self, stream_id: u64) {
        self.streams.lock().await.remove(&stream_id);
    }

    fn spawn_keep_alive(self: &Arc<Self>, period: Duration, timeout: Duration) {
        let session = Arc::downgrade(self);
        let handler = self.handler.clone();
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            run_keep_alive(session, handler, token, period, timeout).await;
        });
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("name", &self.name).field("partition", &self.partition).finish_non_exhaustive()
    }
}

fn ensure_open(shared: &Shared) -> Result<(), ClientError> {
    match shared.state {
        SessionState::Open => Ok(()),
        SessionState::Expired => Err(ClientError::SessionExpired),
        SessionState::Opening | SessionState::Closing | SessionState::Closed => Err(ClientError::SessionClosed),
    }
}

fn transport_error(err: TransportError) -> ClientError {
    match err {
        TransportError::Cancelled => ClientError::Cancelled,
        err => ClientError::Transport(err),
    }
}

fn decode_payload<T>(
    payload: ResponsePayload,
    decode: impl FnOnce(ResponsePayload) -> Result<T, ClientError>,
) -> Result<T, ClientError> {
    match payload {
        ResponsePayload::Error { message } => Err(ClientError::Server { message }),
        payload => decode(payload),
    }
}

/// Keep-alive loop: one dedicated task per session.
///
/// Transient failures are retried at the next tick; the session expires when
/// the time since the last success exceeds the granted timeout, or when the
/// server answers `SessionExpired` (in which case `accept` already flipped
/// the state).
async fn run_keep_alive(
    session: Weak<Session>,
    handler: Arc<dyn SessionHandler>,
    token: CancellationToken,
    period: Duration,
    timeout: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_success = Instant::now();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(session) = session.upgrade() else { break };
                match handler.keep_alive(&session).await {
                    Ok(()) => last_success = Instant::now(),
                    Err(ClientError::SessionExpired) => break,
                    Err(ClientError::SessionClosed) => break,
                    Err(ClientError::Cancelled) => break,
                    Err(err) => {
                        if last_success.elapsed() >= timeout {
                            warn!(session = %session.name(), error = %err, "keep-alives failing past session timeout");
                            session.expire().await;
                            break;
                        }
                        warn!(session = %session.name(), error = %err, "keep-alive failed, will retry");
                    }
                }
            }
        }
    }
    debug!("keep-alive loop stopped");
}

/// Stream receive loop: enforces per-stream delivery order and feeds the
/// consumer channel. Holds the only strong reference to the tracker.
async fn run_stream<T, D>(
    session: Weak<Session>,
    tracker: Arc<StreamTracker>,
    mut stream: ResponseStream,
    tx: mpsc::Sender<Result<T, ClientError>>,
    token: CancellationToken,
    decode: D,
) where
    T: Send + 'static,
    D: Fn(ResponsePayload) -> Result<Option<T>, ClientError> + Send + 'static,
{
    loop {
        let item = tokio::select! {
            _ = token.cancelled() => {
                // Consumer dropped the stream, or the session closed or
                // expired underneath it. Surface expiry; the other cases
                // just end the stream.
                if let Some(session) = session.upgrade() {
                    if session.state().await == SessionState::Expired {
                        let _ = tx.send(Err(ClientError::SessionExpired)).await;
                    }
                }
                break;
            }
            item = stream.next() => item,
        };

        let response = match item {
            None => break,
            Some(Err(err)) => {
                let _ = tx.send(Err(ClientError::Transport(err))).await;
                break;
            }
            Some(Ok(response)) => response,
        };

        if response.header.status == ResponseStatus::SessionExpired {
            if let Some(session) = session.upgrade() {
                session.expire().await;
            }
            let _ = tx.send(Err(ClientError::SessionExpired)).await;
            break;
        }

        let response_id = response.header.response_id;
        let last = tracker.last_response_id();
        if response_id <= last {
            // Duplicate from replay.
            continue;
        }
        if response_id != last + 1 {
            warn!(
                stream_id = tracker.stream_id(),
                expected = last + 1,
                received = response_id,
                "stream gap detected"
            );
            let _ = tx
                .send(Err(ClientError::StreamGap {
                    expected: last + 1,
                    received: response_id,
                }))
                .await;
            break;
        }
        tracker.record(response_id);

        match session.upgrade() {
            Some(session) => session.observe_index(response.header.index).await,
            None => break,
        }

        match response.payload {
            ResponsePayload::Error { message } => {
                let _ = tx.send(Err(ClientError::Server { message })).await;
                break;
            }
            payload => match decode(payload) {
                Ok(Some(event)) => {
                    if tx.send(Ok(event)).await.is_err() {
                        debug!(stream_id = tracker.stream_id(), "stream consumer dropped");
                        break;
                    }
                }
                Ok(None) => continue,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            },
        }
    }

    if let Some(session) = session.upgrade() {
        session.unregister_stream(tracker.stream_id()).await;
    }
}
