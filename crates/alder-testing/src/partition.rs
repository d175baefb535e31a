//! A deterministic partition server.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use alder_api::CounterRequest;
use alder_api::CounterResponse;
use alder_api::ElectionRequest;
use alder_api::ElectionResponse;
use alder_api::LockRequest;
use alder_api::LockResponse;
use alder_api::MapEntry;
use alder_api::MapEventKind;
use alder_api::MapRequest;
use alder_api::MapResponse;
use alder_api::PrimitiveName;
use alder_api::PrimitiveRequest;
use alder_api::PrimitiveResponse;
use alder_api::RequestHeader;
use alder_api::RequestPayload;
use alder_api::ResponseHeader;
use alder_api::ResponsePayload;
use alder_api::ResponseStatus;
use alder_api::SetEventKind;
use alder_api::SetRequest;
use alder_api::SetResponse;
use alder_api::TermInfo;
use alder_api::ValueRequest;
use alder_api::ValueResponse;
use alder_transport::PartitionConnection;
use alder_transport::ResponseStream;
use alder_transport::TransportError;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const STREAM_BUFFER: usize = 256;

/// An in-process partition implementing the session wire protocol.
///
/// State machines are exact but simplified: one mutex guards the whole
/// partition, commands bump a monotone index, and event streams deliver
/// server-numbered responses. Fault switches simulate the failure modes the
/// session runtime must survive.
#[derive(Clone)]
pub struct TestPartition {
    inner: Arc<Inner>,
}

struct Inner {
    index: AtomicU64,
    fail_requests: AtomicBool,
    drop_keep_alives: AtomicBool,
    stream_gap: AtomicBool,
    state: Mutex<PartitionState>,
}

#[derive(Default)]
struct PartitionState {
    next_session_id: u64,
    sessions: HashMap<u64, SessionRecord>,
    primitives: HashMap<PrimitiveName, PrimitiveState>,
}

struct SessionRecord {
    name: PrimitiveName,
    timeout: Duration,
    refreshed_at: Instant,
    streams: Vec<StreamRecord>,
}

struct StreamRecord {
    stream_id: u64,
    next_response_id: u64,
    tx: mpsc::Sender<Result<PrimitiveResponse, TransportError>>,
}

enum PrimitiveState {
    Value(ValueState),
    Counter(i64),
    Lock(LockState),
    Election(ElectionState),
    Set(HashSet<String>),
    Map(MapState),
}

#[derive(Default)]
struct ValueState {
    value: Vec<u8>,
    version: u64,
}

#[derive(Default)]
struct LockState {
    holder: Option<LockHolder>,
    last_version: u64,
    queue: VecDeque<LockWaiter>,
}

struct LockHolder {
    session_id: u64,
    version: u64,
}

struct LockWaiter {
    session_id: u64,
    tx: oneshot::Sender<u64>,
}

#[derive(Default)]
struct ElectionState {
    term: u64,
    candidates: Vec<String>,
}

#[derive(Default)]
struct MapState {
    entries: HashMap<String, (Vec<u8>, u64)>,
    last_version: u64,
}

impl Default for TestPartition {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPartition {
    /// Create an empty partition.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                index: AtomicU64::new(0),
                fail_requests: AtomicBool::new(false),
                drop_keep_alives: AtomicBool::new(false),
                stream_gap: AtomicBool::new(false),
                state: Mutex::new(PartitionState::default()),
            }),
        }
    }

    /// Fail every subsequent request with a transport error.
    pub fn fail_requests(&self, enabled: bool) {
        self.inner.fail_requests.store(enabled, Ordering::SeqCst);
    }

    /// Stop answering keep-alives. Sessions then expire server-side once
    /// their timeout elapses, and the client expires them from silence.
    pub fn drop_keep_alives(&self, enabled: bool) {
        self.inner.drop_keep_alives.store(enabled, Ordering::SeqCst);
    }

    /// Skip one response id on the next event delivery.
    pub fn inject_stream_gap(&self) {
        self.inner.stream_gap.store(true, Ordering::SeqCst);
    }

    /// Current state-machine index.
    pub fn index(&self) -> u64 {
        self.inner.index.load(Ordering::SeqCst)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.state.lock().await.sessions.len()
    }

    /// Number of open event streams across all sessions.
    pub async fn stream_count(&self) -> usize {
        self.inner.state.lock().await.sessions.values().map(|record| record.streams.len()).sum()
    }

    /// Elements of this partition's slice of a set, sorted, for assertions.
    pub async fn set_elements(&self, name: &PrimitiveName) -> Vec<String> {
        let state = self.inner.state.lock().await;
        let mut elements: Vec<String> = match state.primitives.get(name) {
            Some(PrimitiveState::Set(elements)) => elements.iter().cloned().collect(),
            _ => Vec::new(),
        };
        elements.sort();
        elements
    }

    fn bump_index(&self) -> u64 {
        self.inner.index.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn take_gap(&self) -> bool {
        self.inner.stream_gap.swap(false, Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    async fn handle_unary(&self, request: PrimitiveRequest) -> Result<PrimitiveResponse, TransportError> {
        if self.inner.fail_requests.load(Ordering::SeqCst) {
            return Err(TransportError::Connection {
                reason: "injected partition failure".to_string(),
            });
        }
        let PrimitiveRequest { header, payload } = request;
        match payload {
            RequestPayload::Value(req) => self.handle_value(header, req).await,
            RequestPayload::Counter(req) => self.handle_counter(header, req).await,
            RequestPayload::Lock(req) => self.handle_lock(header, req).await,
            RequestPayload::Election(req) => self.handle_election(header, req).await,
            RequestPayload::Set(req) => self.handle_set(header, req).await,
            RequestPayload::Map(req) => self.handle_map(header, req).await,
        }
    }

    async fn handle_open_stream(&self, request: PrimitiveRequest) -> Result<ResponseStream, TransportError> {
        if self.inner.fail_requests.load(Ordering::SeqCst) {
            return Err(TransportError::Connection {
                reason: "injected partition failure".to_string(),
            });
        }
        let PrimitiveRequest { header, payload } = request;
        let opens_stream = matches!(
            payload,
            RequestPayload::Value(ValueRequest::Events)
                | RequestPayload::Election(ElectionRequest::Events)
                | RequestPayload::Set(SetRequest::Events)
                | RequestPayload::Map(MapRequest::Events)
        );
        if !opens_stream {
            return Err(TransportError::Connection {
                reason: "request does not open a stream".to_string(),
            });
        }

        let (tx, stream) = ResponseStream::channel(STREAM_BUFFER);
        let mut state = self.inner.state.lock().await;
        let index = self.index();
        if let Some(expired) = state.check_session(header.session_id, Instant::now(), index) {
            let _ = tx.try_send(Ok(expired));
            return Ok(stream);
        }
        let record = state.sessions.get_mut(&header.session_id).expect("session checked above");
        record.streams.push(StreamRecord {
            stream_id: header.request_id,
            next_response_id: 1,
            tx,
        });
        debug!(session_id = header.session_id, stream_id = header.request_id, "stream opened");
        Ok(stream)
    }

    // ------------------------------------------------------------------
    // Session lifecycle shared by all primitives
    // ------------------------------------------------------------------

    async fn create_session(
        &self,
        header: &RequestHeader,
        timeout_ms: u64,
        init: fn() -> PrimitiveState,
    ) -> (u64, u64) {
        let mut state = self.inner.state.lock().await;
        let session_id = state.register_session(header.name.clone(), timeout_ms);
        state.primitives.entry(header.name.clone()).or_insert_with(init);
        (session_id, self.bump_index())
    }

    async fn keep_alive(
        &self,
        header: &RequestHeader,
        ok_payload: ResponsePayload,
    ) -> Result<PrimitiveResponse, TransportError> {
        if self.inner.drop_keep_alives.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout { duration_ms: 0 });
        }
        let mut state = self.inner.state.lock().await;
        let index = self.index();
        if let Some(expired) = state.check_session(header.session_id, Instant::now(), index) {
            return Ok(expired);
        }
        Ok(ok_response(header.session_id, index, ok_payload))
    }

    async fn close_session(
        &self,
        header: &RequestHeader,
        delete: bool,
        ok_payload: ResponsePayload,
    ) -> Result<PrimitiveResponse, TransportError> {
        let mut state = self.inner.state.lock().await;
        state.sessions.remove(&header.session_id);

        // A closing session relinquishes any lock it holds.
        if let Some(PrimitiveState::Lock(lock)) = state.primitives.get_mut(&header.name) {
            if lock.holder.as_ref().is_some_and(|holder| holder.session_id == header.session_id) {
                lock.holder = None;
                grant_waiters(lock);
            }
        }
        if delete {
            state.primitives.remove(&header.name);
        }
        let index = self.bump_index();
        debug!(session_id = header.session_id, delete, "session closed");
        Ok(ok_response(header.session_id, index, ok_payload))
    }

    // ------------------------------------------------------------------
    // Value
    // ------------------------------------------------------------------

    async fn handle_value(
        &self,
        header: RequestHeader,
        request: ValueRequest,
    ) -> Result<PrimitiveResponse, TransportError> {
        match request {
            ValueRequest::Create { timeout_ms } => {
                let (session_id, index) =
                    self.create_session(&header, timeout_ms, || PrimitiveState::Value(ValueState::default())).await;
                Ok(ok_response(
                    session_id,
                    index,
                    ResponsePayload::Value(ValueResponse::Created {
                        session_timeout_ms: timeout_ms,
                    }),
                ))
            }
            ValueRequest::KeepAlive => {
                self.keep_alive(&header, ResponsePayload::Value(ValueResponse::KeepAlive)).await
            }
            ValueRequest::Close { delete } => {
                self.close_session(&header, delete, ResponsePayload::Value(ValueResponse::Closed)).await
            }
            ValueRequest::Set { value, expect_version } => {
                let mut state = self.inner.state.lock().await;
                let current = self.index();
                if let Some(expired) = state.check_session(header.session_id, Instant::now(), current) {
                    return Ok(expired);
                }
                let gap = self.take_gap();
                let PartitionState { sessions, primitives, .. } = &mut *state;
                let slot = match value_state(primitives, &header.name) {
                    Ok(slot) => slot,
                    Err(message) => return Ok(error_response(header.session_id, current, message)),
                };
                if expect_version != 0 && expect_version != slot.version {
                    let version = slot.version;
                    return Ok(ok_response(
                        header.session_id,
                        current,
                        ResponsePayload::Value(ValueResponse::Set {
                            succeeded: false,
                            version,
                        }),
                    ));
                }
                slot.value = value;
                slot.version += 1;
                let version = slot.version;
                let event = ResponsePayload::Value(ValueResponse::Event {
                    value: slot.value.clone(),
                    version,
                });
                let index = self.bump_index();
                emit_event(sessions, &header.name, index, gap, &event);
                Ok(ok_response(
                    header.session_id,
                    index,
                    ResponsePayload::Value(ValueResponse::Set {
                        succeeded: true,
                        version,
                    }),
                ))
            }
            ValueRequest::Get => {
                let mut state = self.inner.state.lock().await;
                let index = self.index();
                if let Some(expired) = state.check_session(header.session_id, Instant::now(), index) {
                    return Ok(expired);
                }
                let slot = match value_state(&mut state.primitives, &header.name) {
                    Ok(slot) => slot,
                    Err(message) => return Ok(error_response(header.session_id, index, message)),
                };
                let payload = ResponsePayload::Value(ValueResponse::Get {
                    value: slot.value.clone(),
                    version: slot.version,
                });
                Ok(ok_response(header.session_id, index, payload))
            }
            ValueRequest::Events => Ok(error_response(
                header.session_id,
                self.index(),
                "events must be requested on a stream".to_string(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Counter
    // ------------------------------------------------------------------

    async fn handle_counter(
        &self,
        header: RequestHeader,
        request: CounterRequest,
    ) -> Result<PrimitiveResponse, TransportError> {
        match request {
            CounterRequest::Create { timeout_ms } => {
                let (session_id, index) =
                    self.create_session(&header, timeout_ms, || PrimitiveState::Counter(0)).await;
                Ok(ok_response(
                    session_id,
                    index,
                    ResponsePayload::Counter(CounterResponse::Created {
                        session_timeout_ms: timeout_ms,
                    }),
                ))
            }
            CounterRequest::KeepAlive => {
                self.keep_alive(&header, ResponsePayload::Counter(CounterResponse::KeepAlive)).await
            }
            CounterRequest::Close { delete } => {
                self.close_session(&header, delete, ResponsePayload::Counter(CounterResponse::Closed)).await
            }
            request => {
                let mut state = self.inner.state.lock().await;
                let current = self.index();
                if let Some(expired) = state.check_session(header.session_id, Instant::now(), current) {
                    return Ok(expired);
                }
                let count = match counter_state(&mut state.primitives, &header.name) {
                    Ok(count) => count,
                    Err(message) => return Ok(error_response(header.session_id, current, message)),
                };
                let (index, payload) = match request {
                    CounterRequest::Get => {
                        (current, ResponsePayload::Counter(CounterResponse::Get { value: *count }))
                    }
                    CounterRequest::Set { value } => {
                        *count = value;
                        (self.bump_index(), ResponsePayload::Counter(CounterResponse::Set))
                    }
                    CounterRequest::Increment { delta } => {
                        *count += delta;
                        (self.bump_index(), ResponsePayload::Counter(CounterResponse::Increment { value: *count }))
                    }
                    CounterRequest::Decrement { delta } => {
                        *count -= delta;
                        (self.bump_index(), ResponsePayload::Counter(CounterResponse::Decrement { value: *count }))
                    }
                    _ => unreachable!("lifecycle requests handled above"),
                };
                Ok(ok_response(header.session_id, index, payload))
            }
        }
    }

    // ------------------------------------------------------------------
    // Lock
    // ------------------------------------------------------------------

    async fn handle_lock(
        &self,
        header: RequestHeader,
        request: LockRequest,
    ) -> Result<PrimitiveResponse, TransportError> {
        match request {
            LockRequest::Create { timeout_ms } => {
                let (session_id, index) =
                    self.create_session(&header, timeout_ms, || PrimitiveState::Lock(LockState::default())).await;
                Ok(ok_response(
                    session_id,
                    index,
                    ResponsePayload::Lock(LockResponse::Created {
                        session_timeout_ms: timeout_ms,
                    }),
                ))
            }
            LockRequest::KeepAlive => {
                self.keep_alive(&header, ResponsePayload::Lock(LockResponse::KeepAlive)).await
            }
            LockRequest::Close { delete } => {
                self.close_session(&header, delete, ResponsePayload::Lock(LockResponse::Closed)).await
            }
            LockRequest::Lock { timeout_ms } => self.acquire_lock(header, timeout_ms).await,
            LockRequest::Unlock { version } => {
                let mut state = self.inner.state.lock().await;
                let current = self.index();
                if let Some(expired) = state.check_session(header.session_id, Instant::now(), current) {
                    return Ok(expired);
                }
                let lock = match lock_state(&mut state.primitives, &header.name) {
                    Ok(lock) => lock,
                    Err(message) => return Ok(error_response(header.session_id, current, message)),
                };
                let held_by_caller = lock
                    .holder
                    .as_ref()
                    .is_some_and(|holder| holder.session_id == header.session_id && (version == 0 || version == holder.version));
                let (index, released) = if held_by_caller {
                    lock.holder = None;
                    grant_waiters(lock);
                    (self.bump_index(), true)
                } else {
                    (current, false)
                };
                Ok(ok_response(
                    header.session_id,
                    index,
                    ResponsePayload::Lock(LockResponse::Unlock { released }),
                ))
            }
            LockRequest::IsLocked { version } => {
                let mut state = self.inner.state.lock().await;
                let index = self.index();
                if let Some(expired) = state.check_session(header.session_id, Instant::now(), index) {
                    return Ok(expired);
                }
                let lock = match lock_state(&mut state.primitives, &header.name) {
                    Ok(lock) => lock,
                    Err(message) => return Ok(error_response(header.session_id, index, message)),
                };
                let locked = match &lock.holder {
                    Some(holder) => version == 0 || version == holder.version,
                    None => false,
                };
                Ok(ok_response(header.session_id, index, ResponsePayload::Lock(LockResponse::IsLocked { locked })))
            }
        }
    }

    async fn acquire_lock(
        &self,
        header: RequestHeader,
        timeout_ms: Option<u64>,
    ) -> Result<PrimitiveResponse, TransportError> {
        let rx = {
            let mut state = self.inner.state.lock().await;
            let current = self.index();
            if let Some(expired) = state.check_session(header.session_id, Instant::now(), current) {
                return Ok(expired);
            }
            let lock = match lock_state(&mut state.primitives, &header.name) {
                Ok(lock) => lock,
                Err(message) => return Ok(error_response(header.session_id, current, message)),
            };
            if lock.holder.is_none() {
                lock.last_version += 1;
                let version = lock.last_version;
                lock.holder = Some(LockHolder {
                    session_id: header.session_id,
                    version,
                });
                let index = self.bump_index();
                return Ok(ok_response(
                    header.session_id,
                    index,
                    ResponsePayload::Lock(LockResponse::Lock {
                        acquired: true,
                        version,
                    }),
                ));
            }
            if timeout_ms == Some(0) {
                return Ok(ok_response(
                    header.session_id,
                    current,
                    ResponsePayload::Lock(LockResponse::Lock {
                        acquired: false,
                        version: 0,
                    }),
                ));
            }
            let (tx, rx) = oneshot::channel();
            lock.queue.push_back(LockWaiter {
                session_id: header.session_id,
                tx,
            });
            rx
        };

        let granted = match timeout_ms {
            None => rx.await.ok(),
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), rx).await {
                Ok(result) => result.ok(),
                Err(_) => None,
            },
        };
        let index = self.index();
        let payload = match granted {
            Some(version) => ResponsePayload::Lock(LockResponse::Lock {
                acquired: true,
                version,
            }),
            None => ResponsePayload::Lock(LockResponse::Lock {
                acquired: false,
                version: 0,
            }),
        };
        Ok(ok_response(header.session_id, index, payload))
    }

    // ------------------------------------------------------------------
    // Election
    // ------------------------------------------------------------------

    async fn handle_election(
        &self,
        header: RequestHeader,
        request: ElectionRequest,
    ) -> Result<PrimitiveResponse, TransportError> {
        match request {
            ElectionRequest::Create { timeout_ms } => {
                let (session_id, index) = self
                    .create_session(&header, timeout_ms, || PrimitiveState::Election(ElectionState::default()))
                    .await;
                Ok(ok_response(
                    session_id,
                    index,
                    ResponsePayload::Election(ElectionResponse::Created {
                        session_timeout_ms: timeout_ms,
                    }),
                ))
            }
            ElectionRequest::KeepAlive => {
                self.keep_alive(&header, ResponsePayload::Election(ElectionResponse::KeepAlive)).await
            }
            ElectionRequest::Close { delete } => {
                self.close_session(&header, delete, ResponsePayload::Election(ElectionResponse::Closed)).await
            }
            ElectionRequest::Enter { candidate_id } => {
                let mut state = self.inner.state.lock().await;
                let current = self.index();
                if let Some(expired) = state.check_session(header.session_id, Instant::now(), current) {
                    return Ok(expired);
                }
                let gap = self.take_gap();
                let PartitionState { sessions, primitives, .. } = &mut *state;
                let election = match election_state(primitives, &header.name) {
                    Ok(election) => election,
                    Err(message) => return Ok(error_response(header.session_id, current, message)),
                };
                let index = if election.candidates.contains(&candidate_id) {
                    current
                } else {
                    let had_leader = !election.candidates.is_empty();
                    election.candidates.push(candidate_id);
                    if !had_leader {
                        election.term += 1;
                    }
                    let term = term_info(election);
                    let index = self.bump_index();
                    emit_event(
                        sessions,
                        &header.name,
                        index,
                        gap,
                        &ResponsePayload::Election(ElectionResponse::Event { term }),
                    );
                    index
                };
                Ok(ok_response(
                    header.session_id,
                    index,
                    ResponsePayload::Election(ElectionResponse::Enter {
                        term: term_info(election),
                    }),
                ))
            }
            ElectionRequest::Leave { candidate_id } => {
                let mut state = self.inner.state.lock().await;
                let current = self.index();
                if let Some(expired) = state.check_session(header.session_id, Instant::now(), current) {
                    return Ok(expired);
                }
                let gap = self.take_gap();
                let PartitionState { sessions, primitives, .. } = &mut *state;
                let election = match election_state(primitives, &header.name) {
                    Ok(election) => election,
                    Err(message) => return Ok(error_response(header.session_id, current, message)),
                };
                let index = match election.candidates.iter().position(|candidate| *candidate == candidate_id) {
                    None => current,
                    Some(position) => {
                        election.candidates.remove(position);
                        if position == 0 {
                            election.term += 1;
                        }
                        let term = term_info(election);
                        let index = self.bump_index();
                        emit_event(
                            sessions,
                            &header.name,
                            index,
                            gap,
                            &ResponsePayload::Election(ElectionResponse::Event { term }),
                        );
                        index
                    }
                };
                Ok(ok_response(
                    header.session_id,
                    index,
                    ResponsePayload::Election(ElectionResponse::Leave {
                        term: term_info(election),
                    }),
                ))
            }
            ElectionRequest::GetTerm => {
                let mut state = self.inner.state.lock().await;
                let index = self.index();
                if let Some(expired) = state.check_session(header.session_id, Instant::now(), index) {
                    return Ok(expired);
                }
                let election = match election_state(&mut state.primitives, &header.name) {
                    Ok(election) => election,
                    Err(message) => return Ok(error_response(header.session_id, index, message)),
                };
                Ok(ok_response(
                    header.session_id,
                    index,
                    ResponsePayload::Election(ElectionResponse::Term {
                        term: term_info(election),
                    }),
                ))
            }
            ElectionRequest::Events => Ok(error_response(
                header.session_id,
                self.index(),
                "events must be requested on a stream".to_string(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Set
    // ------------------------------------------------------------------

    async fn handle_set(
        &self,
        header: RequestHeader,
        request: SetRequest,
    ) -> Result<PrimitiveResponse, TransportError> {
        match request {
            SetRequest::Create { timeout_ms } => {
                let (session_id, index) =
                    self.create_session(&header, timeout_ms, || PrimitiveState::Set(HashSet::new())).await;
                Ok(ok_response(
                    session_id,
                    index,
                    ResponsePayload::Set(SetResponse::Created {
                        session_timeout_ms: timeout_ms,
                    }),
                ))
            }
            SetRequest::KeepAlive => self.keep_alive(&header, ResponsePayload::Set(SetResponse::KeepAlive)).await,
            SetRequest::Close { delete } => {
                self.close_session(&header, delete, ResponsePayload::Set(SetResponse::Closed)).await
            }
            SetRequest::Events => Ok(error_response(
                header.session_id,
                self.index(),
                "events must be requested on a stream".to_string(),
            )),
            request => {
                let mut state = self.inner.state.lock().await;
                let current = self.index();
                if let Some(expired) = state.check_session(header.session_id, Instant::now(), current) {
                    return Ok(expired);
                }
                let gap = self.take_gap();
                let PartitionState { sessions, primitives, .. } = &mut *state;
                let elements = match set_state(primitives, &header.name) {
                    Ok(elements) => elements,
                    Err(message) => return Ok(error_response(header.session_id, current, message)),
                };
                let (index, payload) = match request {
                    SetRequest::Add { value } => {
                        let added = elements.insert(value.clone());
                        let index = if added {
                            let index = self.bump_index();
                            emit_event(
                                sessions,
                                &header.name,
                                index,
                                gap,
                                &ResponsePayload::Set(SetResponse::Event {
                                    kind: SetEventKind::Added,
                                    value,
                                }),
                            );
                            index
                        } else {
                            current
                        };
                        (index, ResponsePayload::Set(SetResponse::Add { added }))
                    }
                    SetRequest::Remove { value } => {
                        let removed = elements.remove(&value);
                        let index = if removed {
                            let index = self.bump_index();
                            emit_event(
                                sessions,
                                &header.name,
                                index,
                                gap,
                                &ResponsePayload::Set(SetResponse::Event {
                                    kind: SetEventKind::Removed,
                                    value,
                                }),
                            );
                            index
                        } else {
                            current
                        };
                        (index, ResponsePayload::Set(SetResponse::Remove { removed }))
                    }
                    SetRequest::Contains { value } => (
                        current,
                        ResponsePayload::Set(SetResponse::Contains {
                            contained: elements.contains(&value),
                        }),
                    ),
                    SetRequest::Size => (
                        current,
                        ResponsePayload::Set(SetResponse::Size {
                            size: elements.len() as u64,
                        }),
                    ),
                    SetRequest::Clear => {
                        elements.clear();
                        (self.bump_index(), ResponsePayload::Set(SetResponse::Clear))
                    }
                    _ => unreachable!("lifecycle requests handled above"),
                };
                Ok(ok_response(header.session_id, index, payload))
            }
        }
    }

    // ------------------------------------------------------------------
    // Map
    // ------------------------------------------------------------------

    async fn handle_map(
        &self,
        header: RequestHeader,
        request: MapRequest,
    ) -> Result<PrimitiveResponse, TransportError> {
        match request {
            MapRequest::Create { timeout_ms } => {
                let (session_id, index) =
                    self.create_session(&header, timeout_ms, || PrimitiveState::Map(MapState::default())).await;
                Ok(ok_response(
                    session_id,
                    index,
                    ResponsePayload::Map(MapResponse::Created {
                        session_timeout_ms: timeout_ms,
                    }),
                ))
            }
            MapRequest::KeepAlive => self.keep_alive(&header, ResponsePayload::Map(MapResponse::KeepAlive)).await,
            MapRequest::Close { delete } => {
                self.close_session(&header, delete, ResponsePayload::Map(MapResponse::Closed)).await
            }
            MapRequest::Events => Ok(error_response(
                header.session_id,
                self.index(),
                "events must be requested on a stream".to_string(),
            )),
            request => {
                let mut state = self.inner.state.lock().await;
                let current = self.index();
                if let Some(expired) = state.check_session(header.session_id, Instant::now(), current) {
                    return Ok(expired);
                }
                let gap = self.take_gap();
                let PartitionState { sessions, primitives, .. } = &mut *state;
                let map = match map_state(primitives, &header.name) {
                    Ok(map) => map,
                    Err(message) => return Ok(error_response(header.session_id, current, message)),
                };
                let (index, payload) = match request {
                    MapRequest::Put {
                        key,
                        value,
                        expect_version,
                    } => {
                        let existing = map.entries.get(&key);
                        let existing_version = existing.map(|(_, version)| *version).unwrap_or(0);
                        if expect_version != 0 && expect_version != existing_version {
                            (
                                current,
                                ResponsePayload::Map(MapResponse::Put {
                                    succeeded: false,
                                    version: existing_version,
                                    previous: None,
                                }),
                            )
                        } else {
                            let kind = if existing.is_some() {
                                MapEventKind::Updated
                            } else {
                                MapEventKind::Inserted
                            };
                            map.last_version += 1;
                            let version = map.last_version;
                            let previous = map
                                .entries
                                .insert(key.clone(), (value.clone(), version))
                                .map(|(value, version)| MapEntry {
                                    key: key.clone(),
                                    value,
                                    version,
                                });
                            let index = self.bump_index();
                            emit_event(
                                sessions,
                                &header.name,
                                index,
                                gap,
                                &ResponsePayload::Map(MapResponse::Event {
                                    kind,
                                    entry: MapEntry {
                                        key,
                                        value,
                                        version,
                                    },
                                }),
                            );
                            (
                                index,
                                ResponsePayload::Map(MapResponse::Put {
                                    succeeded: true,
                                    version,
                                    previous,
                                }),
                            )
                        }
                    }
                    MapRequest::Get { key } => {
                        let entry = map.entries.get(&key).map(|(value, version)| MapEntry {
                            key: key.clone(),
                            value: value.clone(),
                            version: *version,
                        });
                        (current, ResponsePayload::Map(MapResponse::Get { entry }))
                    }
                    MapRequest::Remove { key, expect_version } => {
                        let existing_version = map.entries.get(&key).map(|(_, version)| *version).unwrap_or(0);
                        if existing_version == 0 || (expect_version != 0 && expect_version != existing_version) {
                            (
                                current,
                                ResponsePayload::Map(MapResponse::Remove {
                                    succeeded: false,
                                    previous: None,
                                }),
                            )
                        } else {
                            let previous = map.entries.remove(&key).map(|(value, version)| MapEntry {
                                key: key.clone(),
                                value,
                                version,
                            });
                            let index = self.bump_index();
                            if let Some(entry) = &previous {
                                emit_event(
                                    sessions,
                                    &header.name,
                                    index,
                                    gap,
                                    &ResponsePayload::Map(MapResponse::Event {
                                        kind: MapEventKind::Removed,
                                        entry: entry.clone(),
                                    }),
                                );
                            }
                            (
                                index,
                                ResponsePayload::Map(MapResponse::Remove {
                                    succeeded: true,
                                    previous,
                                }),
                            )
                        }
                    }
                    MapRequest::Size => (
                        current,
                        ResponsePayload::Map(MapResponse::Size {
                            size: map.entries.len() as u64,
                        }),
                    ),
                    MapRequest::Keys => (
                        current,
                        ResponsePayload::Map(MapResponse::Keys {
                            keys: map.entries.keys().cloned().collect(),
                        }),
                    ),
                    MapRequest::Entries => (
                        current,
                        ResponsePayload::Map(MapResponse::Entries {
                            entries: map
                                .entries
                                .iter()
                                .map(|(key, (value, version))| MapEntry {
                                    key: key.clone(),
                                    value: value.clone(),
                                    version: *version,
                                })
                                .collect(),
                        }),
                    ),
                    MapRequest::Clear => {
                        map.entries.clear();
                        (self.bump_index(), ResponsePayload::Map(MapResponse::Clear))
                    }
                    _ => unreachable!("lifecycle requests handled above"),
                };
                Ok(ok_response(header.session_id, index, payload))
            }
        }
    }
}

#[async_trait]
impl PartitionConnection for TestPartition {
    async fn unary(
        &self,
        request: PrimitiveRequest,
        cancel: &CancellationToken,
    ) -> Result<PrimitiveResponse, TransportError> {
        // Cancellation drops the handler future, which also abandons any
        // queued lock waiter it holds.
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            response = self.handle_unary(request) => response,
        }
    }

    async fn open_stream(
        &self,
        request: PrimitiveRequest,
        cancel: &CancellationToken,
    ) -> Result<ResponseStream, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.handle_open_stream(request).await
    }
}

// ----------------------------------------------------------------------
// State helpers
// ----------------------------------------------------------------------

impl PartitionState {
    fn register_session(&mut self, name: PrimitiveName, timeout_ms: u64) -> u64 {
        self.next_session_id += 1;
        let session_id = self.next_session_id;
        self.sessions.insert(
            session_id,
            SessionRecord {
                name,
                timeout: Duration::from_millis(timeout_ms.max(1)),
                refreshed_at: Instant::now(),
                streams: Vec::new(),
            },
        );
        session_id
    }

    /// Validate and refresh a session; `Some` carries the expired response.
    fn check_session(&mut self, session_id: u64, now: Instant, index: u64) -> Option<PrimitiveResponse> {
        match self.sessions.get_mut(&session_id) {
            None => Some(expired_response(session_id, index)),
            Some(record) => {
                if now.duration_since(record.refreshed_at) > record.timeout {
                    self.sessions.remove(&session_id);
                    Some(expired_response(session_id, index))
                } else {
                    record.refreshed_at = now;
                    None
                }
            }
        }
    }
}

fn grant_waiters(lock: &mut LockState) {
    while lock.holder.is_none() {
        let Some(waiter) = lock.queue.pop_front() else { break };
        lock.last_version += 1;
        let version = lock.last_version;
        if waiter.tx.send(version).is_ok() {
            lock.holder = Some(LockHolder {
                session_id: waiter.session_id,
                version,
            });
        } else {
            // Waiter gave up; its version is burned, try the next.
        }
    }
}

fn emit_event(
    sessions: &mut HashMap<u64, SessionRecord>,
    name: &PrimitiveName,
    index: u64,
    gap: bool,
    payload: &ResponsePayload,
) {
    for (session_id, record) in sessions.iter_mut() {
        if record.name != *name {
            continue;
        }
        let session_id = *session_id;
        record.streams.retain_mut(|stream| {
            if gap {
                stream.next_response_id += 1;
            }
            let response = PrimitiveResponse {
                header: ResponseHeader {
                    session_id,
                    stream_id: stream.stream_id,
                    response_id: stream.next_response_id,
                    index,
                    status: ResponseStatus::Ok,
                },
                payload: payload.clone(),
            };
            stream.next_response_id += 1;
            match stream.tx.try_send(Ok(response)) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
                Err(mpsc::error::TrySendError::Full(_)) => true,
            }
        });
    }
}

fn value_state<'a>(
    primitives: &'a mut HashMap<PrimitiveName, PrimitiveState>,
    name: &PrimitiveName,
) -> Result<&'a mut ValueState, String> {
    match primitives.entry(name.clone()).or_insert_with(|| PrimitiveState::Value(ValueState::default())) {
        PrimitiveState::Value(state) => Ok(state),
        _ => Err(format!("{name} is not a value")),
    }
}

fn counter_state<'a>(
    primitives: &'a mut HashMap<PrimitiveName, PrimitiveState>,
    name: &PrimitiveName,
) -> Result<&'a mut i64, String> {
    match primitives.entry(name.clone()).or_insert_with(|| PrimitiveState::Counter(0)) {
        PrimitiveState::Counter(state) => Ok(state),
        _ => Err(format!("{name} is not a counter")),
    }
}

fn lock_state<'a>(
    primitives: &'a mut HashMap<PrimitiveName, PrimitiveState>,
    name: &PrimitiveName,
) -> Result<&'a mut LockState, String> {
    match primitives.entry(name.clone()).or_insert_with(|| PrimitiveState::Lock(LockState::default())) {
        PrimitiveState::Lock(state) => Ok(state),
        _ => Err(format!("{name} is not a lock")),
    }
}

fn election_state<'a>(
    primitives: &'a mut HashMap<PrimitiveName, PrimitiveState>,
    name: &PrimitiveName,
) -> Result<&'a mut ElectionState, String> {
    match primitives.entry(name.clone()).or_insert_with(|| PrimitiveState::Election(ElectionState::default())) {
        PrimitiveState::Election(state) => Ok(state),
        _ => Err(format!("{name} is not an election")),
    }
}

fn set_state<'a>(
    primitives: &'a mut HashMap<PrimitiveName, PrimitiveState>,
    name: &PrimitiveName,
) -> Result<&'a mut HashSet<String>, String> {
    match primitives.entry(name.clone()).or_insert_with(|| PrimitiveState::Set(HashSet::new())) {
        PrimitiveState::Set(state) => Ok(state),
        _ => Err(format!("{name} is not a set")),
    }
}

fn map_state<'a>(
    primitives: &'a mut HashMap<PrimitiveName, PrimitiveState>,
    name: &PrimitiveName,
) -> Result<&'a mut MapState, String> {
    match primitives.entry(name.clone()).or_insert_with(|| PrimitiveState::Map(MapState::default())) {
        PrimitiveState::Map(state) => Ok(state),
        _ => Err(format!("{name} is not a map")),
    }
}

fn term_info(election: &ElectionState) -> TermInfo {
    TermInfo {
        term: election.term,
        leader: election.candidates.first().cloned(),
        candidates: election.candidates.clone(),
    }
}

fn ok_response(session_id: u64, index: u64, payload: ResponsePayload) -> PrimitiveResponse {
    PrimitiveResponse {
        header: ResponseHeader::unary(session_id, index),
        payload,
    }
}

fn error_response(session_id: u64, index: u64, message: String) -> PrimitiveResponse {
    PrimitiveResponse {
        header: ResponseHeader {
            session_id,
            stream_id: 0,
            response_id: 0,
            index,
            status: ResponseStatus::Error,
        },
        payload: ResponsePayload::Error { message },
    }
}

fn expired_response(session_id: u64, index: u64) -> PrimitiveResponse {
    PrimitiveResponse {
        header: ResponseHeader {
            session_id,
            stream_id: 0,
            response_id: 0,
            index,
            status: ResponseStatus::SessionExpired,
        },
        payload: ResponsePayload::Error {
            message: "session expired".to_string(),
        },
    }
}
