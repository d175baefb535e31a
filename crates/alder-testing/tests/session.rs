//! Session protocol behavior: expiry, keep-alives, ordering defenses,
//! lifecycle.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use alder_api::PrimitiveRequest;
use alder_api::PrimitiveResponse;
use alder_api::RequestPayload;
use alder_api::ResponseHeader;
use alder_api::ResponsePayload;
use alder_api::ValueRequest;
use alder_api::ValueResponse;
use alder_client::CancellationToken;
use alder_client::ClientError;
use alder_client::CoordinationClient;
use alder_client::Primitive;
use alder_client::SessionOptions;
use alder_testing::TestCluster;
use alder_transport::PartitionConnection;
use alder_transport::ResponseStream;
use alder_transport::TransportError;
use async_trait::async_trait;

fn short_session() -> SessionOptions {
    SessionOptions::default().with_session_timeout(Duration::from_millis(200))
}

#[tokio::test]
async fn test_session_expires_without_keep_alives() {
    let cluster = TestCluster::new(1);
    let client = cluster.client_with_options(short_session()).unwrap();
    let cancel = CancellationToken::new();
    let value = client.get_value("mortal").await.unwrap();

    value.set(b"before".to_vec(), &cancel).await.unwrap();

    cluster.partition(0).drop_keep_alives(true);
    tokio::time::sleep(Duration::from_millis(600)).await;

    let result = value.set(b"after".to_vec(), &cancel).await;
    assert!(matches!(result, Err(ClientError::SessionExpired)));

    // Terminal: later operations keep failing fast.
    let result = value.get(&cancel).await;
    assert!(matches!(result, Err(ClientError::SessionExpired)));
}

#[tokio::test]
async fn test_keep_alives_sustain_an_idle_session() {
    let cluster = TestCluster::new(1);
    let options = SessionOptions::default()
        .with_session_timeout(Duration::from_millis(300))
        .with_keep_alive(Duration::from_millis(50));
    let client = cluster.client_with_options(options).unwrap();
    let cancel = CancellationToken::new();
    let value = client.get_value("durable").await.unwrap();

    // Idle for several timeout windows; keep-alives must hold the session.
    tokio::time::sleep(Duration::from_millis(900)).await;

    let version = value.set(b"still here".to_vec(), &cancel).await.unwrap();
    assert_eq!(version, 1);
}

#[tokio::test]
async fn test_expiry_terminates_watch_streams() {
    let cluster = TestCluster::new(1);
    let client = cluster.client_with_options(short_session()).unwrap();
    let cancel = CancellationToken::new();
    let value = client.get_value("watched").await.unwrap();

    let mut events = value.watch(&cancel).await.unwrap();
    value.set(b"v1".to_vec(), &cancel).await.unwrap();
    assert_eq!(events.next().await.unwrap().unwrap().value, b"v1");

    cluster.partition(0).drop_keep_alives(true);
    tokio::time::sleep(Duration::from_millis(600)).await;

    match events.next().await {
        Some(Err(ClientError::SessionExpired)) | None => {}
        other => panic!("expected expiry or end of stream, got {other:?}"),
    }
}

#[tokio::test]
async fn test_index_advances_monotonically_across_commands() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let value = client.get_value("ordered").await.unwrap();

    let mut previous = cluster.partition(0).index();
    for i in 0..5 {
        value.set(format!("v{i}").into_bytes(), &cancel).await.unwrap();
        let current = cluster.partition(0).index();
        assert!(current > previous, "index must advance with each command");
        previous = current;
    }
}

#[tokio::test]
async fn test_open_failure_surfaces_as_session_open_failed() {
    let cluster = TestCluster::new(1);
    cluster.partition(0).fail_requests(true);
    let client = cluster.client().unwrap();

    let result = client.get_value("unreachable").await;
    assert!(matches!(result, Err(ClientError::SessionOpenFailed { .. })));
}

// ----------------------------------------------------------------------
// Scripted connections for defensive-invariant coverage
// ----------------------------------------------------------------------

/// Connection that answers a value session with deliberately regressing
/// indexes: create reports index 10, every later response index 5.
struct RegressingConnection;

#[async_trait]
impl PartitionConnection for RegressingConnection {
    async fn unary(
        &self,
        request: PrimitiveRequest,
        _cancel: &CancellationToken,
    ) -> Result<PrimitiveResponse, TransportError> {
        let (index, payload) = match request.payload {
            RequestPayload::Value(ValueRequest::Create { timeout_ms }) => (
                10,
                ResponsePayload::Value(ValueResponse::Created {
                    session_timeout_ms: timeout_ms,
                }),
            ),
            RequestPayload::Value(ValueRequest::KeepAlive) => {
                (5, ResponsePayload::Value(ValueResponse::KeepAlive))
            }
            RequestPayload::Value(ValueRequest::Close { .. }) => {
                (5, ResponsePayload::Value(ValueResponse::Closed))
            }
            _ => (
                5,
                ResponsePayload::Value(ValueResponse::Set {
                    succeeded: true,
                    version: 1,
                }),
            ),
        };
        Ok(PrimitiveResponse {
            header: ResponseHeader::unary(1, index),
            payload,
        })
    }

    async fn open_stream(
        &self,
        _request: PrimitiveRequest,
        _cancel: &CancellationToken,
    ) -> Result<ResponseStream, TransportError> {
        Err(TransportError::Connection {
            reason: "streams not scripted".to_string(),
        })
    }
}

#[tokio::test]
async fn test_regressing_index_is_rejected_as_out_of_order() {
    let client = CoordinationClient::new(vec![Arc::new(RegressingConnection)], SessionOptions::default()).unwrap();
    let cancel = CancellationToken::new();
    let value = client.get_value("suspect").await.unwrap();

    let result = value.set(b"x".to_vec(), &cancel).await;
    assert!(matches!(result, Err(ClientError::OutOfOrder { last: 10, received: 5 })));
}

/// Connection that counts unary calls, to observe that a closed session
/// transmits nothing further.
struct CountingConnection {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl PartitionConnection for CountingConnection {
    async fn unary(
        &self,
        request: PrimitiveRequest,
        _cancel: &CancellationToken,
    ) -> Result<PrimitiveResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let payload = match request.payload {
            RequestPayload::Value(ValueRequest::Create { timeout_ms }) => {
                ResponsePayload::Value(ValueResponse::Created {
                    session_timeout_ms: timeout_ms,
                })
            }
            RequestPayload::Value(ValueRequest::KeepAlive) => ResponsePayload::Value(ValueResponse::KeepAlive),
            RequestPayload::Value(ValueRequest::Close { .. }) => ResponsePayload::Value(ValueResponse::Closed),
            _ => ResponsePayload::Value(ValueResponse::Set {
                succeeded: true,
                version: 1,
            }),
        };
        Ok(PrimitiveResponse {
            header: ResponseHeader::unary(1, self.calls.load(Ordering::SeqCst) as u64),
            payload,
        })
    }

    async fn open_stream(
        &self,
        _request: PrimitiveRequest,
        _cancel: &CancellationToken,
    ) -> Result<ResponseStream, TransportError> {
        Err(TransportError::Connection {
            reason: "streams not scripted".to_string(),
        })
    }
}

#[tokio::test]
async fn test_no_rpc_transmitted_after_close() {
    let calls = Arc::new(AtomicUsize::new(0));
    let connection = Arc::new(CountingConnection { calls: calls.clone() });
    let client = CoordinationClient::new(vec![connection], SessionOptions::default()).unwrap();
    let cancel = CancellationToken::new();

    let value = client.get_value("quiet").await.unwrap();
    value.set(b"x".to_vec(), &cancel).await.unwrap();
    value.close().await.unwrap();
    let after_close = calls.load(Ordering::SeqCst);
    assert_eq!(after_close, 3, "create, set, close");

    assert!(matches!(value.set(b"y".to_vec(), &cancel).await, Err(ClientError::SessionClosed)));
    assert!(matches!(value.get(&cancel).await, Err(ClientError::SessionClosed)));
    value.close().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), after_close, "closed session must stay silent");
}

#[tokio::test]
async fn test_cancelled_call_does_not_transmit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let connection = Arc::new(CountingConnection { calls: calls.clone() });
    let client = CoordinationClient::new(vec![connection], SessionOptions::default()).unwrap();

    let value = client.get_value("quiet").await.unwrap();
    let after_open = calls.load(Ordering::SeqCst);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let result = value.set(b"x".to_vec(), &cancelled).await;
    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), after_open, "a pre-cancelled call must not be sent");
}
