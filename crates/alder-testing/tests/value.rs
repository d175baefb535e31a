//! Atomic value behavior: versioned writes, watches, stream ordering.

use alder_client::CancellationToken;
use alder_client::ClientError;
use alder_client::Primitive;
use alder_client::ValueEventKind;
use alder_testing::TestCluster;

#[tokio::test]
async fn test_conditional_set_versions() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let value = client.get_value("config").await.unwrap();

    let version = value.set(b"A".to_vec(), &cancel).await.unwrap();
    assert_eq!(version, 1);

    let version = value.set_with_version(b"B".to_vec(), 1, &cancel).await.unwrap();
    assert_eq!(version, 2);

    let result = value.set_with_version(b"C".to_vec(), 1, &cancel).await;
    assert!(matches!(result, Err(ClientError::VersionMismatch)));

    let (bytes, version) = value.get(&cancel).await.unwrap();
    assert_eq!(bytes, b"B");
    assert_eq!(version, 2);
}

#[tokio::test]
async fn test_set_then_get_round_trip() {
    let cluster = TestCluster::new(3);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let value = client.get_value("greeting").await.unwrap();

    let version = value.set(b"hello".to_vec(), &cancel).await.unwrap();
    let (bytes, read_version) = value.get(&cancel).await.unwrap();
    assert_eq!(bytes, b"hello");
    assert_eq!(read_version, version);
}

#[tokio::test]
async fn test_watch_delivers_updates_in_order() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let value = client.get_value("feed").await.unwrap();

    let mut events = value.watch(&cancel).await.unwrap();
    value.set(b"v1".to_vec(), &cancel).await.unwrap();
    value.set(b"v2".to_vec(), &cancel).await.unwrap();
    value.set(b"v3".to_vec(), &cancel).await.unwrap();

    for (expected, version) in [(&b"v1"[..], 1), (&b"v2"[..], 2), (&b"v3"[..], 3)] {
        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.kind, ValueEventKind::Updated);
        assert_eq!(event.value, expected);
        assert_eq!(event.version, version);
    }
}

#[tokio::test]
async fn test_stream_gap_fails_stream_but_not_session() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let value = client.get_value("gappy").await.unwrap();

    let mut events = value.watch(&cancel).await.unwrap();
    value.set(b"v1".to_vec(), &cancel).await.unwrap();
    let first = events.next().await.unwrap().unwrap();
    assert_eq!(first.value, b"v1");

    cluster.partition(0).inject_stream_gap();
    value.set(b"v2".to_vec(), &cancel).await.unwrap();

    let failure = events.next().await.unwrap();
    assert!(matches!(failure, Err(ClientError::StreamGap { expected: 2, received: 3 })));
    assert!(events.next().await.is_none(), "stream must close after a gap");

    // The session survives the failed stream.
    let version = value.set(b"v3".to_vec(), &cancel).await.unwrap();
    assert_eq!(version, 3);
    let (bytes, _) = value.get(&cancel).await.unwrap();
    assert_eq!(bytes, b"v3");
}

#[tokio::test]
async fn test_abandoned_watch_tears_down_promptly() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let value = client.get_value("quiet").await.unwrap();

    let events = value.watch(&cancel).await.unwrap();
    assert_eq!(cluster.partition(0).stream_count().await, 1);

    // Dropping the consumer must stop the receive loop without waiting for
    // the server to push another frame; the server-side record is pruned on
    // its next (failed) delivery attempt.
    drop(events);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    value.set(b"a".to_vec(), &cancel).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(cluster.partition(0).stream_count().await, 0);

    let (bytes, _) = value.get(&cancel).await.unwrap();
    assert_eq!(bytes, b"a");
}

#[tokio::test]
async fn test_cancelled_token_aborts_a_call_without_closing_the_session() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let value = client.get_value("resilient").await.unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let result = value.set(b"never".to_vec(), &cancelled).await;
    assert!(matches!(result, Err(ClientError::Cancelled)));

    // The session is untouched by the aborted call.
    let live = CancellationToken::new();
    let version = value.set(b"still open".to_vec(), &live).await.unwrap();
    assert_eq!(version, 1);
}

#[tokio::test]
async fn test_close_is_idempotent_and_delete_after_close_fails() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let value = client.get_value("lifecycle").await.unwrap();

    value.set(b"x".to_vec(), &cancel).await.unwrap();
    value.close().await.unwrap();
    value.close().await.unwrap();

    let result = value.delete().await;
    assert!(matches!(result, Err(ClientError::SessionClosed)));

    let result = value.set(b"y".to_vec(), &cancel).await;
    assert!(matches!(result, Err(ClientError::SessionClosed)));
}

#[tokio::test]
async fn test_delete_destroys_state() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();

    let value = client.get_value("doomed").await.unwrap();
    value.set(b"payload".to_vec(), &cancel).await.unwrap();
    value.delete().await.unwrap();

    // A fresh handle sees a blank value.
    let value = client.get_value("doomed").await.unwrap();
    let (bytes, version) = value.get(&cancel).await.unwrap();
    assert!(bytes.is_empty());
    assert_eq!(version, 0);
}
