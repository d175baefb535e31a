//! Counter, lock, and leader election behavior.

use std::time::Duration;

use alder_client::CancellationToken;
use alder_client::ClientError;
use alder_client::Primitive;
use alder_testing::TestCluster;

#[tokio::test]
async fn test_counter_arithmetic() {
    let cluster = TestCluster::new(3);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let counter = client.get_counter("hits").await.unwrap();

    assert_eq!(counter.get(&cancel).await.unwrap(), 0);
    assert_eq!(counter.increment(5, &cancel).await.unwrap(), 5);
    assert_eq!(counter.increment(3, &cancel).await.unwrap(), 8);
    assert_eq!(counter.decrement(10, &cancel).await.unwrap(), -2);

    counter.set(100, &cancel).await.unwrap();
    assert_eq!(counter.get(&cancel).await.unwrap(), 100);
}

#[tokio::test]
async fn test_lock_fencing_versions() {
    let cluster = TestCluster::new(2);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let lock = client.get_lock("leaser").await.unwrap();

    assert!(!lock.is_locked(&cancel).await.unwrap());
    let v1 = lock.lock(&cancel).await.unwrap();
    assert_eq!(v1, 1);
    assert!(lock.is_locked(&cancel).await.unwrap());
    assert!(lock.is_locked_version(v1, &cancel).await.unwrap());
    assert!(!lock.is_locked_version(v1 + 1, &cancel).await.unwrap());

    lock.unlock(v1, &cancel).await.unwrap();
    assert!(!lock.is_locked(&cancel).await.unwrap());

    // Releasing without holding is an error.
    let result = lock.unlock(v1, &cancel).await;
    assert!(matches!(result, Err(ClientError::NotLocked)));

    // Fencing versions never repeat.
    let v2 = lock.lock(&cancel).await.unwrap();
    assert!(v2 > v1);
    lock.unlock(v2, &cancel).await.unwrap();
}

#[tokio::test]
async fn test_try_lock_contention() {
    let cluster = TestCluster::new(2);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();

    let first = client.get_lock("gate").await.unwrap();
    let second = client.get_lock("gate").await.unwrap();

    let version = first.try_lock(&cancel).await.unwrap().expect("uncontended lock");
    assert!(second.try_lock(&cancel).await.unwrap().is_none(), "held lock must not be re-granted");

    first.unlock(version, &cancel).await.unwrap();
    assert!(second.try_lock(&cancel).await.unwrap().is_some());
}

#[tokio::test]
async fn test_blocking_lock_hands_off_on_release() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();

    let first = client.get_lock("baton").await.unwrap();
    let second = client.get_lock("baton").await.unwrap();

    let v1 = first.lock(&cancel).await.unwrap();
    let waiter_cancel = CancellationToken::new();
    let waiter = tokio::spawn(async move {
        let version = second.lock(&waiter_cancel).await.unwrap();
        (second, version)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    first.unlock(v1, &cancel).await.unwrap();

    let (second, v2) = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
    assert!(v2 > v1, "handed-off acquisition must carry a later fencing version");
    second.unlock(v2, &cancel).await.unwrap();
}

#[tokio::test]
async fn test_cancelling_a_blocked_lock_wait() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();

    let first = client.get_lock("patience").await.unwrap();
    let second = client.get_lock("patience").await.unwrap();

    let v1 = first.lock(&cancel).await.unwrap();

    let wait_cancel = CancellationToken::new();
    let trigger = wait_cancel.clone();
    let waiter = tokio::spawn(async move {
        let result = second.lock(&wait_cancel).await;
        (second, result)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.cancel();

    let (second, result) = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
    assert!(matches!(result, Err(ClientError::Cancelled)), "cancelled wait must abort, got {result:?}");

    // Only the wait was aborted; the session keeps working.
    assert!(second.try_lock(&cancel).await.unwrap().is_none(), "first holder still owns the lock");
    first.unlock(v1, &cancel).await.unwrap();
    assert!(second.try_lock(&cancel).await.unwrap().is_some());
}

#[tokio::test]
async fn test_lock_timeout_gives_up() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();

    let first = client.get_lock("slow").await.unwrap();
    let second = client.get_lock("slow").await.unwrap();

    let version = first.lock(&cancel).await.unwrap();
    let waited = second.lock_timeout(Duration::from_millis(100), &cancel).await.unwrap();
    assert!(waited.is_none(), "timed-out wait must not acquire");
    first.unlock(version, &cancel).await.unwrap();
}

#[tokio::test]
async fn test_closing_session_releases_its_lock() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();

    let first = client.get_lock("orphan").await.unwrap();
    let second = client.get_lock("orphan").await.unwrap();

    first.lock(&cancel).await.unwrap();
    first.close().await.unwrap();

    let version = second.try_lock(&cancel).await.unwrap();
    assert!(version.is_some(), "closed session's hold must be released");
}

#[tokio::test]
async fn test_election_terms_and_leadership() {
    let cluster = TestCluster::new(2);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let election = client.get_election("controller").await.unwrap();

    let term = election.enter("node-a", &cancel).await.unwrap();
    assert_eq!(term.term, 1);
    assert_eq!(term.leader.as_deref(), Some("node-a"));

    let term = election.enter("node-b", &cancel).await.unwrap();
    assert_eq!(term.term, 1, "a follower joining does not change leadership");
    assert_eq!(term.leader.as_deref(), Some("node-a"));
    assert_eq!(term.candidates, vec!["node-a".to_string(), "node-b".to_string()]);

    let term = election.leave("node-a", &cancel).await.unwrap();
    assert_eq!(term.term, 2, "leader leaving starts a new term");
    assert_eq!(term.leader.as_deref(), Some("node-b"));

    let term = election.get_term(&cancel).await.unwrap();
    assert_eq!(term.term, 2);
    assert_eq!(term.candidates, vec!["node-b".to_string()]);
}

#[tokio::test]
async fn test_election_watch_observes_leadership_changes() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let election = client.get_election("observer").await.unwrap();

    let mut events = election.watch(&cancel).await.unwrap();

    election.enter("node-a", &cancel).await.unwrap();
    election.enter("node-b", &cancel).await.unwrap();
    election.leave("node-a", &cancel).await.unwrap();

    let event = events.next().await.unwrap().unwrap();
    assert_eq!(event.term.leader.as_deref(), Some("node-a"));

    let event = events.next().await.unwrap().unwrap();
    assert_eq!(event.term.candidates.len(), 2);

    let event = events.next().await.unwrap().unwrap();
    assert_eq!(event.term.term, 2);
    assert_eq!(event.term.leader.as_deref(), Some("node-b"));
}
