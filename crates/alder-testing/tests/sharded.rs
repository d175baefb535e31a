//! Sharded set and map behavior: key routing, aggregates, broadcast,
//! multiplexed watches.

use std::collections::HashSet;

use alder_client::CancellationToken;
use alder_client::ClientError;
use alder_client::Primitive;
use alder_client::PrimitiveName;
use alder_client::partition_index;
use alder_testing::TestCluster;

#[tokio::test]
async fn test_set_routes_elements_by_partitioner() {
    let cluster = TestCluster::new(3);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let set = client.get_set("routing").await.unwrap();

    for value in ["x", "y", "z"] {
        assert!(set.add(value, &cancel).await.unwrap());
    }

    let name = PrimitiveName::new("default", "routing");
    for value in ["x", "y", "z"] {
        let owner = partition_index(value, 3).unwrap();
        for partition in 0..3 {
            let elements = cluster.partition(partition).set_elements(&name).await;
            let present = elements.iter().any(|element| element == value);
            assert_eq!(
                present,
                partition == owner,
                "{value} must live only on partition {owner}"
            );
        }
    }

    assert_eq!(set.size(&cancel).await.unwrap(), 3);
}

#[tokio::test]
async fn test_add_then_contains() {
    let cluster = TestCluster::new(3);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let set = client.get_set("members").await.unwrap();

    assert!(set.add("alice", &cancel).await.unwrap());
    assert!(!set.add("alice", &cancel).await.unwrap(), "second add reports existing element");
    assert!(set.contains("alice", &cancel).await.unwrap());
    assert!(!set.contains("bob", &cancel).await.unwrap());

    assert!(set.remove("alice", &cancel).await.unwrap());
    assert!(!set.remove("alice", &cancel).await.unwrap());
    assert!(!set.contains("alice", &cancel).await.unwrap());
}

#[tokio::test]
async fn test_single_partition_set_behaves_the_same() {
    let cluster = TestCluster::new(1);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let set = client.get_set("solo").await.unwrap();

    for i in 0..10 {
        assert!(set.add(format!("element-{i}"), &cancel).await.unwrap());
    }
    assert_eq!(set.size(&cancel).await.unwrap(), 10);
    assert!(!set.is_empty(&cancel).await.unwrap());

    set.clear(&cancel).await.unwrap();
    assert_eq!(set.size(&cancel).await.unwrap(), 0);
    assert!(set.is_empty(&cancel).await.unwrap());
}

#[tokio::test]
async fn test_size_sums_partition_slices() {
    let cluster = TestCluster::new(4);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let set = client.get_set("census").await.unwrap();

    for i in 0..40 {
        set.add(format!("member-{i}"), &cancel).await.unwrap();
    }
    assert_eq!(set.size(&cancel).await.unwrap(), 40);

    let name = PrimitiveName::new("default", "census");
    let mut per_partition = 0;
    for partition in 0..4 {
        per_partition += cluster.partition(partition).set_elements(&name).await.len() as u64;
    }
    assert_eq!(per_partition, 40);
}

#[tokio::test]
async fn test_clear_fails_fast_on_failing_partition() {
    let cluster = TestCluster::new(4);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let set = client.get_set("fragile").await.unwrap();

    for i in 0..20 {
        set.add(format!("item-{i}"), &cancel).await.unwrap();
    }

    cluster.partition(2).fail_requests(true);
    let result = set.clear(&cancel).await;
    assert!(matches!(result, Err(ClientError::Transport(_))), "first partition error must surface");

    // Surviving partitions accept operations again once the fault clears.
    cluster.partition(2).fail_requests(false);
    set.clear(&cancel).await.unwrap();
    assert_eq!(set.size(&cancel).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_token_aborts_sharded_operation() {
    let cluster = TestCluster::new(3);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let set = client.get_set("interrupted").await.unwrap();

    set.add("kept", &cancel).await.unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let result = set.clear(&cancelled).await;
    assert!(matches!(result, Err(ClientError::Cancelled)));

    // The sessions stay open and the element is still there.
    assert_eq!(set.size(&cancel).await.unwrap(), 1);
}

#[tokio::test]
async fn test_sharded_watch_multiplexes_all_partitions() {
    let cluster = TestCluster::new(3);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let set = client.get_set("feed").await.unwrap();

    let mut events = set.watch(&cancel).await.unwrap();

    let values: Vec<String> = (0..9).map(|i| format!("event-{i}")).collect();
    for value in &values {
        set.add(value.clone(), &cancel).await.unwrap();
    }

    let mut seen = HashSet::new();
    for _ in 0..values.len() {
        let event = events.next().await.unwrap().unwrap();
        seen.insert(event.value);
    }
    let expected: HashSet<String> = values.into_iter().collect();
    assert_eq!(seen, expected, "every partition's events must reach the one consumer");
}

#[tokio::test]
async fn test_dropping_merged_watch_releases_every_partition_stream() {
    let cluster = TestCluster::new(3);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let set = client.get_set("released").await.unwrap();

    let events = set.watch(&cancel).await.unwrap();
    let mut open = 0;
    for partition in 0..3 {
        open += cluster.partition(partition).stream_count().await;
    }
    assert_eq!(open, 3);

    // The consumer walks away without any event ever flowing; every
    // per-partition stream must still wind down.
    drop(events);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    // One write per partition so each server notices its dead stream.
    let mut covered = [false; 3];
    let mut i = 0;
    while covered.iter().any(|hit| !hit) {
        let value = format!("wake-{i}");
        let owner = partition_index(&value, 3).unwrap();
        if !covered[owner] {
            set.add(value, &cancel).await.unwrap();
            covered[owner] = true;
        }
        i += 1;
    }
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let mut open = 0;
    for partition in 0..3 {
        open += cluster.partition(partition).stream_count().await;
    }
    assert_eq!(open, 0, "abandoned per-partition streams must be released");
}

#[tokio::test]
async fn test_map_put_get_remove() {
    let cluster = TestCluster::new(3);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let map = client.get_map("profiles").await.unwrap();

    let version = map.put("alice", b"admin".to_vec(), &cancel).await.unwrap();
    let entry = map.get("alice", &cancel).await.unwrap().unwrap();
    assert_eq!(entry.value, b"admin");
    assert_eq!(entry.version, version);

    let removed = map.remove("alice", &cancel).await.unwrap().unwrap();
    assert_eq!(removed.value, b"admin");
    assert!(map.get("alice", &cancel).await.unwrap().is_none());
    assert!(map.remove("alice", &cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn test_map_conditional_put() {
    let cluster = TestCluster::new(2);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let map = client.get_map("versioned").await.unwrap();

    let v1 = map.put("key", b"one".to_vec(), &cancel).await.unwrap();
    let v2 = map.put_if_version("key", b"two".to_vec(), v1, &cancel).await.unwrap();
    assert!(v2 > v1);

    let result = map.put_if_version("key", b"three".to_vec(), v1, &cancel).await;
    assert!(matches!(result, Err(ClientError::VersionMismatch)));

    let entry = map.get("key", &cancel).await.unwrap().unwrap();
    assert_eq!(entry.value, b"two");
    assert_eq!(entry.version, v2);
}

#[tokio::test]
async fn test_map_aggregates_span_partitions() {
    let cluster = TestCluster::new(3);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let map = client.get_map("inventory").await.unwrap();

    for i in 0..12 {
        map.put(format!("sku-{i}"), vec![i as u8], &cancel).await.unwrap();
    }

    assert_eq!(map.size(&cancel).await.unwrap(), 12);
    assert!(!map.is_empty(&cancel).await.unwrap());

    let mut keys = map.keys(&cancel).await.unwrap();
    keys.sort();
    let mut expected: Vec<String> = (0..12).map(|i| format!("sku-{i}")).collect();
    expected.sort();
    assert_eq!(keys, expected);

    let entries = map.entries(&cancel).await.unwrap();
    assert_eq!(entries.len(), 12);

    map.clear(&cancel).await.unwrap();
    assert!(map.is_empty(&cancel).await.unwrap());
}

#[tokio::test]
async fn test_sharded_close_closes_every_partition_session() {
    let cluster = TestCluster::new(3);
    let client = cluster.client().unwrap();
    let cancel = CancellationToken::new();
    let set = client.get_set("ephemeral").await.unwrap();

    for partition in 0..3 {
        assert_eq!(cluster.partition(partition).session_count().await, 1);
    }

    set.close().await.unwrap();
    for partition in 0..3 {
        assert_eq!(cluster.partition(partition).session_count().await, 0);
    }

    let result = set.add("late", &cancel).await;
    assert!(matches!(result, Err(ClientError::SessionClosed)));
}
