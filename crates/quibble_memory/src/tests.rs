use crate::profile_store::ProfileStore;
use crate::sqlite::SqliteStore;
use crate::store::KvStore;
use quibble_core::{InteractionRecord, StorageError};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

async fn temp_store(dir: &tempfile::TempDir) -> SqliteStore {
    SqliteStore::new(dir.path().join("test.db"))
        .await
        .expect("Failed to open store")
}

#[tokio::test]
async fn test_string_ops() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = temp_store(&dir).await;

    assert_eq!(store.get("missing").await.unwrap(), None);
    store.set("k", "v1", None).await.unwrap();
    store.set("k", "v2", None).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

    assert!(store.delete("k").await.unwrap());
    assert!(!store.delete("k").await.unwrap());
}

#[tokio::test]
async fn test_in_memory_database() {
    let store = SqliteStore::new(":memory:").await.expect("Failed to open store");
    store.set("k", "v", None).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn test_ttl_and_purge() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = temp_store(&dir).await;

    store.set("short", "x", Some(Duration::ZERO)).await.unwrap();
    store.set("long", "y", Some(Duration::from_secs(3600))).await.unwrap();
    store.set("forever", "z", None).await.unwrap();

    assert_eq!(store.get("short").await.unwrap(), None);
    assert!(!store.expire("short", Duration::from_secs(60)).await.unwrap());
    assert_eq!(store.get("long").await.unwrap().as_deref(), Some("y"));

    assert_eq!(store.purge_expired().await.unwrap(), 1);
    assert!(store.expire("forever", Duration::ZERO).await.unwrap());
    assert_eq!(store.get("forever").await.unwrap(), None);
}

#[tokio::test]
async fn test_increment_keeps_ttl() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = temp_store(&dir).await;

    assert_eq!(store.increment("n").await.unwrap(), 1);
    assert_eq!(store.increment("n").await.unwrap(), 2);
    store.expire("n", Duration::ZERO).await.unwrap();
    // Expired counters restart from zero
    assert_eq!(store.increment("n").await.unwrap(), 1);
}

#[tokio::test]
async fn test_lists_and_hashes() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = temp_store(&dir).await;

    for i in 0..4 {
        store.list_push("l", &format!("item{}", i)).await.unwrap();
    }
    assert_eq!(
        store.list_range("l", 0, 1).await.unwrap(),
        vec!["item3", "item2"]
    );
    store.list_trim("l", 0, 2).await.unwrap();
    assert_eq!(store.list_range("l", 0, -1).await.unwrap().len(), 3);
    store.list_trim("l", 5, 10).await.unwrap();
    assert!(store.list_range("l", 0, -1).await.unwrap().is_empty());

    store
        .hash_set("h", &[("a".into(), "1".into())])
        .await
        .unwrap();
    store
        .hash_set("h", &[("b".into(), "2".into())])
        .await
        .unwrap();
    assert_eq!(store.hash_get_all("h").await.unwrap().len(), 2);

    assert!(matches!(
        store.list_push("h", "x").await,
        Err(StorageError::WrongType { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_increments() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(temp_store(&dir).await);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let s = store.clone();
        handles.push(tokio::spawn(async move { s.increment("c").await.unwrap() }));
    }
    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(store.get("c").await.unwrap().as_deref(), Some("20"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mixed_writers() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(temp_store(&dir).await);

    let mut handles = Vec::new();
    for task in 0..8 {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            let mut failures = Vec::new();
            for i in 0..200 {
                let result = if task % 2 == 0 {
                    s.set(&format!("user:{}", task), &i.to_string(), Some(Duration::from_secs(60)))
                        .await
                } else {
                    let key = format!("history:{}", task);
                    s.list_push(&key, &i.to_string()).await.map(|_| ())
                };
                if let Err(e) = result {
                    failures.push(e.to_string());
                }
                if i % 50 == 0 {
                    let _ = s.get(&format!("user:{}", task)).await;
                }
            }
            failures
        }));
    }

    for h in handles {
        let failures = h.await.unwrap();
        assert!(failures.is_empty(), "writes failed: {:?}", failures.first());
    }
    for task in (1..8).step_by(2) {
        let items = store
            .list_range(&format!("history:{}", task), 0, -1)
            .await
            .unwrap();
        assert_eq!(items.len(), 200);
        assert_eq!(items[0], "199");
    }
    assert_eq!(store.get("user:0").await.unwrap().as_deref(), Some("199"));
}

#[tokio::test]
async fn test_close_then_use() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = temp_store(&dir).await;
    store.close().await.unwrap();
    assert!(matches!(store.get("k").await, Err(StorageError::Closed)));
}

#[tokio::test]
async fn test_profiles_survive_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let ttl = Duration::from_secs(30 * 24 * 3600);

    {
        let kv: Arc<dyn KvStore> = Arc::new(temp_store(&dir).await);
        let profiles = ProfileStore::new(kv.clone(), ttl, 20);
        let topics: BTreeSet<String> = ["gaming".to_string()].into();
        profiles
            .record_interaction(
                "u1",
                InteractionRecord::new("gg", "nice", 0.6, "encouraging"),
                &topics,
            )
            .await
            .unwrap();
        kv.close().await.unwrap();
    }

    let kv: Arc<dyn KvStore> = Arc::new(temp_store(&dir).await);
    let profiles = ProfileStore::new(kv, ttl, 20);
    let p = profiles.get("u1").await;
    assert_eq!(p.total_interactions, 1);
    assert_eq!(p.preferred_topics, vec!["gaming".to_string()]);
    assert_eq!(profiles.history("u1", 5).await.unwrap().len(), 1);
}
