//! In-process [`KvStore`]. Used by tests and by `storage.backend = "memory"`.
//!
//! Expiry uses `tokio::time::Instant`, so a paused test clock drives it.

use crate::store::{resolve_range, KvStore};
use async_trait::async_trait;
use quibble_core::StorageError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

fn evict_expired(map: &mut HashMap<String, Entry>, key: &str) {
    let now = Instant::now();
    if map.get(key).is_some_and(|e| !e.is_live(now)) {
        map.remove(key);
    }
}

/// Drop `key` if it has expired, then hand back the live entry.
fn live<'a>(map: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    evict_expired(map, key);
    map.get_mut(key)
}

/// Live entry for `key`, created with `empty` when absent.
fn live_or_insert<'a>(
    map: &'a mut HashMap<String, Entry>,
    key: &str,
    empty: impl FnOnce() -> Value,
) -> &'a mut Entry {
    evict_expired(map, key);
    map.entry(key.to_string()).or_insert_with(|| Entry {
        value: empty(),
        expires_at: None,
    })
}

fn wrong_type(key: &str, expected: &'static str) -> StorageError {
    StorageError::WrongType {
        key: key.to_string(),
        expected,
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_open()?;
        let mut map = self.entries.lock().await;
        match live(&mut map, key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key, "string")),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        self.ensure_open()?;
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.ensure_open()?;
        let mut map = self.entries.lock().await;
        let existed = live(&mut map, key).is_some();
        map.remove(key);
        Ok(existed)
    }

    async fn increment(&self, key: &str) -> Result<i64, StorageError> {
        self.ensure_open()?;
        let mut map = self.entries.lock().await;
        let entry = live_or_insert(&mut map, key, || Value::Str("0".to_string()));
        match &mut entry.value {
            Value::Str(s) => {
                let n: i64 = s.trim().parse().map_err(|_| StorageError::Corrupt {
                    key: key.to_string(),
                    reason: format!("'{}' is not an integer", s),
                })?;
                let next = n + 1;
                *s = next.to_string();
                Ok(next)
            }
            _ => Err(wrong_type(key, "integer")),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        self.ensure_open()?;
        let mut map = self.entries.lock().await;
        match live(&mut map, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let mut map = self.entries.lock().await;
        let entry = live_or_insert(&mut map, key, || Value::List(VecDeque::new()));
        match &mut entry.value {
            Value::List(items) => {
                items.push_front(value.to_string());
                Ok(items.len())
            }
            _ => Err(wrong_type(key, "list")),
        }
    }

    async fn list_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, StorageError> {
        self.ensure_open()?;
        let mut map = self.entries.lock().await;
        match live(&mut map, key) {
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(match resolve_range(items.len(), start, stop) {
                Some((from, to)) => items.range(from..=to).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(wrong_type(key, "list")),
            None => Ok(Vec::new()),
        }
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut map = self.entries.lock().await;
        let emptied = match live(&mut map, key) {
            Some(Entry {
                value: Value::List(items),
                ..
            }) => {
                match resolve_range(items.len(), start, stop) {
                    Some((from, to)) => {
                        items.truncate(to + 1);
                        items.drain(..from);
                    }
                    None => items.clear(),
                }
                items.is_empty()
            }
            Some(_) => return Err(wrong_type(key, "list")),
            None => false,
        };
        if emptied {
            map.remove(key);
        }
        Ok(())
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut map = self.entries.lock().await;
        let entry = live_or_insert(&mut map, key, || Value::Hash(BTreeMap::new()));
        match &mut entry.value {
            Value::Hash(hash) => {
                hash.extend(fields.iter().cloned());
                Ok(())
            }
            _ => Err(wrong_type(key, "hash")),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StorageError> {
        self.ensure_open()?;
        let mut map = self.entries.lock().await;
        match live(&mut map, key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key, "hash")),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn purge_expired(&self) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut map = self.entries.lock().await;
        let before = map.len();
        map.retain(|_, e| e.is_live(now));
        Ok(before - map.len())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("a", "1", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.expire("k", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_from_missing() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("c").await.unwrap(), 1);
        assert_eq!(store.increment("c").await.unwrap(), 2);
        store.set("s", "nope", None).await.unwrap();
        assert!(matches!(
            store.increment("s").await,
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_push_range_trim() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.list_push("l", &i.to_string()).await.unwrap();
        }
        assert_eq!(
            store.list_range("l", 0, -1).await.unwrap(),
            vec!["4", "3", "2", "1", "0"]
        );
        store.list_trim("l", 0, 2).await.unwrap();
        assert_eq!(store.list_range("l", 0, -1).await.unwrap(), vec!["4", "3", "2"]);
        assert_eq!(store.list_range("l", 1, 1).await.unwrap(), vec!["3"]);
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.list_push("l", "x").await.unwrap();
        assert!(matches!(
            store.get("l").await,
            Err(StorageError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_hash_merge() {
        let store = MemoryStore::new();
        store
            .hash_set("h", &[("a".into(), "1".into()), ("b".into(), "2".into())])
            .await
            .unwrap();
        store.hash_set("h", &[("b".into(), "3".into())]).await.unwrap();
        let all = store.hash_get_all("h").await.unwrap();
        assert_eq!(all.get("a").map(String::as_str), Some("1"));
        assert_eq!(all.get("b").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn test_closed_store_refuses() {
        let store = MemoryStore::new();
        store.close().await.unwrap();
        assert!(matches!(store.get("a").await, Err(StorageError::Closed)));
    }
}
