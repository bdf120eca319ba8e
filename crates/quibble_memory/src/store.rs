//! Key-value storage seam.
//!
//! Values are strings; lists and hashes are first-class so that history and
//! metrics don't need read-modify-write at the call site. Expired keys behave
//! exactly like missing ones.

use async_trait::async_trait;
use quibble_core::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Overwrite `key`. `ttl = None` keeps the value until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError>;

    /// Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Atomically add one to an integer value, creating it at 0 first.
    async fn increment(&self, key: &str) -> Result<i64, StorageError>;

    /// Set a TTL on an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// Push onto the head of a list. Returns the new length.
    async fn list_push(&self, key: &str, value: &str) -> Result<usize, StorageError>;

    /// Inclusive range; negative indices count from the tail.
    async fn list_range(&self, key: &str, start: i64, stop: i64)
        -> Result<Vec<String>, StorageError>;

    /// Keep only the inclusive range; everything else is dropped.
    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError>;

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), StorageError>;

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StorageError>;

    /// Physically drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, StorageError> {
        Ok(0)
    }

    async fn close(&self) -> Result<(), StorageError>;
}

/// Resolve a Redis-style inclusive `[start, stop]` against a list of `len`
/// items. `None` means the range is empty.
pub(crate) fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Read and decode a JSON value. Undecodable data is reported as `Corrupt`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.set(key, &raw, ttl).await
}

#[cfg(test)]
mod tests {
    use super::resolve_range;

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(5, 0, -1), Some((0, 4)));
        assert_eq!(resolve_range(5, 0, 2), Some((0, 2)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
        assert_eq!(resolve_range(5, 0, 100), Some((0, 4)));
        assert_eq!(resolve_range(5, -100, 1), Some((0, 1)));
        assert_eq!(resolve_range(5, 3, 1), None);
        assert_eq!(resolve_range(5, 5, 10), None);
        assert_eq!(resolve_range(0, 0, -1), None);
        assert_eq!(resolve_range(3, 0, -5), None);
    }
}
