//! Cached, write-through user profiles.
//!
//! The in-memory map fronts `user:{id}` in the [`KvStore`]. Writes go to
//! storage before the call returns and are serialized per user. Storage
//! failures never reach the caller of `get`: they get an ephemeral default
//! profile and a warning in the log.

use crate::locks::UserLocks;
use crate::store::{get_json, set_json, KvStore};
use chrono::Utc;
use quibble_core::config::ProfileConfig;
use quibble_core::{InteractionRecord, StorageError, UserProfile};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub fn profile_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}

pub fn history_key(user_id: &str) -> String {
    format!("history:{}", user_id)
}

pub struct ProfileStore {
    store: Arc<dyn KvStore>,
    cache: RwLock<HashMap<String, UserProfile>>,
    locks: UserLocks,
    ttl: Duration,
    history_cap: usize,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration, history_cap: usize) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            locks: UserLocks::new(),
            ttl,
            history_cap: history_cap.max(1),
        }
    }

    pub fn from_config(store: Arc<dyn KvStore>, config: &ProfileConfig) -> Self {
        let days = config.ttl_days.max(0) as u64;
        Self::new(
            store,
            Duration::from_secs(days * 24 * 60 * 60),
            config.history_cap,
        )
    }

    pub fn history_cap(&self) -> usize {
        self.history_cap
    }

    /// Current profile for `user_id`, created and persisted if absent.
    pub async fn get(&self, user_id: &str) -> UserProfile {
        let _guard = self.locks.lock(user_id).await;
        match self.load_locked(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(
                    "Profile storage unavailable for {}, using ephemeral profile: {}",
                    user_id,
                    e
                );
                UserProfile::new(user_id)
            }
        }
    }

    /// Apply `mutation` and write the result through to storage.
    ///
    /// The cache is updated even when the write fails, so this process keeps
    /// a consistent view; the error is returned for the caller to log.
    pub async fn update<F>(&self, user_id: &str, mutation: F) -> Result<UserProfile, StorageError>
    where
        F: FnOnce(&mut UserProfile),
    {
        let _guard = self.locks.lock(user_id).await;
        let mut profile = match self.load_locked(user_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Updating ephemeral profile for {}: {}", user_id, e);
                UserProfile::new(user_id)
            }
        };
        mutation(&mut profile);
        self.cache
            .write()
            .await
            .insert(user_id.to_string(), profile.clone());
        self.persist(&profile).await?;
        Ok(profile)
    }

    /// Fold one exchange into the profile and append it to the history list.
    pub async fn record_interaction(
        &self,
        user_id: &str,
        record: InteractionRecord,
        topics: &BTreeSet<String>,
    ) -> Result<UserProfile, StorageError> {
        let cap = self.history_cap;
        let entry = serde_json::to_string(&record).map_err(|e| StorageError::Corrupt {
            key: history_key(user_id),
            reason: e.to_string(),
        })?;

        let profile = self
            .update(user_id, |p| p.record(record, topics, cap))
            .await?;

        let key = history_key(user_id);
        self.store.list_push(&key, &entry).await?;
        self.store.list_trim(&key, 0, cap as i64 - 1).await?;
        self.store.expire(&key, self.ttl).await?;
        Ok(profile)
    }

    /// Up to `n` stored exchanges, newest first. Undecodable entries are skipped.
    pub async fn history(
        &self,
        user_id: &str,
        n: usize,
    ) -> Result<Vec<InteractionRecord>, StorageError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let key = history_key(user_id);
        let raw = self.store.list_range(&key, 0, n as i64 - 1).await?;
        Ok(raw
            .iter()
            .filter_map(|item| match serde_json::from_str(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Skipping corrupt history entry for {}: {}", user_id, e);
                    None
                }
            })
            .collect())
    }

    pub async fn invalidate(&self, user_id: &str) {
        self.cache.write().await.remove(user_id);
    }

    pub async fn cached_users(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Drop cache entries whose durable copy has expired. Takes one user
    /// lock at a time. Returns how many entries were dropped.
    pub async fn sweep_expired(&self) -> usize {
        let ids: Vec<String> = self.cache.read().await.keys().cloned().collect();
        let mut dropped = 0;
        for user_id in ids {
            let _guard = self.locks.lock(&user_id).await;
            match self.store.get(&profile_key(&user_id)).await {
                Ok(None) => {
                    self.cache.write().await.remove(&user_id);
                    dropped += 1;
                }
                Ok(Some(_)) => {}
                Err(e) => tracing::warn!("Profile sweep skipped {}: {}", user_id, e),
            }
        }
        self.locks.prune().await;
        if dropped > 0 {
            tracing::info!("Evicted {} expired profiles from cache", dropped);
        }
        dropped
    }

    // ========================================================================
    // Internals (caller holds the user lock)
    // ========================================================================

    async fn load_locked(&self, user_id: &str) -> Result<UserProfile, StorageError> {
        let cached = self.cache.read().await.get(user_id).cloned();
        if let Some(profile) = cached {
            if !self.is_stale(&profile) {
                return Ok(profile);
            }
            // Idle past the TTL: storage decides whether it still exists
            tracing::debug!("Revalidating stale cached profile for {}", user_id);
            self.invalidate(user_id).await;
        }

        let key = profile_key(user_id);
        let stored = match get_json::<UserProfile>(self.store.as_ref(), &key).await {
            Ok(stored) => stored,
            Err(StorageError::Corrupt { reason, .. }) => {
                tracing::warn!("Discarding corrupt profile for {}: {}", user_id, reason);
                None
            }
            Err(e) => return Err(e),
        };

        let profile = match stored {
            Some(mut p) if p.user_id == user_id => {
                // A lowered cap evicts the oldest turns, the rest of the profile stays
                let over_cap = p.interaction_history.len() > self.history_cap;
                if over_cap {
                    p.interaction_history.truncate(self.history_cap);
                }
                match p.validate(self.history_cap) {
                    Ok(()) => {
                        if over_cap {
                            tracing::info!(
                                "Trimmed stored history for {} to {} turns",
                                user_id,
                                self.history_cap
                            );
                            self.persist(&p).await?;
                        }
                        p
                    }
                    Err(reason) => {
                        tracing::warn!(
                            "Stored profile for {} failed validation ({}), starting fresh",
                            user_id,
                            reason
                        );
                        self.create(user_id).await?
                    }
                }
            }
            Some(_) => {
                tracing::warn!("Stored profile for {} belongs to another user, starting fresh", user_id);
                self.create(user_id).await?
            }
            None => self.create(user_id).await?,
        };

        self.cache
            .write()
            .await
            .insert(user_id.to_string(), profile.clone());
        Ok(profile)
    }

    async fn create(&self, user_id: &str) -> Result<UserProfile, StorageError> {
        let profile = UserProfile::new(user_id);
        self.persist(&profile).await?;
        tracing::debug!("Created profile for {}", user_id);
        Ok(profile)
    }

    async fn persist(&self, profile: &UserProfile) -> Result<(), StorageError> {
        set_json(
            self.store.as_ref(),
            &profile_key(&profile.user_id),
            profile,
            Some(self.ttl),
        )
        .await
    }

    fn is_stale(&self, profile: &UserProfile) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => profile.is_stale(Utc::now(), ttl),
            Err(_) => false,
        }
    }
}
