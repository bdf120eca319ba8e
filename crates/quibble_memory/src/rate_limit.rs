//! Per-user sliding-window admission control.
//!
//! Each user owns a window of request timestamps behind its own lock, so
//! checks for different users never contend. Windows are pruned lazily on
//! every check and in bulk by maintenance.

use chrono::{DateTime, Duration, Utc};
use quibble_core::config::RateLimitConfig;
use quibble_core::RateLimitExceeded;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

type Window = Arc<Mutex<VecDeque<DateTime<Utc>>>>;

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: std::time::Duration) -> Self {
        Self {
            max_requests,
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(60)),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.max_requests,
            std::time::Duration::from_secs(config.window_secs),
        )
    }

    pub async fn admit(&self, user_id: &str) -> bool {
        self.admit_at(user_id, Utc::now()).await
    }

    /// Admit or reject a request arriving at `now`. Admitted requests are
    /// recorded; rejected ones are not.
    pub async fn admit_at(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        let window = self.window_for(user_id).await;
        let mut stamps = window.lock().await;
        prune(&mut stamps, now, self.window);

        if stamps.len() >= self.max_requests {
            tracing::debug!(
                "Throttled {} ({} requests in window)",
                user_id,
                stamps.len()
            );
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Requests `user_id` may still make in the window ending at `now`.
    pub async fn remaining(&self, user_id: &str, now: DateTime<Utc>) -> usize {
        let window = {
            let map = self.windows.lock().await;
            match map.get(user_id) {
                Some(w) => w.clone(),
                None => return self.max_requests,
            }
        };
        let mut stamps = window.lock().await;
        prune(&mut stamps, now, self.window);
        self.max_requests.saturating_sub(stamps.len())
    }

    /// The error a rejected caller reports.
    pub fn exceeded(&self, user_id: &str) -> RateLimitExceeded {
        RateLimitExceeded {
            user_id: user_id.to_string(),
            limit: self.max_requests,
            window_secs: self.window.num_seconds().max(0) as u64,
        }
    }

    /// Prune every window and forget users with nothing left in theirs.
    /// Takes one user lock at a time. Returns how many users were dropped.
    pub async fn prune_stale(&self, now: DateTime<Utc>) -> usize {
        let snapshot: Vec<(String, Window)> = {
            let map = self.windows.lock().await;
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut empty = Vec::new();
        for (user_id, window) in snapshot {
            let mut stamps = window.lock().await;
            prune(&mut stamps, now, self.window);
            if stamps.is_empty() {
                empty.push(user_id);
            }
        }

        let mut map = self.windows.lock().await;
        let mut removed = 0;
        for user_id in empty {
            // Only the map may hold the window: an admitter that already
            // cloned it would otherwise record into an orphaned window
            let still_empty = map
                .get(&user_id)
                .filter(|w| Arc::strong_count(*w) == 1)
                .and_then(|w| w.try_lock().ok().map(|s| s.is_empty()))
                .unwrap_or(false);
            if still_empty {
                map.remove(&user_id);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!("Dropped {} idle rate windows", removed);
        }
        removed
    }

    pub async fn tracked_users(&self) -> usize {
        self.windows.lock().await.len()
    }

    async fn window_for(&self, user_id: &str) -> Window {
        let mut map = self.windows.lock().await;
        map.entry(user_id.to_string()).or_default().clone()
    }
}

/// Drop timestamps that fell out of the window ending at `now`.
fn prune(stamps: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
    stamps.retain(|ts| now.signed_duration_since(*ts) < window);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(5, std::time::Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_sixth_request_in_window_rejected() {
        let rl = limiter();
        let t0 = Utc::now();
        for i in 0..5 {
            assert!(rl.admit_at("u1", t0 + Duration::seconds(i)).await);
        }
        assert!(!rl.admit_at("u1", t0 + Duration::seconds(10)).await);
        assert_eq!(rl.remaining("u1", t0 + Duration::seconds(10)).await, 0);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let rl = limiter();
        let t0 = Utc::now();
        for _ in 0..5 {
            assert!(rl.admit_at("u1", t0).await);
        }
        assert!(!rl.admit_at("u1", t0 + Duration::seconds(59)).await);
        assert!(rl.admit_at("u1", t0 + Duration::seconds(60)).await);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let rl = limiter();
        let t0 = Utc::now();
        for _ in 0..5 {
            rl.admit_at("u1", t0).await;
        }
        assert!(!rl.admit_at("u1", t0).await);
        assert!(rl.admit_at("u2", t0).await);
    }

    #[tokio::test]
    async fn test_rejections_are_not_recorded() {
        let rl = RateLimiter::new(1, std::time::Duration::from_secs(10));
        let t0 = Utc::now();
        assert!(rl.admit_at("u1", t0).await);
        for i in 1..5 {
            assert!(!rl.admit_at("u1", t0 + Duration::seconds(i)).await);
        }
        // Only the admitted request counts toward the window
        assert!(rl.admit_at("u1", t0 + Duration::seconds(10)).await);
    }

    #[tokio::test]
    async fn test_prune_stale_drops_idle_users() {
        let rl = limiter();
        let t0 = Utc::now();
        rl.admit_at("old", t0).await;
        rl.admit_at("fresh", t0 + Duration::seconds(50)).await;
        assert_eq!(rl.tracked_users().await, 2);

        let removed = rl.prune_stale(t0 + Duration::seconds(61)).await;
        assert_eq!(removed, 1);
        assert_eq!(rl.tracked_users().await, 1);
        assert_eq!(rl.remaining("old", t0 + Duration::seconds(61)).await, 5);
    }

    #[tokio::test]
    async fn test_prune_keeps_window_an_admitter_already_holds() {
        let rl = RateLimiter::new(1, std::time::Duration::from_secs(60));
        let t0 = Utc::now();
        rl.admit_at("u1", t0).await;

        // An admitter that has fetched the window but not yet locked it
        let held = rl.window_for("u1").await;
        assert_eq!(rl.prune_stale(t0 + Duration::seconds(61)).await, 0);
        assert_eq!(rl.tracked_users().await, 1);

        held.lock().await.push_back(t0 + Duration::seconds(61));
        drop(held);
        assert!(!rl.admit_at("u1", t0 + Duration::seconds(62)).await);
    }

    #[test]
    fn test_exceeded_carries_policy() {
        let err = limiter().exceeded("u1");
        assert_eq!(err.limit, 5);
        assert_eq!(err.window_secs, 60);
    }
}
