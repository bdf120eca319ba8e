pub mod locks;
pub mod maintenance;
pub mod memory_store;
pub mod metrics;
pub mod profile_store;
pub mod rate_limit;
pub mod session_store;
pub mod sqlite;
pub mod store;

pub use locks::UserLocks;
pub use maintenance::{Maintenance, MaintenanceHandle, MaintenanceReport, AGGREGATIONS_KEY};
pub use memory_store::MemoryStore;
pub use metrics::{BotMetrics, MaintenanceEvent};
pub use profile_store::{history_key, profile_key, ProfileStore};
pub use rate_limit::RateLimiter;
pub use session_store::{load_session, save_session, SESSION_KEY};
pub use sqlite::SqliteStore;
pub use store::{get_json, set_json, KvStore};

use anyhow::Result;
use quibble_core::config::StorageConfig;
use std::sync::Arc;

/// Open the store named by `storage.backend`.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn KvStore>> {
    match config.backend.as_str() {
        "memory" => {
            tracing::warn!("Using in-process storage; nothing survives a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        _ => Ok(Arc::new(SqliteStore::new(&config.db_path).await?)),
    }
}

#[cfg(test)]
mod tests;
