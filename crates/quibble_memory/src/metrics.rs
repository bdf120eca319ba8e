//! Aggregate counters owned by the maintenance task.

use chrono::{DateTime, Utc};
use quibble_limbic::EffectivenessSample;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// What the orchestrator reports to maintenance after each message.
#[derive(Debug, Clone, PartialEq)]
pub enum MaintenanceEvent {
    Interaction {
        user_id: String,
        topics: BTreeSet<String>,
        trait_name: String,
        /// Topic-overlap score used for trait drift
        effectiveness: f32,
        /// The reply came from the local template, not the backend
        fallback: bool,
    },
    Throttled {
        user_id: String,
    },
    Rejected {
        user_id: String,
    },
    Error {
        user_id: Option<String>,
        kind: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotMetrics {
    pub window_start: DateTime<Utc>,
    pub total_interactions: u64,
    pub fallback_replies: u64,
    pub error_count: u64,
    pub throttled_count: u64,
    pub rejected_count: u64,
    pub topic_frequency: BTreeMap<String, u64>,
    pub active_users: BTreeSet<String>,
    pub trait_usage: BTreeMap<String, u64>,
    pub errors_by_kind: BTreeMap<String, u64>,
    #[serde(skip)]
    pub effectiveness: Vec<EffectivenessSample>,
}

impl Default for BotMetrics {
    fn default() -> Self {
        Self::starting_at(Utc::now())
    }
}

impl BotMetrics {
    pub fn starting_at(window_start: DateTime<Utc>) -> Self {
        Self {
            window_start,
            total_interactions: 0,
            fallback_replies: 0,
            error_count: 0,
            throttled_count: 0,
            rejected_count: 0,
            topic_frequency: BTreeMap::new(),
            active_users: BTreeSet::new(),
            trait_usage: BTreeMap::new(),
            errors_by_kind: BTreeMap::new(),
            effectiveness: Vec::new(),
        }
    }

    pub fn record(&mut self, event: MaintenanceEvent) {
        match event {
            MaintenanceEvent::Interaction {
                user_id,
                topics,
                trait_name,
                effectiveness,
                fallback,
            } => {
                self.total_interactions += 1;
                if fallback {
                    self.fallback_replies += 1;
                }
                for topic in topics {
                    *self.topic_frequency.entry(topic).or_insert(0) += 1;
                }
                self.active_users.insert(user_id);
                *self.trait_usage.entry(trait_name.clone()).or_insert(0) += 1;
                self.effectiveness.push(EffectivenessSample {
                    trait_name,
                    score: effectiveness,
                });
            }
            MaintenanceEvent::Throttled { user_id } => {
                self.throttled_count += 1;
                self.active_users.insert(user_id);
            }
            MaintenanceEvent::Rejected { user_id } => {
                self.rejected_count += 1;
                if !user_id.is_empty() {
                    self.active_users.insert(user_id);
                }
            }
            MaintenanceEvent::Error { user_id, kind } => {
                self.error_count += 1;
                *self.errors_by_kind.entry(kind).or_insert(0) += 1;
                if let Some(user_id) = user_id {
                    self.active_users.insert(user_id);
                }
            }
        }
    }

    /// Errors as a share of everything that reached processing.
    pub fn error_rate(&self) -> f32 {
        let handled = self.total_interactions + self.error_count;
        if handled == 0 {
            0.0
        } else {
            self.error_count as f32 / handled as f32
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_interactions == 0
            && self.error_count == 0
            && self.throttled_count == 0
            && self.rejected_count == 0
    }

    /// Flattened form written to `metrics:{timestamp}`.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("window_start".to_string(), self.window_start.to_rfc3339()),
            (
                "total_interactions".to_string(),
                self.total_interactions.to_string(),
            ),
            (
                "fallback_replies".to_string(),
                self.fallback_replies.to_string(),
            ),
            ("error_count".to_string(), self.error_count.to_string()),
            ("error_rate".to_string(), format!("{:.4}", self.error_rate())),
            ("throttled_count".to_string(), self.throttled_count.to_string()),
            ("rejected_count".to_string(), self.rejected_count.to_string()),
            ("active_users".to_string(), self.active_users.len().to_string()),
            ("topic_frequency".to_string(), to_json(&self.topic_frequency)),
            ("trait_usage".to_string(), to_json(&self.trait_usage)),
            ("errors_by_kind".to_string(), to_json(&self.errors_by_kind)),
        ]
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
