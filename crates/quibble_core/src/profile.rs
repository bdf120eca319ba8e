//! Per-user profile: sensitivity, bounded interaction history and topic
//! preferences. Persisted as JSON under `user:{user_id}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub const DEFAULT_HISTORY_CAP: usize = 20;
pub const DIGEST_CHARS: usize = 200;
pub const MAX_PREFERRED_TOPICS: usize = 5;
const DEFAULT_SENSITIVITY: f32 = 0.5;
const SENSITIVITY_STEP: f32 = 0.05;

/// One exchange, stored most-recent-first in the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub timestamp: DateTime<Utc>,
    pub sentiment: f32,
    pub input_digest: String,
    pub response_digest: String,
    #[serde(default)]
    pub trait_name: String,
}

impl InteractionRecord {
    pub fn new(input: &str, response: &str, sentiment: f32, trait_name: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            sentiment,
            input_digest: digest(input),
            response_digest: digest(response),
            trait_name: trait_name.to_string(),
        }
    }
}

/// Leading excerpt of `text`, at most `DIGEST_CHARS` characters.
pub fn digest(text: &str) -> String {
    text.chars().take(DIGEST_CHARS).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// How gently this user should be treated, in `[0.0, 1.0]`
    pub sensitivity_level: f32,
    pub interaction_history: VecDeque<InteractionRecord>,
    pub preferred_topics: Vec<String>,
    #[serde(default)]
    pub topic_counts: BTreeMap<String, u32>,
    pub last_interaction: DateTime<Utc>,
    pub total_interactions: u64,
    pub average_sentiment: f32,
}

impl UserProfile {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            sensitivity_level: DEFAULT_SENSITIVITY,
            interaction_history: VecDeque::new(),
            preferred_topics: Vec::new(),
            topic_counts: BTreeMap::new(),
            last_interaction: Utc::now(),
            total_interactions: 0,
            average_sentiment: 0.0,
        }
    }

    /// Fold one interaction into the profile.
    ///
    /// History stays most-recent-first and never grows past `cap`.
    pub fn record(&mut self, record: InteractionRecord, topics: &BTreeSet<String>, cap: usize) {
        let sentiment = if record.sentiment.is_finite() {
            record.sentiment.clamp(-1.0, 1.0)
        } else {
            0.0
        };

        self.total_interactions += 1;
        let n = self.total_interactions as f32;
        self.average_sentiment =
            (self.average_sentiment + (sentiment - self.average_sentiment) / n).clamp(-1.0, 1.0);

        // Users who keep sounding hurt get handled more gently, and vice versa
        if sentiment < -0.2 {
            self.sensitivity_level += SENSITIVITY_STEP;
        } else if sentiment > 0.2 {
            self.sensitivity_level -= SENSITIVITY_STEP;
        }
        self.sensitivity_level = self.sensitivity_level.clamp(0.0, 1.0);

        for topic in topics {
            *self.topic_counts.entry(topic.clone()).or_insert(0) += 1;
        }
        self.refresh_preferred_topics();

        self.last_interaction = record.timestamp;
        self.interaction_history.push_front(record);
        self.interaction_history.truncate(cap);
    }

    fn refresh_preferred_topics(&mut self) {
        let mut ranked: Vec<(&String, &u32)> = self.topic_counts.iter().collect();
        // Highest count first; ties broken alphabetically (BTreeMap order is stable)
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        self.preferred_topics = ranked
            .into_iter()
            .take(MAX_PREFERRED_TOPICS)
            .map(|(t, _)| t.clone())
            .collect();
    }

    /// The `n` most recent exchanges, newest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &InteractionRecord> {
        self.interaction_history.iter().take(n)
    }

    /// Whether the profile has been idle for longer than `ttl`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.last_interaction > ttl
    }

    /// Range checks applied when a profile crosses the storage boundary.
    pub fn validate(&self, history_cap: usize) -> Result<(), String> {
        if self.user_id.trim().is_empty() {
            return Err("empty user_id".to_string());
        }
        if !(0.0..=1.0).contains(&self.sensitivity_level) {
            return Err(format!(
                "sensitivity_level {} outside [0, 1]",
                self.sensitivity_level
            ));
        }
        if !(-1.0..=1.0).contains(&self.average_sentiment) {
            return Err(format!(
                "average_sentiment {} outside [-1, 1]",
                self.average_sentiment
            ));
        }
        if self.interaction_history.len() > history_cap {
            return Err(format!(
                "interaction_history has {} entries, cap is {}",
                self.interaction_history.len(),
                history_cap
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_profile_defaults() {
        let p = UserProfile::new("u1");
        assert_eq!(p.total_interactions, 0);
        assert!((p.sensitivity_level - 0.5).abs() < 1e-6);
        assert!(p.interaction_history.is_empty());
        assert!(p.validate(DEFAULT_HISTORY_CAP).is_ok());
    }

    #[test]
    fn test_history_is_capped_and_most_recent_first() {
        let mut p = UserProfile::new("u1");
        for i in 0..30 {
            let rec = InteractionRecord::new(&format!("msg {}", i), "reply", 0.0, "wit");
            p.record(rec, &BTreeSet::new(), 20);
        }
        assert_eq!(p.interaction_history.len(), 20);
        assert_eq!(p.interaction_history[0].input_digest, "msg 29");
        assert_eq!(p.interaction_history[19].input_digest, "msg 10");
        assert_eq!(p.total_interactions, 30);
    }

    #[test]
    fn test_running_average_sentiment() {
        let mut p = UserProfile::new("u1");
        p.record(InteractionRecord::new("a", "b", 1.0, "wit"), &BTreeSet::new(), 20);
        p.record(InteractionRecord::new("a", "b", 0.0, "wit"), &BTreeSet::new(), 20);
        assert!((p.average_sentiment - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_sensitivity_adapts_and_stays_bounded() {
        let mut p = UserProfile::new("u1");
        for _ in 0..40 {
            p.record(InteractionRecord::new("a", "b", -0.9, "empathy"), &BTreeSet::new(), 20);
        }
        assert!((p.sensitivity_level - 1.0).abs() < 1e-6);
        for _ in 0..40 {
            p.record(InteractionRecord::new("a", "b", 0.9, "wit"), &BTreeSet::new(), 20);
        }
        assert!(p.sensitivity_level.abs() < 1e-6);
    }

    #[test]
    fn test_preferred_topics_ranked_by_frequency() {
        let mut p = UserProfile::new("u1");
        p.record(InteractionRecord::new("a", "b", 0.0, "wit"), &topics(&["music"]), 20);
        p.record(InteractionRecord::new("a", "b", 0.0, "wit"), &topics(&["gaming", "music"]), 20);
        assert_eq!(p.preferred_topics, vec!["music", "gaming"]);
    }

    #[test]
    fn test_non_finite_sentiment_is_neutralized() {
        let mut p = UserProfile::new("u1");
        p.record(InteractionRecord::new("a", "b", f32::NAN, "wit"), &BTreeSet::new(), 20);
        assert!(p.average_sentiment.is_finite());
    }

    #[test]
    fn test_digest_truncates_by_chars() {
        let long = "é".repeat(500);
        assert_eq!(digest(&long).chars().count(), DIGEST_CHARS);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut p = UserProfile::new("u1");
        p.sensitivity_level = 1.5;
        assert!(p.validate(DEFAULT_HISTORY_CAP).is_err());
    }

    #[test]
    fn test_is_stale() {
        let mut p = UserProfile::new("u1");
        p.last_interaction = Utc::now() - chrono::Duration::days(31);
        assert!(p.is_stale(Utc::now(), chrono::Duration::days(30)));
        assert!(!UserProfile::new("u2").is_stale(Utc::now(), chrono::Duration::days(30)));
    }
}
