//! Slow personality drift.
//!
//! Each reply produces an effectiveness observation for the trait that was
//! used. Maintenance folds the batch into every trait's `level` with an
//! exponential moving average, so traits that land well grow stronger.

use crate::session::SessionState;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Score given when the message had no topics to compare.
const NEUTRAL_EFFECTIVENESS: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessSample {
    pub trait_name: String,
    /// In `[0.0, 1.0]`
    pub score: f32,
}

/// Topic-overlap heuristic: share of this message's topics the user is
/// already known to prefer.
pub fn effectiveness(topics: &BTreeSet<String>, preferred_topics: &[String]) -> f32 {
    if topics.is_empty() {
        return NEUTRAL_EFFECTIVENESS;
    }
    let overlap = topics
        .iter()
        .filter(|t| preferred_topics.contains(t))
        .count() as f32;
    (overlap / topics.len() as f32).clamp(0.0, 1.0)
}

/// Fold a batch of samples into trait levels. Returns the number of traits
/// whose level was updated.
pub fn apply_drift(state: &mut SessionState, samples: &[EffectivenessSample], alpha: f32) -> usize {
    let alpha = if alpha.is_finite() {
        alpha.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut sums: BTreeMap<&str, (f32, u32)> = BTreeMap::new();
    for s in samples.iter().filter(|s| s.score.is_finite()) {
        let entry = sums.entry(s.trait_name.as_str()).or_insert((0.0, 0));
        entry.0 += s.score.clamp(0.0, 1.0);
        entry.1 += 1;
    }

    let mut updated = 0;
    for t in state.traits.iter_mut() {
        if let Some((sum, count)) = sums.get(t.name.as_str()) {
            let observed = sum / *count as f32;
            let before = t.level;
            t.level = ((1.0 - alpha) * t.level + alpha * observed).clamp(0.0, 1.0);
            tracing::debug!(
                "Trait '{}' drifted {:.3} -> {:.3} over {} samples",
                t.name,
                before,
                t.level,
                count
            );
            updated += 1;
        }
    }

    if updated > 0 {
        state.touch();
    }
    updated
}
