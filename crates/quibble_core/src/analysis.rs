use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Coarse speech-act classification of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Question,
    Exclamation,
    Statement,
}

/// Per-message lexical analysis. Derived, never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlpAnalysis {
    /// Negative to positive, in `[-1.0, 1.0]`
    pub sentiment: f32,
    pub topics: BTreeSet<String>,
    pub intent: Intent,
    pub entities: Vec<String>,
    /// In `[0.0, 1.0]`
    pub technical_complexity: f32,
    pub code_detected: bool,
}

impl Default for NlpAnalysis {
    fn default() -> Self {
        Self {
            sentiment: 0.0,
            topics: BTreeSet::new(),
            intent: Intent::Statement,
            entities: Vec::new(),
            technical_complexity: 0.0,
            code_detected: false,
        }
    }
}

impl NlpAnalysis {
    /// First topic in stable order, used for `{topic}` placeholders.
    pub fn primary_topic(&self) -> Option<&str> {
        self.topics.iter().next().map(|s| s.as_str())
    }
}
