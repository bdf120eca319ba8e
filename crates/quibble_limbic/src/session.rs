use crate::mood::Mood;
use crate::personality::{default_traits, PersonalityTrait};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The single owned bundle of process-wide mutable state.
///
/// Persisted as JSON under `session:state` and restored on startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub mood: Mood,
    /// Selection priority order is the vector order.
    pub traits: Vec<PersonalityTrait>,
    /// Unix timestamp of the last mutation
    pub last_updated: i64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::with_traits(default_traits())
    }
}

impl SessionState {
    pub fn with_traits(traits: Vec<PersonalityTrait>) -> Self {
        Self {
            mood: Mood::default(),
            traits,
            last_updated: chrono::Utc::now().timestamp(),
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = chrono::Utc::now().timestamp();
    }

    pub fn trait_by_name(&self, name: &str) -> Option<&PersonalityTrait> {
        self.traits.iter().find(|t| t.name == name)
    }

    /// Structural checks for state loaded from storage.
    pub fn validate(&self) -> Result<(), String> {
        if self.traits.is_empty() {
            return Err("trait set is empty".to_string());
        }
        let mut seen = HashSet::new();
        for t in &self.traits {
            if !seen.insert(t.name.as_str()) {
                return Err(format!("duplicate trait name '{}'", t.name));
            }
            if t.responses.is_empty() {
                return Err(format!("trait '{}' has no response templates", t.name));
            }
            if !t.level.is_finite() || !(0.0..=1.0).contains(&t.level) {
                return Err(format!("trait '{}' level {} outside [0, 1]", t.name, t.level));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_valid() {
        let s = SessionState::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.mood.value(), 0.0);
        assert!(s.trait_by_name("sarcasm").is_some());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut s = SessionState::default();
        s.mood.apply(3.5);
        let json = serde_json::to_string(&s).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        let mut s = SessionState::default();
        let dup = s.traits[0].clone();
        s.traits.push(dup);
        assert!(s.validate().is_err());

        assert!(SessionState::with_traits(vec![]).validate().is_err());
    }
}
