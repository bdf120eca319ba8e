use crate::mood::Mood;
use crate::personality::PersonalityTrait;
use crate::session::SessionState;
use quibble_core::{NlpAnalysis, UserProfile};
use rand::seq::SliceRandom;
use rand::Rng;

/// Which trait family the current mood favors.
///
/// Preference only reorders among traits whose conditions already hold; it
/// never makes an ineligible trait selectable.
#[derive(Debug, Clone, PartialEq)]
pub struct MoodPolicy {
    /// Preferred while mood > 0
    pub positive: Vec<String>,
    /// Preferred while mood <= 0
    pub non_positive: Vec<String>,
}

impl Default for MoodPolicy {
    fn default() -> Self {
        Self {
            positive: vec![
                "wit".to_string(),
                "technical".to_string(),
                "encouraging".to_string(),
            ],
            non_positive: vec!["sarcasm".to_string()],
        }
    }
}

impl MoodPolicy {
    pub fn preferred(&self, mood: Mood) -> &[String] {
        if mood.is_positive() {
            &self.positive
        } else {
            &self.non_positive
        }
    }
}

/// Outcome of one selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub personality: PersonalityTrait,
    pub template: String,
    pub mood_before: Mood,
    pub mood_after: Mood,
}

#[derive(Debug, Clone, Default)]
pub struct PersonalitySelector {
    policy: MoodPolicy,
}

impl PersonalitySelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: MoodPolicy) -> Self {
        Self { policy }
    }

    /// Choose a trait and template for this message, then fold the message's
    /// sentiment into the mood. Never fails.
    ///
    /// Order of preference:
    /// 1. first eligible trait in the mood-preferred family
    /// 2. first eligible trait
    /// 3. first trait in the set
    pub fn select<R: Rng + ?Sized>(
        &self,
        state: &mut SessionState,
        analysis: &NlpAnalysis,
        profile: &UserProfile,
        rng: &mut R,
    ) -> Selection {
        let mood_before = state.mood;
        let chosen = self.choose_trait(state, analysis, profile);

        let template = chosen
            .responses
            .choose(rng)
            .cloned()
            .unwrap_or_default();

        state.mood.apply(analysis.sentiment);
        state.touch();

        tracing::debug!(
            "Selected trait '{}' (mood {:.2} -> {:.2})",
            chosen.name,
            mood_before.value(),
            state.mood.value()
        );

        Selection {
            personality: chosen,
            template,
            mood_before,
            mood_after: state.mood,
        }
    }

    fn choose_trait(
        &self,
        state: &SessionState,
        analysis: &NlpAnalysis,
        profile: &UserProfile,
    ) -> PersonalityTrait {
        let preferred = self.policy.preferred(state.mood);
        let eligible: Vec<&PersonalityTrait> = state
            .traits
            .iter()
            .filter(|t| t.is_selectable(analysis, profile))
            .collect();

        eligible
            .iter()
            .find(|t| preferred.contains(&t.name))
            .or_else(|| eligible.first())
            .map(|t| (*t).clone())
            .or_else(|| state.traits.first().cloned())
            .unwrap_or_else(|| {
                // An empty trait set is rejected at load time; keep replies flowing anyway
                tracing::warn!("Trait set is empty, using a neutral trait");
                PersonalityTrait::new("neutral", 0.5, &["{userName}, noted."])
            })
    }
}
