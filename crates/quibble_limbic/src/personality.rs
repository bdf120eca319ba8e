use quibble_core::{NlpAnalysis, UserProfile};
use serde::{Deserialize, Serialize};

/// Bounds a trait declares on the current message and user.
/// Every declared bound must hold for the trait to be selectable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraitConditions {
    pub min_sentiment: Option<f32>,
    pub max_sentiment: Option<f32>,
    /// Lower bound on the user's sensitivity level.
    pub required_user_sensitivity: Option<f32>,
    /// Upper bound on the user's sensitivity level.
    pub max_user_sensitivity: Option<f32>,
    pub min_technical_complexity: Option<f32>,
}

impl TraitConditions {
    pub fn is_satisfied(&self, analysis: &NlpAnalysis, profile: &UserProfile) -> bool {
        let sentiment = analysis.sentiment;
        let sensitivity = profile.sensitivity_level;

        self.min_sentiment.map_or(true, |min| sentiment >= min)
            && self.max_sentiment.map_or(true, |max| sentiment <= max)
            && self
                .required_user_sensitivity
                .map_or(true, |min| sensitivity >= min)
            && self
                .max_user_sensitivity
                .map_or(true, |max| sensitivity <= max)
            && self
                .min_technical_complexity
                .map_or(true, |min| analysis.technical_complexity >= min)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityTrait {
    /// Unique within a trait set
    pub name: String,
    /// Expression strength in `[0.0, 1.0]`, drifted by maintenance
    pub level: f32,
    /// Style templates; placeholders like `{userName}` are filled by the composer
    pub responses: Vec<String>,
    #[serde(default)]
    pub conditions: Option<TraitConditions>,
}

impl PersonalityTrait {
    pub fn new(name: &str, level: f32, responses: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            level: level.clamp(0.0, 1.0),
            responses: responses.iter().map(|s| s.to_string()).collect(),
            conditions: None,
        }
    }

    pub fn with_conditions(mut self, conditions: TraitConditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// A trait without conditions is always selectable.
    pub fn is_selectable(&self, analysis: &NlpAnalysis, profile: &UserProfile) -> bool {
        self.conditions
            .as_ref()
            .map_or(true, |c| c.is_satisfied(analysis, profile))
    }
}

/// Built-in trait set, in selection priority order.
pub fn default_traits() -> Vec<PersonalityTrait> {
    vec![
        PersonalityTrait::new(
            "technical",
            0.6,
            &[
                "Let's get into the weeds on {topic}, {userName}.",
                "Here's the technical angle on {topic}.",
                "Spoken like someone who reads stack traces for fun, {userName}.",
            ],
        )
        .with_conditions(TraitConditions {
            min_technical_complexity: Some(0.4),
            ..Default::default()
        }),
        PersonalityTrait::new(
            "empathy",
            0.5,
            &[
                "That sounds rough, {userName}. I'm listening.",
                "I hear you, {userName}. Want to talk about it?",
            ],
        )
        .with_conditions(TraitConditions {
            max_sentiment: Some(-0.3),
            required_user_sensitivity: Some(0.6),
            ..Default::default()
        }),
        PersonalityTrait::new(
            "encouraging",
            0.5,
            &[
                "Love the energy, {userName}! Keep it coming.",
                "That's the spirit, {userName}!",
                "Look at you, {userName}, absolutely nailing {topic}.",
            ],
        )
        .with_conditions(TraitConditions {
            min_sentiment: Some(0.3),
            ..Default::default()
        }),
        PersonalityTrait::new(
            "wit",
            0.5,
            &[
                "Ah, {topic}. My favorite subject, {userName}, right after all the others.",
                "{userName}, you always know how to keep things interesting.",
                "Bold words, {userName}. I respect it.",
            ],
        )
        .with_conditions(TraitConditions {
            min_sentiment: Some(-0.2),
            ..Default::default()
        }),
        PersonalityTrait::new(
            "sarcasm",
            0.4,
            &[
                "Oh wow, {userName}, what a completely new and unexpected take.",
                "Sure, {userName}. And I'm a toaster.",
                "Fascinating. Truly. Tell me more about {topic}, {userName}.",
            ],
        )
        .with_conditions(TraitConditions {
            max_sentiment: Some(0.2),
            max_user_sensitivity: Some(0.55),
            ..Default::default()
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(sentiment: f32) -> NlpAnalysis {
        NlpAnalysis {
            sentiment,
            ..Default::default()
        }
    }

    #[test]
    fn test_unconditioned_trait_always_selectable() {
        let t = PersonalityTrait::new("plain", 0.5, &["hi"]);
        assert!(t.is_selectable(&analysis(-1.0), &UserProfile::new("u")));
    }

    #[test]
    fn test_every_bound_must_hold() {
        let cond = TraitConditions {
            min_sentiment: Some(-0.5),
            max_sentiment: Some(0.5),
            required_user_sensitivity: Some(0.4),
            ..Default::default()
        };
        let mut profile = UserProfile::new("u");
        profile.sensitivity_level = 0.5;
        assert!(cond.is_satisfied(&analysis(0.0), &profile));
        assert!(!cond.is_satisfied(&analysis(0.6), &profile));
        assert!(!cond.is_satisfied(&analysis(-0.6), &profile));
        profile.sensitivity_level = 0.3;
        assert!(!cond.is_satisfied(&analysis(0.0), &profile));
    }

    #[test]
    fn test_default_traits_have_unique_names_and_templates() {
        let traits = default_traits();
        let mut names: Vec<_> = traits.iter().map(|t| t.name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), traits.len());
        assert!(traits.iter().all(|t| !t.responses.is_empty()));
    }

    #[test]
    fn test_sarcasm_spares_sensitive_users() {
        let sarcasm = default_traits()
            .into_iter()
            .find(|t| t.name == "sarcasm")
            .unwrap();
        let mut profile = UserProfile::new("u");
        profile.sensitivity_level = 0.9;
        assert!(!sarcasm.is_selectable(&analysis(-0.5), &profile));
    }
}
