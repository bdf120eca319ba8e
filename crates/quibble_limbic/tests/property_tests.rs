//! Property-based tests for mood bounds and trait selection.
//!
//! Verifies that the mood never leaves [-10, 10] regardless of input
//! sequence, and that selection only ever returns an eligible trait when
//! one exists.

use proptest::prelude::*;
use quibble_core::{NlpAnalysis, UserProfile};
use quibble_limbic::{apply_drift, EffectivenessSample, Mood, PersonalitySelector, SessionState};
use rand::rngs::StdRng;
use rand::SeedableRng;

// ============================================================================
// Strategies
// ============================================================================

fn arb_delta() -> impl Strategy<Value = f32> {
    prop_oneof![
        8 => -1.0f32..=1.0,
        1 => -1000.0f32..=1000.0,
        1 => prop::sample::select(vec![f32::NAN, f32::INFINITY, f32::NEG_INFINITY]),
    ]
}

fn arb_analysis() -> impl Strategy<Value = NlpAnalysis> {
    (-1.0f32..=1.0, 0.0f32..=1.0).prop_map(|(sentiment, technical_complexity)| NlpAnalysis {
        sentiment,
        technical_complexity,
        ..Default::default()
    })
}

fn arb_profile() -> impl Strategy<Value = UserProfile> {
    (0.0f32..=1.0).prop_map(|sensitivity| {
        let mut p = UserProfile::new("prop-user");
        p.sensitivity_level = sensitivity;
        p
    })
}

// ============================================================================
// Mood bounds
// ============================================================================

proptest! {
    /// **Core invariant**: mood stays within bounds after any delta sequence.
    #[test]
    fn mood_always_in_bounds(deltas in prop::collection::vec(arb_delta(), 0..500)) {
        let mut mood = Mood::default();
        for d in deltas {
            mood.apply(d);
            prop_assert!(mood.value().is_finite());
            prop_assert!(mood.value() >= Mood::MIN && mood.value() <= Mood::MAX,
                "mood out of range: {}", mood.value());
        }
    }

    /// Selection-driven mood updates obey the same bound.
    #[test]
    fn selection_keeps_mood_in_bounds(
        inputs in prop::collection::vec((arb_analysis(), arb_profile()), 1..200),
        seed in any::<u64>(),
    ) {
        let selector = PersonalitySelector::new();
        let mut state = SessionState::default();
        let mut rng = StdRng::seed_from_u64(seed);
        for (analysis, profile) in inputs {
            let sel = selector.select(&mut state, &analysis, &profile, &mut rng);
            prop_assert!(sel.mood_after.value() >= Mood::MIN && sel.mood_after.value() <= Mood::MAX);
        }
    }

    /// A trait with conditions is only chosen when its conditions hold,
    /// unless nothing at all is eligible.
    #[test]
    fn selected_trait_is_eligible(
        analysis in arb_analysis(),
        profile in arb_profile(),
        mood in -10.0f32..=10.0,
        seed in any::<u64>(),
    ) {
        let selector = PersonalitySelector::new();
        let mut state = SessionState::default();
        state.mood = Mood::new(mood);
        let any_eligible = state.traits.iter().any(|t| t.is_selectable(&analysis, &profile));

        let sel = selector.select(&mut state, &analysis, &profile, &mut StdRng::seed_from_u64(seed));

        if any_eligible {
            prop_assert!(sel.personality.is_selectable(&analysis, &profile),
                "picked ineligible trait {}", sel.personality.name);
        } else {
            prop_assert_eq!(&sel.personality.name, &state.traits[0].name);
        }
        prop_assert!(sel.personality.responses.contains(&sel.template));
    }

    /// Drift never pushes a level out of [0, 1].
    #[test]
    fn drift_keeps_levels_in_unit_range(
        scores in prop::collection::vec(-10.0f32..10.0, 0..50),
        alpha in -1.0f32..2.0,
    ) {
        let mut state = SessionState::default();
        let samples: Vec<EffectivenessSample> = scores
            .into_iter()
            .map(|score| EffectivenessSample { trait_name: "wit".to_string(), score })
            .collect();
        apply_drift(&mut state, &samples, alpha);
        prop_assert!(state.validate().is_ok());
    }
}
