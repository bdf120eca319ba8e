use serde::{Deserialize, Deserializer, Serialize};

/// Process-wide mood, always within `[Mood::MIN, Mood::MAX]`.
///
/// The inner value is private so every write goes through a clamp.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize)]
#[serde(transparent)]
pub struct Mood(f32);

impl Mood {
    pub const MIN: f32 = -10.0;
    pub const MAX: f32 = 10.0;
    /// Beyond this magnitude the composer appends a mood suffix.
    pub const EXPRESSIVE: f32 = 5.0;

    pub fn new(value: f32) -> Self {
        Self(sanitize(value, 0.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0.0
    }

    /// Add a sentiment delta. Non-finite deltas are ignored.
    pub fn apply(&mut self, delta: f32) {
        if !delta.is_finite() {
            tracing::warn!("Ignoring non-finite mood delta {}", delta);
            return;
        }
        self.0 = sanitize(self.0 + delta, self.0);
    }

    /// Pull the mood toward neutral by `factor` (0 = no change, 1 = reset).
    pub fn decay(&mut self, factor: f32) {
        let factor = if factor.is_finite() {
            factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.0 = sanitize(self.0 * (1.0 - factor), 0.0);
    }
}

fn sanitize(v: f32, fallback: f32) -> f32 {
    if v.is_finite() {
        v.clamp(Mood::MIN, Mood::MAX)
    } else {
        fallback.clamp(Mood::MIN, Mood::MAX)
    }
}

impl<'de> Deserialize<'de> for Mood {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = f32::deserialize(deserializer)?;
        Ok(Mood::new(raw))
    }
}
