//! Turns a selected trait and template into the reply text.
//!
//! The backend gets the trait as a style guide plus recent turns as context.
//! Whatever comes back (or the bare template, if the backend is down) has its
//! placeholders filled and a mood suffix appended when the mood runs hot or
//! cold. Composition itself never fails.

use crate::backend::{GenerationRequest, GenerativeBackend};
use crate::retry::{with_retry, RetryConfig};
use once_cell::sync::Lazy;
use quibble_core::config::{LlmConfig, ProfileConfig};
use quibble_core::{GenerationError, Message, NlpAnalysis, UserProfile};
use quibble_limbic::{Mood, PersonalityTrait};
use regex::{Captures, Regex};
use std::sync::Arc;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"));

const FALLBACK_TOPIC: &str = "that";

const HIGH_MOOD_SUFFIXES: &[&str] = &[
    " (I'm in a fantastic mood, by the way.)",
    " Honestly, today is a great day.",
];
const LOW_MOOD_SUFFIXES: &[&str] = &[
    " (Don't mind me, I'm a little grumpy right now.)",
    " ...It's been one of those days.",
];

/// Where the reply text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Generated,
    /// The backend failed; the template was used directly.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub text: String,
    pub source: ReplySource,
}

/// Everything the composer reads for one reply.
#[derive(Debug, Clone, Copy)]
pub struct ComposeRequest<'a> {
    pub message: &'a Message,
    pub analysis: &'a NlpAnalysis,
    pub personality: &'a PersonalityTrait,
    pub template: &'a str,
    pub profile: &'a UserProfile,
    pub mood: Mood,
}

pub struct ResponseComposer {
    backend: Arc<dyn GenerativeBackend>,
    retry: RetryConfig,
    model: String,
    max_tokens: u32,
    temperature: f32,
    context_turns: usize,
}

impl ResponseComposer {
    pub fn new(backend: Arc<dyn GenerativeBackend>, llm: &LlmConfig, profile: &ProfileConfig) -> Self {
        Self {
            backend,
            retry: RetryConfig::from_config(llm),
            model: llm.model.clone(),
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            context_turns: profile.context_turns,
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Compose the reply. Backend failures fall back to the filled template.
    pub async fn compose(&self, req: ComposeRequest<'_>) -> Composition {
        let (body, source) = match self.generate(&req).await {
            Ok(text) => (text, ReplySource::Generated),
            Err(e) => {
                tracing::warn!(
                    "Generation failed for {}, using template fallback: {}",
                    req.message.user_id(),
                    e
                );
                (req.template.to_string(), ReplySource::Fallback)
            }
        };

        let mut text = fill_placeholders(&body, &req);
        if let Some(suffix) = mood_suffix(req.mood, req.message.content().len()) {
            text.push_str(suffix);
        }
        Composition { text, source }
    }

    /// One generation under the retry policy.
    pub async fn generate(&self, req: &ComposeRequest<'_>) -> Result<String, GenerationError> {
        let request = GenerationRequest {
            system_prompt: system_prompt(req.personality, req.template, req.mood),
            user_prompt: user_prompt(req.message, &build_context(req.profile, self.context_turns)),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let backend = self.backend.clone();
        with_retry(&self.retry, backend.name(), || {
            let backend = backend.clone();
            let request = request.clone();
            async move { backend.generate(&request).await }
        })
        .await
    }
}

/// Recent turns, oldest first, one `User:`/`You:` pair per exchange.
pub fn build_context(profile: &UserProfile, turns: usize) -> String {
    let recent: Vec<_> = profile.recent(turns).collect();
    recent
        .iter()
        .rev()
        .map(|r| format!("User: {}\nYou: {}", r.input_digest, r.response_digest))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn system_prompt(personality: &PersonalityTrait, template: &str, mood: Mood) -> String {
    format!(
        "You are a chat bot with a distinct personality. Reply in one or two short sentences.\n\
         Active trait: {} (strength {:.2}).\n\
         Current mood: {:.1} on a scale from -10 to 10.\n\
         Style guide, match its tone: \"{}\"\n\
         You may use the placeholders {{userName}} and {{topic}}.",
        personality.name,
        personality.level,
        mood.value(),
        template
    )
}

fn user_prompt(message: &Message, context: &str) -> String {
    if context.is_empty() {
        format!("{} says: {}", message.user_name(), message.content())
    } else {
        format!(
            "Earlier conversation:\n{}\n\n{} says: {}",
            context,
            message.user_name(),
            message.content()
        )
    }
}

/// Replace known `{placeholder}`s; unknown ones are left as written.
pub fn fill_placeholders(text: &str, req: &ComposeRequest<'_>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| match &caps[1] {
            "userName" => req.message.user_name().to_string(),
            "userId" => req.message.user_id().to_string(),
            "topic" => req
                .analysis
                .primary_topic()
                .unwrap_or(FALLBACK_TOPIC)
                .to_string(),
            "mood" => format!("{:.1}", req.mood.value()),
            "trait" => req.personality.name.clone(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

/// Suffix for moods beyond `Mood::EXPRESSIVE` in either direction. `seed`
/// picks among variants deterministically.
pub fn mood_suffix(mood: Mood, seed: usize) -> Option<&'static str> {
    let pool = if mood.value() > Mood::EXPRESSIVE {
        HIGH_MOOD_SUFFIXES
    } else if mood.value() < -Mood::EXPRESSIVE {
        LOW_MOOD_SUFFIXES
    } else {
        return None;
    };
    Some(pool[seed % pool.len()])
}
