//! Heuristic lexical analysis: sentiment, topics, intent, entities and code
//! detection over raw message text.
//!
//! Deliberately low-fidelity. A model-backed implementation can replace
//! `KeywordAnalyzer` behind the `Analyzer` trait without touching callers.

use crate::analysis::{Intent, NlpAnalysis};
use crate::sentiment::{analyze_sentiment, tokenize};
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use std::collections::BTreeSet;

/// Pure text → analysis function. Implementations must not perform I/O.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, text: &str) -> NlpAnalysis;
}

const TOPICS: &[(&str, &[&str])] = &[
    (
        "programming",
        &[
            "code", "coding", "rust", "python", "javascript", "typescript", "java", "compile",
            "compiler", "bug", "debug", "function", "api", "git", "program", "programming",
        ],
    ),
    (
        "gaming",
        &["game", "games", "gaming", "play", "playing", "level", "boss", "console", "steam"],
    ),
    (
        "music",
        &["music", "song", "songs", "album", "band", "guitar", "piano", "concert", "playlist"],
    ),
    (
        "movies",
        &["movie", "movies", "film", "films", "cinema", "actor", "director", "trailer"],
    ),
    (
        "food",
        &["food", "pizza", "coffee", "tea", "dinner", "lunch", "breakfast", "cook", "recipe"],
    ),
    (
        "sports",
        &["football", "soccer", "basketball", "tennis", "match", "team", "score", "goal"],
    ),
    (
        "science",
        &["science", "physics", "chemistry", "biology", "space", "planet", "experiment"],
    ),
    (
        "weather",
        &["weather", "rain", "sunny", "snow", "storm", "forecast", "cold", "hot"],
    ),
];

const TECHNICAL_TERMS: &[&str] = &[
    "function", "compile", "compiler", "runtime", "async", "await", "thread", "threads",
    "mutex", "lock", "pointer", "memory", "heap", "stack", "api", "database", "sql", "query",
    "index", "cache", "algorithm", "complexity", "regex", "struct", "trait", "borrow",
    "lifetime", "kernel", "server", "http", "json", "deploy", "docker", "git", "rust",
    "python", "javascript", "typescript", "java", "closure", "iterator", "generic", "type",
    "types", "compile-time", "latency", "throughput", "protocol", "socket", "segfault",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "why", "how", "when", "where", "who", "which", "can", "could", "would", "should",
    "is", "are", "do", "does", "did", "will",
];

static CODE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"```",
        r"`[^`\n]+`",
        r"\bfn\s+\w+\s*[(<]",
        r"\bdef\s+\w+\s*\(",
        r"\bfunction\s*\w*\s*\(",
        r"\b(let|const|var)\s+(mut\s+)?\w+\s*=",
        r"=>|->",
        r"(?m)[;{}]\s*$",
        r"#include\s*<",
        r"\b(import|use)\s+[\w:.]+;",
    ])
    .expect("static code patterns are valid")
});

static MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@\w+").expect("valid regex"));
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s)>\]]+").expect("valid regex"));
static SENTENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^.!?\n]+").expect("valid regex"));

/// Keyword-list analyzer. Stateless and deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for KeywordAnalyzer {
    fn analyze(&self, text: &str) -> NlpAnalysis {
        let tokens = tokenize(text);
        let code_detected = detect_code(text);

        NlpAnalysis {
            sentiment: analyze_sentiment(text),
            topics: extract_topics(&tokens),
            intent: classify_intent(text, &tokens),
            entities: extract_entities(text),
            technical_complexity: technical_complexity(&tokens, code_detected),
            code_detected,
        }
    }
}

pub fn detect_code(text: &str) -> bool {
    CODE_PATTERNS.is_match(text)
}

pub fn extract_topics(tokens: &[String]) -> BTreeSet<String> {
    TOPICS
        .iter()
        .filter(|(_, keywords)| tokens.iter().any(|t| keywords.contains(&t.as_str())))
        .map(|(topic, _)| topic.to_string())
        .collect()
}

pub fn classify_intent(text: &str, tokens: &[String]) -> Intent {
    let trimmed = text.trim_end();
    let starts_with_question_word = tokens
        .first()
        .map(|t| QUESTION_WORDS.contains(&t.as_str()))
        .unwrap_or(false);

    if trimmed.ends_with('?') || starts_with_question_word {
        Intent::Question
    } else if trimmed.contains('!') {
        Intent::Exclamation
    } else {
        Intent::Statement
    }
}

/// Mentions, URLs, then capitalized words that do not open a sentence.
/// Order of first appearance, no duplicates.
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    let mut push = |e: &str| {
        if !entities.iter().any(|x| x == e) {
            entities.push(e.to_string());
        }
    };

    for m in MENTION.find_iter(text) {
        push(m.as_str());
    }
    for m in URL.find_iter(text) {
        push(m.as_str());
    }

    let stripped = URL.replace_all(text, " ");
    for sentence in SENTENCE.find_iter(&stripped) {
        let words = sentence
            .as_str()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty());
        for word in words.skip(1) {
            let mut chars = word.chars();
            let capitalized = chars.next().map(|c| c.is_uppercase()).unwrap_or(false);
            if capitalized && word != "I" && !word.starts_with("I'") {
                push(word);
            }
        }
    }

    entities
}

pub fn technical_complexity(tokens: &[String], code_detected: bool) -> f32 {
    let hits = tokens
        .iter()
        .filter(|t| TECHNICAL_TERMS.contains(&t.as_str()))
        .count() as f32;
    let density = hits / tokens.len().max(1) as f32;
    let code_bonus = if code_detected { 0.4 } else { 0.0 };

    (density * 3.0 + code_bonus).clamp(0.0, 1.0)
}
