//! Simple weighted-keyword sentiment scoring.
//!
//! Shared across crates to avoid duplicating word lists.
//! In production, this should be replaced with an ML model.

const POSITIVE: &[(&str, f32)] = &[
    ("great", 0.5),
    ("awesome", 0.6),
    ("amazing", 0.6),
    ("excellent", 0.6),
    ("fantastic", 0.6),
    ("wonderful", 0.6),
    ("love", 0.6),
    ("brilliant", 0.5),
    ("best", 0.5),
    ("perfect", 0.5),
    ("happy", 0.4),
    ("glad", 0.4),
    ("helpful", 0.4),
    ("good", 0.3),
    ("nice", 0.3),
    ("cool", 0.3),
    ("fun", 0.3),
    ("thanks", 0.3),
    ("thank", 0.3),
    ("like", 0.2),
];

const NEGATIVE: &[(&str, f32)] = &[
    ("terrible", 0.6),
    ("awful", 0.6),
    ("horrible", 0.6),
    ("hate", 0.6),
    ("worst", 0.6),
    ("angry", 0.5),
    ("stupid", 0.5),
    ("useless", 0.5),
    ("sucks", 0.5),
    ("bad", 0.4),
    ("sad", 0.4),
    ("annoying", 0.4),
    ("ugly", 0.4),
    ("boring", 0.3),
    ("broken", 0.3),
    ("wrong", 0.3),
    ("fail", 0.3),
    ("failed", 0.3),
    ("crash", 0.3),
    ("bug", 0.2),
];

/// Emoji are matched as substrings since they never tokenize cleanly.
const EMOJI: &[(&str, f32)] = &[
    ("😊", 0.4),
    ("❤️", 0.5),
    ("👍", 0.3),
    ("😂", 0.3),
    ("😢", -0.4),
    ("😡", -0.5),
    ("💔", -0.5),
    ("👎", -0.3),
];

/// A negator flips the polarity of the next scored word.
const NEGATORS: &[&str] = &[
    "not", "no", "never", "don't", "dont", "isn't", "isnt", "wasn't", "aren't", "can't",
    "cannot", "didn't",
];

/// Lowercased word tokens. Apostrophes stay inside words so "don't" survives.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn word_weight(word: &str) -> Option<f32> {
    POSITIVE
        .iter()
        .find(|(w, _)| *w == word)
        .map(|(_, s)| *s)
        .or_else(|| NEGATIVE.iter().find(|(w, _)| *w == word).map(|(_, s)| -*s))
}

/// Score text sentiment as a sum of weighted hits, clamped to `[-1.0, 1.0]`.
pub fn analyze_sentiment(text: &str) -> f32 {
    let mut score = 0.0f32;
    let mut negate_next = false;

    for token in tokenize(text) {
        if NEGATORS.contains(&token.as_str()) {
            negate_next = true;
            continue;
        }
        if let Some(weight) = word_weight(&token) {
            score += if negate_next { -weight } else { weight };
            negate_next = false;
        }
    }

    for (emoji, weight) in EMOJI {
        score += text.matches(emoji).count() as f32 * weight;
    }

    score.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_text() {
        assert!(analyze_sentiment("the train leaves at noon").abs() < 0.01);
    }

    #[test]
    fn test_positive_text() {
        assert!(analyze_sentiment("this is great and awesome") > 0.0);
    }

    #[test]
    fn test_negative_text() {
        assert!(analyze_sentiment("this is terrible, I hate it") < 0.0);
    }

    #[test]
    fn test_negation_flips_polarity() {
        assert!(analyze_sentiment("this is not good") < 0.0);
        assert!(analyze_sentiment("that wasn't bad at all") > 0.0);
    }

    #[test]
    fn test_clamped_to_unit_range() {
        let s = analyze_sentiment("great awesome amazing excellent fantastic wonderful love");
        assert!((s - 1.0).abs() < 1e-6);
        let s = analyze_sentiment("terrible awful horrible hate worst angry");
        assert!((s + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_emoji_sentiment() {
        assert!(analyze_sentiment("😊👍") > 0.0);
        assert!(analyze_sentiment("💔") < 0.0);
    }

    #[test]
    fn test_case_insensitive() {
        assert!(analyze_sentiment("GREAT") > 0.0);
    }

    #[test]
    fn test_empty_text() {
        assert!(analyze_sentiment("").abs() < 0.01);
    }

    #[test]
    fn test_tokenize_keeps_contractions() {
        assert_eq!(tokenize("Don't panic!"), vec!["don't", "panic"]);
    }
}
