//! Degenerate-output detection.
//!
//! Small local models sometimes loop ("the answer is the answer is the
//! answer is ..."), leave stub markers, or echo a template instead of
//! answering. Looping output takes an extra weight penalty at ballot time;
//! stub and template output lowers the confidence a reply is scored with
//! when the specialist did not report one.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Shorter text is never flagged.
const MIN_CHARS: usize = 20;
/// Only the tail is inspected for token-level loops.
const TAIL_CHARS: usize = 100;
const MIN_TOKENS: usize = 8;
const MIN_UNIQUE_RATIO: f64 = 0.06;
const MAX_BIGRAM_REPEATS: usize = 3;
const MAX_TRIGRAM_REPEATS: usize = 2;
const MAX_SENTENCE_REPEATS: usize = 2;

/// Confidence for output with no alphanumeric content at all.
const EMPTY_CONFIDENCE: f64 = 0.1;
const STUB_PENALTY: f64 = 0.4;
const TEMPLATE_PENALTY: f64 = 0.3;
const ELLIPSIS_PENALTY: f64 = 0.2;
const MAX_ELLIPSES: usize = 2;

static STUB_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(todo|fixme|xxx|placeholder)\b").unwrap());

static TEMPLATE_ECHO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bresponse from\b").unwrap());

/// Confidence for a reply that carried none, starting from the
/// specialist's declared `base` and lowered for stub markers, template
/// echoes and trailing-off ellipses. Never exceeds `base`.
pub fn content_confidence(text: &str, base: f64) -> f64 {
    if !text.chars().any(char::is_alphanumeric) {
        return base.min(EMPTY_CONFIDENCE);
    }

    let mut confidence = base;
    if STUB_MARKER.is_match(text) {
        confidence -= STUB_PENALTY;
    }
    if TEMPLATE_ECHO.is_match(text) {
        confidence -= TEMPLATE_PENALTY;
    }
    if text.matches("...").count() > MAX_ELLIPSES {
        confidence -= ELLIPSIS_PENALTY;
    }
    confidence.max(0.0).min(base)
}

fn tail(text: &str, chars: usize) -> &str {
    let count = text.chars().count();
    if count <= chars {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - chars)
        .map_or(0, |(i, _)| i);
    &text[start..]
}

fn repeated_more_than(items: impl Iterator<Item = String>, limit: usize) -> bool {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for item in items {
        let count = counts.entry(item).or_insert(0);
        *count += 1;
        if *count > limit {
            return true;
        }
    }
    false
}

/// Whether `text` looks like a generation loop.
pub fn is_repetitive(text: &str) -> bool {
    if text.chars().count() < MIN_CHARS {
        return false;
    }

    let recent = tail(text, TAIL_CHARS).to_lowercase();
    let tokens: Vec<&str> = recent
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < MIN_TOKENS {
        return false;
    }

    let unique: std::collections::HashSet<&str> = tokens.iter().copied().collect();
    if (unique.len() as f64 / tokens.len() as f64) < MIN_UNIQUE_RATIO {
        return true;
    }

    let words: Vec<&str> = recent.split_whitespace().collect();
    let bigrams = words
        .windows(2)
        .map(|w| w.join(" "))
        .filter(|phrase| phrase.len() > 3);
    if repeated_more_than(bigrams, MAX_BIGRAM_REPEATS) {
        return true;
    }
    if repeated_more_than(words.windows(3).map(|w| w.join(" ")), MAX_TRIGRAM_REPEATS) {
        return true;
    }

    let sentences: Vec<String> = text
        .split(['.', '!', '?'])
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    sentences.len() >= 3 && repeated_more_than(sentences.into_iter(), MAX_SENTENCE_REPEATS)
}
