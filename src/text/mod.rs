//! Tokenizer & symbol extractor (component A).
//!
//! Turns free text plus optional tags into a bag of lowercased terms, with
//! code-symbol awareness and tag boosting so the TF-IDF index (component B)
//! weighs identifiers and tags more heavily than prose.
#![allow(clippy::expect_used)]

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Tag tokens are appended at this multiplicity so TF-IDF weighs them
/// higher than ordinary prose terms.
pub const TAG_MULTIPLICITY: usize = 3;

static BACKTICK_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`]+)`").expect("static regex: backtick symbol"));
static METHOD_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.([a-zA-Z_][a-zA-Z0-9_]*)\b").expect("static regex: method call"));
static CAMEL_CASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-zA-Z][a-zA-Z0-9]*[a-z][A-Z][a-zA-Z0-9]*\b").expect("static regex: camel case")
});
static SNAKE_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-z][a-z0-9_]{2,}\b").expect("static regex: snake case"));
static SCREAMING_SNAKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][A-Z0-9_]{2,}\b").expect("static regex: screaming snake"));
static CAMEL_SPLIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(?<=[a-z0-9])(?=[A-Z])|[_\-]+)").expect("static regex: camel split")
});
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z0-9]+").expect("static regex: word"));

/// Two-letter technical terms that survive the length >= 2 filter even
/// though most two-letter tokens are dropped as noise.
const SHORT_ALLOW_LIST: &[&str] = &["db", "ui", "id", "io", "os", "ip", "vm", "ai", "ml"];

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any",
        "are", "as", "at", "be", "because", "been", "before", "being", "below", "between",
        "both", "but", "by", "could", "did", "do", "does", "doing", "down", "during", "each",
        "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here",
        "hers", "herself", "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it",
        "its", "itself", "just", "me", "more", "most", "my", "myself", "no", "nor", "not",
        "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours", "ourselves",
        "out", "over", "own", "same", "she", "should", "so", "some", "such", "than", "that",
        "the", "their", "theirs", "them", "themselves", "then", "there", "these", "they",
        "this", "those", "through", "to", "too", "under", "until", "up", "very", "was", "we",
        "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
        "with", "would", "you", "your", "yours", "yourself", "yourselves",
        // coding filler
        "get", "set", "make", "use", "used", "using", "new", "add", "added", "also", "like",
        "via",
    ]
    .into_iter()
    .collect()
});

fn is_allowed_short(token: &str) -> bool {
    token.chars().count() >= 2 && SHORT_ALLOW_LIST.contains(&token)
}

fn keep(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    if STOP_WORDS.contains(token) {
        return false;
    }
    token.chars().count() >= 2 && (token.chars().count() > 2 || is_allowed_short(token))
}

/// Extracts code-symbol tokens, emitted in both original case and
/// lowercased, per spec step 1.
fn extract_symbols(text: &str) -> Vec<String> {
    let mut symbols = Vec::new();
    for re in [&*BACKTICK_SYMBOL, &*METHOD_CALL] {
        for caps in re.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                symbols.push(m.as_str().to_string());
            }
        }
    }
    for re in [&*CAMEL_CASE, &*SNAKE_CASE, &*SCREAMING_SNAKE] {
        for m in re.find_iter(text) {
            symbols.push(m.as_str().to_string());
        }
    }
    symbols
}

/// Tokenizes free text plus optional tags into a bag of lowercased terms.
///
/// Procedure (spec 4.A): extract code symbols, split camelCase/underscores,
/// extract alphanumeric words, lowercase + filter stop-words/short tokens,
/// append tag tokens at [`TAG_MULTIPLICITY`].
#[must_use]
pub fn tokenize(text: &str, tags: &[String]) -> Vec<String> {
    let mut tokens = Vec::new();

    for symbol in extract_symbols(text) {
        tokens.push(symbol.clone());
        tokens.push(symbol.to_lowercase());
    }

    let split = CAMEL_SPLIT.replace_all(text, " ");
    for m in WORD.find_iter(&split) {
        let lower = m.as_str().to_lowercase();
        if keep(&lower) {
            tokens.push(lower);
        }
    }

    for tag in tags {
        for m in WORD.find_iter(tag) {
            let lower = m.as_str().to_lowercase();
            if keep(&lower) {
                for _ in 0..TAG_MULTIPLICITY {
                    tokens.push(lower.clone());
                }
            }
        }
    }

    tokens
}

/// Joins [`tokenize`]'s output with spaces, suitable for storing as a
/// precomputed `keywords` column.
#[must_use]
pub fn tokenize_to_string(text: &str, tags: &[String]) -> String {
    tokenize(text, tags).join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn drops_stop_words_and_short_tokens() {
        let tokens = tokenize("the quick brown fox jumps over a lazy dog", &[]);
        assert!(!tokens.contains(&"the".to_string()));
        assert!(tokens.contains(&"quick".to_string()));
    }

    #[test]
    fn keeps_short_allow_list_terms() {
        let tokens = tokenize("use the db and ui layers", &[]);
        assert!(tokens.contains(&"db".to_string()));
        assert!(tokens.contains(&"ui".to_string()));
    }

    #[test]
    fn splits_camel_case_and_snake_case() {
        let tokens = tokenize("getUserName and get_user_name", &[]);
        assert!(tokens.iter().any(|t| t == "user"));
        assert!(tokens.iter().any(|t| t == "name"));
    }

    #[test]
    fn extracts_backtick_symbols_in_both_cases() {
        let tokens = tokenize("call `DoTheThing` now", &[]);
        assert!(tokens.contains(&"DoTheThing".to_string()));
        assert!(tokens.contains(&"dothething".to_string()));
    }

    #[test]
    fn tags_are_tripled() {
        let tokens = tokenize("plain text", &["security".to_string()]);
        let count = tokens.iter().filter(|t| *t == "security").count();
        assert_eq!(count, TAG_MULTIPLICITY);
    }

    #[test]
    fn empty_text_yields_empty_tokens() {
        assert!(tokenize("", &[]).is_empty());
    }
}
