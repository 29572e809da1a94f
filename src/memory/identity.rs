//! User name extraction from remembered facts.
//!
//! Keywords match in any case, the captured name must be capitalized. The graph writes
//! facts as sentences ("The user's name is Alex"), so a capitalized word after an
//! introduction phrase is a name far more often than not.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use super::types::Fact;

/// Introduction phrases, strongest first.
const INTRODUCTION_PATTERNS: &[&str] = &[
    r"(?i:(?:user'?s?\s+)?name\s+is)\s+([A-Z][a-z]+)",
    r"\b(?i:i'?m|i am|my name is)\s+([A-Z][a-z]+)",
    r"\b(?i:called)\s+([A-Z][a-z]+)",
    r"(?i:goes by)\s+([A-Z][a-z]+)",
    r"(?i:identified (?:as|themselves as))\s+([A-Z][a-z]+)",
    r"(?i:introduced (?:as|themselves as))\s+([A-Z][a-z]+)",
    r"([A-Z][a-z]+)\s+(?i:is the user|is the human)",
    r"(?i:the user(?:'s name)? is)\s+([A-Z][a-z]+)",
];

/// A fact that opens with a name followed by something the user did.
const SUBJECT_PATTERN: &str = r"^([A-Z][a-z]+)\s+(?:has|wants|likes|said|asked|mentioned|is|intends|lives|works|prefers|enjoys)\b";

/// Words that look like names in these patterns but are not.
const NOT_NAMES: &[&str] = &[
    "the", "a", "an", "user", "assistant", "system", "ai", "today", "tomorrow", "yesterday",
    "now", "then", "this", "that", "they", "their", "he", "she", "it", "we", "you", "i",
    "kwami",
];

fn introduction_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile(INTRODUCTION_PATTERNS))
}

fn subject_pattern() -> &'static [Regex] {
    static PATTERN: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| compile(&[SUBJECT_PATTERN]))
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!("Invalid name pattern {}: {}", p, e);
                None
            }
        })
        .collect()
}

fn is_valid_name(candidate: &str, kwami_name: &str) -> bool {
    let lower = candidate.to_lowercase();
    candidate.chars().count() >= 2
        && candidate.chars().next().is_some_and(|c| c.is_uppercase())
        && candidate.chars().all(|c| c.is_alphabetic())
        && !NOT_NAMES.contains(&lower.as_str())
        && lower != kwami_name.to_lowercase()
}

/// Name the user introduced themselves with in `text`, if any.
pub fn name_from_text(text: &str, kwami_name: &str) -> Option<String> {
    introduction_patterns()
        .iter()
        .filter_map(|re| re.captures(text))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .find(|name| is_valid_name(name, kwami_name))
}

/// Best guess at the user's name from remembered facts.
///
/// An explicit introduction wins. Otherwise the name that most often opens a fact
/// ("Alex likes jazz") is used; ties go to the name seen first.
pub fn extract_user_name(facts: &[Fact], kwami_name: &str) -> Option<String> {
    if let Some(name) = facts
        .iter()
        .find_map(|f| name_from_text(&f.text, kwami_name))
    {
        return Some(name);
    }

    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (order, fact) in facts.iter().enumerate() {
        let candidate = subject_pattern()
            .iter()
            .find_map(|re| re.captures(fact.text.trim()))
            .and_then(|cap| cap.get(1).map(|m| m.as_str().to_string()));

        if let Some(name) = candidate.filter(|n| is_valid_name(n, kwami_name)) {
            counts.entry(name).or_insert((0, order)).0 += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|(_, (a, first_a)), (_, (b, first_b))| a.cmp(b).then(first_b.cmp(first_a)))
        .map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(texts: &[&str]) -> Vec<Fact> {
        texts.iter().map(|t| Fact::new(*t, 0.9)).collect()
    }

    #[test]
    fn test_explicit_introductions() {
        let cases = [
            ("The user's name is Alex", "Alex"),
            ("User name is Priya", "Priya"),
            ("hello, I'm Sam", "Sam"),
            ("The user goes by Jo", "Jo"),
            ("The user introduced themselves as Marta", "Marta"),
            ("Kenji is the user", "Kenji"),
        ];
        for (text, expected) in cases {
            assert_eq!(
                name_from_text(text, "Kwami").as_deref(),
                Some(expected),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_lowercase_words_are_not_names() {
        assert_eq!(name_from_text("i'm tired today", "Kwami"), None);
        assert_eq!(name_from_text("The user is called The", "Kwami"), None);
    }

    #[test]
    fn test_agent_name_is_never_the_user() {
        assert_eq!(name_from_text("My name is Kwami", "Kwami"), None);
        assert_eq!(name_from_text("I am Nova", "Nova"), None);
        assert_eq!(
            name_from_text("I am Nova", "Kwami").as_deref(),
            Some("Nova")
        );
    }

    #[test]
    fn test_introduction_beats_frequency() {
        let found = extract_user_name(
            &facts(&[
                "Mia likes jazz",
                "Mia works at a bakery",
                "The user's name is Alex",
            ]),
            "Kwami",
        );
        assert_eq!(found.as_deref(), Some("Alex"));
    }

    #[test]
    fn test_most_frequent_subject_wins() {
        let found = extract_user_name(
            &facts(&[
                "Jordan likes hiking",
                "Kwami is a helpful assistant",
                "Sam mentioned a sister",
                "Jordan works remotely",
                "Jordan prefers tea",
            ]),
            "Kwami",
        );
        assert_eq!(found.as_deref(), Some("Jordan"));
    }

    #[test]
    fn test_no_name_in_facts() {
        assert_eq!(
            extract_user_name(&facts(&["User likes coffee", "The weather was cold"]), "Kwami"),
            None
        );
        assert_eq!(extract_user_name(&[], "Kwami"), None);
    }
}
