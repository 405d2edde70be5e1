//! Token-level text helpers shared by the critic and rumination.

use std::collections::BTreeSet;

/// Filler words that carry no topical signal.
pub const STOPWORDS: &[&str] = &[
    "this", "that", "from", "with", "your", "have", "about", "today", "just", "into", "there",
    "would", "could", "should", "their", "while", "still",
];

/// Lower-cased alphabetic tokens of at least four letters, minus stopwords.
pub fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| word.len() >= 4)
        .map(|word| word.to_ascii_lowercase())
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .collect()
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.union(b).count();
    shared as f64 / union as f64
}

/// Similarity of two texts in [0, 1]. Identical texts always score 1.0,
/// even when neither carries any tokens.
pub fn similarity(a: &str, b: &str) -> f64 {
    if normalize(a) == normalize(b) && !a.trim().is_empty() {
        return 1.0;
    }
    jaccard(&tokens(a), &tokens(b))
}

/// Fraction of `text` tokens that also appear in `reference`.
pub fn overlap(text: &str, reference: &str) -> f64 {
    let ours = tokens(text);
    if ours.is_empty() {
        return 0.0;
    }
    let theirs = tokens(reference);
    ours.intersection(&theirs).count() as f64 / ours.len() as f64
}

/// Truncates to `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_skip_short_words_and_stopwords() {
        let toks = tokens("This is about Rust tooling, with memory systems!");
        assert!(toks.contains("rust"));
        assert!(toks.contains("tooling"));
        assert!(toks.contains("memory"));
        assert!(!toks.contains("this"));
        assert!(!toks.contains("with"));
        assert!(!toks.contains("is"));
    }

    #[test]
    fn test_identical_texts_are_fully_similar() {
        assert_eq!(similarity("ok!", "ok!"), 1.0);
        assert_eq!(similarity("memory systems rock", "Memory  systems rock"), 1.0);
    }

    #[test]
    fn test_disjoint_texts_have_zero_similarity() {
        assert_eq!(similarity("memory systems", "garden tomatoes"), 0.0);
    }

    #[test]
    fn test_partial_similarity() {
        // {memory, systems, matter} vs {memory, systems, scale}
        let sim = similarity("memory systems matter", "memory systems scale");
        assert!((sim - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_overlap_is_relative_to_text() {
        let o = overlap("memory tooling", "memory systems and developer tooling");
        assert!((o - 1.0).abs() < 1e-9);
        assert_eq!(overlap("", "anything"), 0.0);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
