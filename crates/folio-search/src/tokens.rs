//! Tokenization and per-token weighting for lexical scoring.

use crate::normalize::{canonical_term, normalize_text};

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "been", "but", "by", "can",
    "could", "did", "do", "does", "for", "from", "give", "had", "has", "have", "he", "her", "his",
    "how", "i", "if", "in", "into", "is", "it", "its", "list", "me", "more", "my", "of", "on",
    "or", "our", "please", "she", "show", "so", "some", "tell", "than", "that", "the", "their",
    "them", "there", "they", "this", "to", "us", "was", "we", "were", "what", "when", "where",
    "which", "who", "why", "will", "with", "would", "you", "your",
];

#[must_use]
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.binary_search(&token).is_ok()
}

/// Normalized, canonicalized tokens of `text` in order (stopwords included).
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_text(text)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(|t| canonical_term(t).to_owned())
        .collect()
}

/// Relative importance of a token for lexical matching.
///
/// Stopwords carry no weight, single characters and pure numbers little,
/// long specific terms slightly more than average.
#[must_use]
pub fn token_weight(token: &str) -> f32 {
    if token.is_empty() || is_stopword(token) {
        return 0.0;
    }
    let len = token.chars().count();
    if len == 1 && !token.ends_with(['+', '#']) {
        return 0.2;
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        return 0.5;
    }
    if len >= 8 { 1.2 } else { 1.0 }
}

/// A query term with its weight.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedTerm {
    pub term: String,
    pub weight: f32,
}

/// Distinct weighted terms of `text` in first-seen order, zero-weight terms dropped.
#[must_use]
pub fn weighted_terms(text: &str) -> Vec<WeightedTerm> {
    let mut out: Vec<WeightedTerm> = Vec::new();
    for token in tokenize(text) {
        let weight = token_weight(&token);
        if weight <= 0.0 || out.iter().any(|t| t.term == token) {
            continue;
        }
        out.push(WeightedTerm {
            term: token,
            weight,
        });
    }
    out
}

/// Whether `text` contains at least one weighted (non-stopword) term.
#[must_use]
pub fn has_meaningful_terms(text: &str) -> bool {
    !weighted_terms(text).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwords_sorted_for_binary_search() {
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOPWORDS);
    }

    #[test]
    fn tokenize_canonicalizes() {
        assert_eq!(tokenize("Built with JS and K8s!"), vec![
            "built",
            "with",
            "javascript",
            "and",
            "kubernetes"
        ]);
    }

    #[test]
    fn weights() {
        assert_eq!(token_weight("the"), 0.0);
        assert_eq!(token_weight("x"), 0.2);
        assert_eq!(token_weight("c#"), 1.0);
        assert_eq!(token_weight("2021"), 0.5);
        assert_eq!(token_weight("rust"), 1.0);
        assert_eq!(token_weight("distributed"), 1.2);
    }

    #[test]
    fn weighted_terms_dedup_and_drop_stopwords() {
        let terms = weighted_terms("Tell me about the Rust rust projects");
        let names: Vec<_> = terms.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(names, vec!["rust", "projects"]);
    }

    #[test]
    fn meaningful_terms() {
        assert!(!has_meaningful_terms("what is the"));
        assert!(has_meaningful_terms("what is kafka"));
        assert!(!has_meaningful_terms(""));
    }
}
