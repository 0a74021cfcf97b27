//! In-memory BM25 index with per-field boosts and prefix matching.

use std::collections::HashMap;

use crate::tokens::{tokenize, weighted_terms};

const K1: f32 = 1.2;
const B: f32 = 0.75;
/// Fraction of an exact hit credited to a prefix hit.
const PREFIX_FACTOR: f32 = 0.5;
const MIN_PREFIX_LEN: usize = 3;

/// One lexical hit. Scores are normalized so the best hit of a query scores 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalMatch {
    pub id: String,
    pub score: f32,
}

/// Lexical search seam used by the ranking engine.
pub trait TextIndex: Send + Sync {
    /// Matches for `query`, best first; ties keep document insertion order.
    fn search(&self, query: &str) -> Vec<LexicalMatch>;
}

struct IndexedDoc {
    id: String,
    /// Boost-weighted term frequencies.
    terms: HashMap<String, f32>,
    length: f32,
}

/// BM25 index over documents made of named, boosted fields.
pub struct LexicalIndex {
    boosts: HashMap<String, f32>,
    docs: Vec<IndexedDoc>,
    doc_freq: HashMap<String, usize>,
    total_length: f32,
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("boosts", &self.boosts)
            .field("docs", &self.docs.len())
            .field("terms", &self.doc_freq.len())
            .finish()
    }
}

impl LexicalIndex {
    /// Create an index; fields missing from `boosts` get boost 1.0.
    #[must_use]
    pub fn new(boosts: &[(&str, f32)]) -> Self {
        Self {
            boosts: boosts
                .iter()
                .map(|(field, boost)| ((*field).to_owned(), *boost))
                .collect(),
            docs: Vec::new(),
            doc_freq: HashMap::new(),
            total_length: 0.0,
        }
    }

    /// Index a document given as `(field, text)` pairs.
    pub fn add_document(&mut self, id: impl Into<String>, fields: &[(&str, &str)]) {
        let mut terms: HashMap<String, f32> = HashMap::new();
        let mut length = 0.0;
        for (field, text) in fields {
            let boost = self.boosts.get(*field).copied().unwrap_or(1.0);
            for token in tokenize(text) {
                *terms.entry(token).or_insert(0.0) += boost;
                length += boost;
            }
        }
        for term in terms.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_length += length;
        self.docs.push(IndexedDoc {
            id: id.into(),
            terms,
            length,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn idf(&self, term: &str) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let n = self.docs.len() as f32;
        #[allow(clippy::cast_precision_loss)]
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    fn term_score(&self, tf: f32, doc_len: f32, avg_len: f32, idf: f32) -> f32 {
        let norm = K1 * (1.0 - B + B * doc_len / avg_len.max(f32::EPSILON));
        idf * (tf * (K1 + 1.0)) / (tf + norm)
    }

    fn raw_scores(&self, query: &str) -> Vec<(usize, f32)> {
        let query_terms = weighted_terms(query);
        if query_terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }
        #[allow(clippy::cast_precision_loss)]
        let avg_len = self.total_length / self.docs.len() as f32;

        let mut scores = Vec::new();
        for (pos, doc) in self.docs.iter().enumerate() {
            let mut score = 0.0;
            for qt in &query_terms {
                if let Some(&tf) = doc.terms.get(&qt.term) {
                    score += qt.weight * self.term_score(tf, doc.length, avg_len, self.idf(&qt.term));
                    continue;
                }
                if qt.term.chars().count() < MIN_PREFIX_LEN {
                    continue;
                }
                let best_prefix = doc
                    .terms
                    .iter()
                    .filter(|(term, _)| term.starts_with(qt.term.as_str()))
                    .map(|(term, &tf)| self.term_score(tf, doc.length, avg_len, self.idf(term)))
                    .fold(0.0_f32, f32::max);
                score += qt.weight * PREFIX_FACTOR * best_prefix;
            }
            if score > 0.0 {
                scores.push((pos, score));
            }
        }
        scores
    }
}

impl TextIndex for LexicalIndex {
    fn search(&self, query: &str) -> Vec<LexicalMatch> {
        let scores = self.raw_scores(query);
        let matches = scores
            .into_iter()
            .map(|(pos, score)| (pos, self.docs[pos].id.clone(), score))
            .collect();
        normalize_and_sort(matches)
    }
}

/// Several indices over the same documents, blended by weight.
///
/// Used to combine a structured-field index (tags, languages, skills) with a
/// free-text index (titles, descriptions) into one lexical signal.
#[derive(Default)]
pub struct BlendedIndex {
    parts: Vec<(Box<dyn TextIndex>, f32)>,
    order: HashMap<String, usize>,
}

impl BlendedIndex {
    /// `order` lists document ids in insertion order and fixes tie-breaks.
    #[must_use]
    pub fn new(order: impl IntoIterator<Item = String>) -> Self {
        let mut positions = HashMap::new();
        for (pos, id) in order.into_iter().enumerate() {
            positions.entry(id).or_insert(pos);
        }
        Self {
            parts: Vec::new(),
            order: positions,
        }
    }

    #[must_use]
    pub fn with_part(mut self, index: impl TextIndex + 'static, weight: f32) -> Self {
        self.parts.push((Box::new(index), weight));
        self
    }
}

impl TextIndex for BlendedIndex {
    fn search(&self, query: &str) -> Vec<LexicalMatch> {
        let mut combined: HashMap<String, f32> = HashMap::new();
        for (index, weight) in &self.parts {
            for m in index.search(query) {
                *combined.entry(m.id).or_insert(0.0) += m.score * weight;
            }
        }
        let matches = combined
            .into_iter()
            .map(|(id, score)| {
                let pos = self.order.get(&id).copied().unwrap_or(usize::MAX);
                (pos, id, score)
            })
            .collect();
        normalize_and_sort(matches)
    }
}

fn normalize_and_sort(mut matches: Vec<(usize, String, f32)>) -> Vec<LexicalMatch> {
    let max = matches.iter().map(|(_, _, s)| *s).fold(0.0_f32, f32::max);
    if max <= 0.0 {
        return Vec::new();
    }
    matches.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)).then(a.1.cmp(&b.1)));
    matches
        .into_iter()
        .map(|(_, id, score)| LexicalMatch {
            id,
            score: score / max,
        })
        .collect()
}
