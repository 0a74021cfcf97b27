//! Scoring primitives and the weighted multi-signal ranking engine.
//!
//! The [`searcher::Searcher`] fuses four signals per record: a structured
//! filter score supplied by a [`searcher::SearchSpec`], a lexical score from a
//! [`lexical::TextIndex`], an embedding similarity from a
//! [`searcher::SemanticRanker`] and a recency decay. Ordering is fully
//! deterministic: fused score, then base score, then insertion order.

pub mod error;
pub mod lexical;
pub mod normalize;
pub mod recency;
pub mod searcher;
pub mod similarity;
pub mod tokens;

pub use error::SearchError;
pub use lexical::{BlendedIndex, LexicalIndex, LexicalMatch, TextIndex};
pub use searcher::{
    ScoreBreakdown, SearchResult, SearchSpec, Searcher, SearcherOptions, SemanticMatch,
    SemanticRanker,
};
