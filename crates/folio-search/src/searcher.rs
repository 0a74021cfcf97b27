use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::SearchError;
use crate::lexical::TextIndex;
use crate::recency::recency_score;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Weight of the lexical score in the base score.
pub const TEXT_WEIGHT: f32 = 0.3;
/// Weight of the semantic score in the base score.
pub const SEMANTIC_WEIGHT: f32 = 0.5;
pub const DEFAULT_RECENCY_LAMBDA: f32 = 0.2;
/// Per-position bonus keeping lexical rank order stable under equal scores.
const TIE_BREAK_EPSILON: f32 = 1e-6;
const MIN_EXPANSION_CAP: usize = 10;

/// Domain knowledge the ranking engine needs about one record type.
///
/// `Filter` is the normalized form of a caller's `Query`; every predicate and
/// score is computed against the filter, never the raw query.
pub trait SearchSpec: Send + Sync {
    type Record: Send + Sync;
    type Query: Send + Sync;
    type Filter: Send + Sync;

    fn build_filter(&self, query: &Self::Query) -> Self::Filter;

    fn record_id<'r>(&self, record: &'r Self::Record) -> &'r str;

    fn has_structured_filters(&self, filter: &Self::Filter) -> bool;

    /// Strict predicate: the record satisfies every structured facet.
    fn matches_structured(&self, record: &Self::Record, filter: &Self::Filter) -> bool;

    /// Predicate re-checked before a lexical or semantic hit may join an
    /// under-filled candidate pool. Defaults to "at least one facet matches".
    fn admits_expansion(&self, record: &Self::Record, filter: &Self::Filter) -> bool {
        self.structured_score(record, filter) > 0.0
    }

    /// Structured relevance, 0.0 when nothing matches.
    fn structured_score(&self, record: &Self::Record, filter: &Self::Filter) -> f32;

    /// Combined free-text and structured terms sent to the lexical and semantic signals.
    fn text_query(&self, filter: &Self::Filter) -> String;

    /// Whether the query carries any terms at all.
    fn has_query_terms(&self, filter: &Self::Filter) -> bool;

    /// Per-query limit request; clamped by [`SearcherOptions`].
    fn requested_limit(&self, _filter: &Self::Filter) -> Option<usize> {
        None
    }

    /// Timestamp used for recency decay.
    fn timestamp(&self, _record: &Self::Record, _today: NaiveDate) -> Option<NaiveDate> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticMatch {
    pub id: String,
    pub score: f32,
}

/// Embedding-similarity seam; awaited at most once per search.
pub trait SemanticRanker: Send + Sync {
    /// Similarity of `query` to each record in `candidate_ids`. Ids without an
    /// embedding are simply absent from the result.
    fn score<'a>(
        &'a self,
        query: &'a str,
        candidate_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<SemanticMatch>, SearchError>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearcherOptions {
    pub default_limit: usize,
    pub min_limit: usize,
    pub max_limit: usize,
    /// Weight of the recency term; `None` disables recency.
    pub recency_lambda: Option<f32>,
}

impl Default for SearcherOptions {
    fn default() -> Self {
        Self {
            default_limit: 8,
            min_limit: 1,
            max_limit: 50,
            recency_lambda: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub structured: f32,
    pub text: f32,
    pub semantic: f32,
    /// Recency in `[0, 1]`, present only when recency is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recency: Option<f32>,
}

impl ScoreBreakdown {
    fn has_signal(&self) -> bool {
        self.structured > 0.0 || self.text > 0.0 || self.semantic > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult<'r, R> {
    pub record: &'r R,
    /// `structured + 0.3·text + 0.5·semantic`.
    pub base_score: f32,
    /// `base_score` plus the weighted recency term; the primary sort key.
    pub sort_score: f32,
    pub breakdown: ScoreBreakdown,
}

struct Candidate {
    position: usize,
    base_score: f32,
    sort_score: f32,
    breakdown: ScoreBreakdown,
}

pub struct Searcher<S: SearchSpec> {
    spec: S,
    options: SearcherOptions,
    index: Option<Arc<dyn TextIndex>>,
    ranker: Option<Arc<dyn SemanticRanker>>,
}

impl<S: SearchSpec> Searcher<S> {
    #[must_use]
    pub fn new(spec: S, mut options: SearcherOptions) -> Self {
        options.min_limit = options.min_limit.max(1);
        options.max_limit = options.max_limit.max(options.min_limit);
        Self {
            spec,
            options,
            index: None,
            ranker: None,
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn TextIndex>) -> Self {
        self.index = Some(index);
        self
    }

    #[must_use]
    pub fn with_ranker(mut self, ranker: Arc<dyn SemanticRanker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    #[must_use]
    pub fn spec(&self) -> &S {
        &self.spec
    }

    #[must_use]
    pub fn options(&self) -> &SearcherOptions {
        &self.options
    }

    fn resolve_limit(&self, filter: &S::Filter) -> usize {
        self.spec
            .requested_limit(filter)
            .unwrap_or(self.options.default_limit)
            .clamp(self.options.min_limit, self.options.max_limit)
    }

    /// Rank `records` for `query` using today's date for recency.
    pub async fn search<'r>(
        &self,
        records: &'r [S::Record],
        query: &S::Query,
    ) -> Vec<SearchResult<'r, S::Record>> {
        self.search_at(records, query, chrono::Utc::now().date_naive())
            .await
    }

    /// Rank `records` for `query` with recency measured against `today`.
    pub async fn search_at<'r>(
        &self,
        records: &'r [S::Record],
        query: &S::Query,
        today: NaiveDate,
    ) -> Vec<SearchResult<'r, S::Record>> {
        let filter = self.spec.build_filter(query);
        let has_structured = self.spec.has_structured_filters(&filter);
        let limit = self.resolve_limit(&filter);

        let mut positions: HashMap<&str, Vec<usize>> = HashMap::with_capacity(records.len());
        for (pos, record) in records.iter().enumerate() {
            positions
                .entry(self.spec.record_id(record))
                .or_default()
                .push(pos);
        }

        let structured: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| !has_structured || self.spec.matches_structured(r, &filter))
            .map(|(pos, _)| pos)
            .collect();

        let text_query = self.spec.text_query(&filter);
        let text_query = text_query.trim();

        let lexical = self.lexical_scores(text_query, &positions);

        let needs_expansion = has_structured && structured.len() < limit;
        let expansion_cap = (limit * 3).max(MIN_EXPANSION_CAP);

        let semantic_pool: Vec<usize> = if needs_expansion {
            (0..records.len()).collect()
        } else {
            structured.clone()
        };
        let semantic = self
            .semantic_scores(text_query, records, &semantic_pool, &positions)
            .await;

        let mut pool = structured.clone();
        if needs_expansion {
            self.expand_pool(
                &mut pool,
                records,
                &filter,
                &lexical,
                &semantic,
                expansion_cap,
            );
        }

        let mut candidates: Vec<Candidate> = pool
            .iter()
            .map(|&pos| {
                self.score_candidate(pos, &records[pos], &filter, &lexical, &semantic, today)
            })
            .collect();

        if self.spec.has_query_terms(&filter) && candidates.iter().any(|c| c.breakdown.has_signal())
        {
            candidates.retain(|c| c.breakdown.has_signal());
        }

        candidates.sort_by(|a, b| {
            b.sort_score
                .total_cmp(&a.sort_score)
                .then(b.base_score.total_cmp(&a.base_score))
                .then(a.position.cmp(&b.position))
        });

        let mut seen: HashSet<&str> = HashSet::with_capacity(candidates.len());
        let mut results = Vec::with_capacity(limit.min(candidates.len()));
        for c in candidates {
            let record = &records[c.position];
            if !seen.insert(self.spec.record_id(record)) {
                continue;
            }
            results.push(SearchResult {
                record,
                base_score: c.base_score,
                sort_score: c.sort_score,
                breakdown: c.breakdown,
            });
            if results.len() == limit {
                break;
            }
        }

        tracing::debug!(
            records = records.len(),
            structured_matches = structured.len(),
            lexical_matches = lexical.len(),
            semantic_matches = semantic.len(),
            expanded = needs_expansion,
            pool = pool.len(),
            returned = results.len(),
            limit,
            "search completed"
        );

        results
    }

    fn lexical_scores(
        &self,
        text_query: &str,
        positions: &HashMap<&str, Vec<usize>>,
    ) -> HashMap<usize, f32> {
        let mut scores = HashMap::new();
        let Some(index) = self.index.as_ref() else {
            return scores;
        };
        if text_query.is_empty() {
            return scores;
        }
        let matches = index.search(text_query);
        let total = matches.len();
        for (rank, m) in matches.into_iter().enumerate() {
            let Some(hits) = positions.get(m.id.as_str()) else {
                continue;
            };
            #[allow(clippy::cast_precision_loss)]
            let tie_break = (total - rank) as f32 * TIE_BREAK_EPSILON;
            let score = m.score + tie_break;
            for &pos in hits {
                scores
                    .entry(pos)
                    .and_modify(|s: &mut f32| *s = s.max(score))
                    .or_insert(score);
            }
        }
        scores
    }

    async fn semantic_scores(
        &self,
        text_query: &str,
        records: &[S::Record],
        pool: &[usize],
        positions: &HashMap<&str, Vec<usize>>,
    ) -> HashMap<usize, f32> {
        let mut scores = HashMap::new();
        let Some(ranker) = self.ranker.as_ref() else {
            return scores;
        };
        if text_query.is_empty() || pool.is_empty() {
            return scores;
        }
        let ids: Vec<String> = pool
            .iter()
            .map(|&pos| self.spec.record_id(&records[pos]).to_owned())
            .collect();
        match ranker.score(text_query, &ids).await {
            Ok(matches) => {
                for m in matches {
                    if m.score <= 0.0 {
                        continue;
                    }
                    for &pos in positions.get(m.id.as_str()).into_iter().flatten() {
                        scores.insert(pos, m.score);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("semantic scoring skipped: {e}");
            }
        }
        scores
    }

    fn expand_pool(
        &self,
        pool: &mut Vec<usize>,
        records: &[S::Record],
        filter: &S::Filter,
        lexical: &HashMap<usize, f32>,
        semantic: &HashMap<usize, f32>,
        cap: usize,
    ) {
        let mut seen: HashSet<usize> = pool.iter().copied().collect();
        let ranked = |scores: &HashMap<usize, f32>| {
            let mut v: Vec<(usize, f32)> = scores.iter().map(|(&p, &s)| (p, s)).collect();
            v.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            v
        };

        for (pos, _) in ranked(lexical).into_iter().chain(ranked(semantic)) {
            if pool.len() >= cap {
                break;
            }
            if seen.contains(&pos) || !self.spec.admits_expansion(&records[pos], filter) {
                continue;
            }
            seen.insert(pos);
            pool.push(pos);
        }
    }

    fn score_candidate(
        &self,
        position: usize,
        record: &S::Record,
        filter: &S::Filter,
        lexical: &HashMap<usize, f32>,
        semantic: &HashMap<usize, f32>,
        today: NaiveDate,
    ) -> Candidate {
        let structured = self.spec.structured_score(record, filter).max(0.0);
        let text = lexical.get(&position).copied().unwrap_or(0.0);
        let semantic = semantic.get(&position).copied().unwrap_or(0.0);
        let base_score = structured + TEXT_WEIGHT * text + SEMANTIC_WEIGHT * semantic;

        let recency = self
            .options
            .recency_lambda
            .map(|_| recency_score(self.spec.timestamp(record, today), today));
        let sort_score = match (recency, self.options.recency_lambda) {
            (Some(r), Some(lambda)) => base_score + r * lambda,
            _ => base_score,
        };

        Candidate {
            position,
            base_score,
            sort_score,
            breakdown: ScoreBreakdown {
                structured,
                text,
                semantic,
                recency,
            },
        }
    }
}
