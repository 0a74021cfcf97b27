use std::sync::Arc;

use chrono::NaiveDate;
use folio_search::normalize::{any_value_matches, contains_term, terms_match};
use folio_search::recency::timeframe_end;
use folio_search::tokens::has_meaningful_terms;
use folio_search::{
    BlendedIndex, LexicalIndex, SearchSpec, Searcher, SearcherOptions, SemanticRanker,
};
use serde::{Deserialize, Serialize};

use crate::project_search::clean_values;
use crate::records::{ResumeEntry, ResumeKind};
use crate::retrieval::Scored;

const FACET_INDEX_WEIGHT: f32 = 1.0;
const TEXT_INDEX_WEIGHT: f32 = 0.6;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeQuery {
    #[serde(default)]
    pub text: String,
    /// Entry kinds to search; empty means all kinds.
    #[serde(default)]
    pub kinds: Vec<ResumeKind>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub companies: Vec<String>,
    /// Restrict experiences to employment positions.
    #[serde(default)]
    pub employment_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ResumeQuery {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

pub struct ResumeFilter {
    text: String,
    kinds: Vec<ResumeKind>,
    skills: Vec<String>,
    companies: Vec<String>,
    employment_only: bool,
    limit: Option<usize>,
}

impl ResumeFilter {
    fn kind_allowed(&self, entry: &ResumeEntry) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&entry.kind()))
            && (!self.employment_only || entry.is_employment())
    }
}

/// Skill keywords of an entry; skill entries also match on their own name.
fn skill_values(entry: &ResumeEntry) -> Vec<String> {
    let mut values = entry.skills().to_vec();
    if let ResumeEntry::Skill(skill) = entry {
        values.push(skill.name.clone());
    }
    values
}

fn company_matches(entry: &ResumeEntry, wanted: &str) -> bool {
    entry
        .company_like()
        .is_some_and(|c| terms_match(c, wanted) || contains_term(c, wanted))
}

pub struct ResumeSpec;

impl SearchSpec for ResumeSpec {
    type Record = ResumeEntry;
    type Query = ResumeQuery;
    type Filter = ResumeFilter;

    fn build_filter(&self, query: &ResumeQuery) -> ResumeFilter {
        let mut kinds = query.kinds.clone();
        kinds.sort_unstable();
        kinds.dedup();
        ResumeFilter {
            text: query.text.trim().to_owned(),
            kinds,
            skills: clean_values(&query.skills),
            companies: clean_values(&query.companies),
            employment_only: query.employment_only,
            limit: query.limit,
        }
    }

    fn record_id<'r>(&self, record: &'r ResumeEntry) -> &'r str {
        record.id()
    }

    fn has_structured_filters(&self, filter: &ResumeFilter) -> bool {
        !filter.kinds.is_empty()
            || filter.employment_only
            || !filter.skills.is_empty()
            || !filter.companies.is_empty()
    }

    fn matches_structured(&self, record: &ResumeEntry, filter: &ResumeFilter) -> bool {
        if !filter.kind_allowed(record) {
            return false;
        }
        let skills = skill_values(record);
        filter.skills.iter().all(|s| any_value_matches(&skills, s))
            && filter.companies.iter().all(|c| company_matches(record, c))
    }

    fn admits_expansion(&self, record: &ResumeEntry, filter: &ResumeFilter) -> bool {
        filter.kind_allowed(record) && self.structured_score(record, filter) > 0.0
    }

    #[allow(clippy::cast_precision_loss)]
    fn structured_score(&self, record: &ResumeEntry, filter: &ResumeFilter) -> f32 {
        let mut total = filter.skills.len() + filter.companies.len();
        let mut hits = 0usize;
        if !filter.kinds.is_empty() || filter.employment_only {
            total += 1;
            if filter.kind_allowed(record) {
                hits += 1;
            }
        }
        if total == 0 {
            return 0.0;
        }
        let skills = skill_values(record);
        hits += filter
            .skills
            .iter()
            .filter(|s| any_value_matches(&skills, s))
            .count();
        hits += filter
            .companies
            .iter()
            .filter(|c| company_matches(record, c))
            .count();
        hits as f32 / total as f32
    }

    fn text_query(&self, filter: &ResumeFilter) -> String {
        std::iter::once(filter.text.as_str())
            .chain(filter.skills.iter().map(String::as_str))
            .chain(filter.companies.iter().map(String::as_str))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn has_query_terms(&self, filter: &ResumeFilter) -> bool {
        !filter.skills.is_empty()
            || !filter.companies.is_empty()
            || has_meaningful_terms(&filter.text)
    }

    fn requested_limit(&self, filter: &ResumeFilter) -> Option<usize> {
        filter.limit
    }

    fn timestamp(&self, record: &ResumeEntry, today: NaiveDate) -> Option<NaiveDate> {
        record.timeframe().and_then(|t| timeframe_end(t, today))
    }
}

/// Ranks résumé entries of every kind, favoring recent ones when recency is enabled.
pub struct ResumeSearcher {
    entries: Arc<[ResumeEntry]>,
    searcher: Searcher<ResumeSpec>,
}

impl ResumeSearcher {
    #[must_use]
    pub fn new(entries: Arc<[ResumeEntry]>, options: SearcherOptions) -> Self {
        let index = build_index(&entries);
        Self {
            searcher: Searcher::new(ResumeSpec, options).with_index(Arc::new(index)),
            entries,
        }
    }

    #[must_use]
    pub fn with_ranker(mut self, ranker: Arc<dyn SemanticRanker>) -> Self {
        self.searcher = self.searcher.with_ranker(ranker);
        self
    }

    #[must_use]
    pub fn entries(&self) -> &[ResumeEntry] {
        &self.entries
    }

    pub async fn search(&self, query: &ResumeQuery) -> Vec<Scored<ResumeEntry>> {
        self.search_at(query, chrono::Utc::now().date_naive()).await
    }

    pub async fn search_at(
        &self,
        query: &ResumeQuery,
        today: NaiveDate,
    ) -> Vec<Scored<ResumeEntry>> {
        self.searcher
            .search_at(&self.entries, query, today)
            .await
            .into_iter()
            .map(Scored::from_result)
            .collect()
    }
}

fn build_index(entries: &[ResumeEntry]) -> BlendedIndex {
    let mut facets = LexicalIndex::new(&[("skills", 1.0), ("company", 1.0)]);
    let mut text = LexicalIndex::new(&[
        ("title", 3.0),
        ("company", 2.0),
        ("summary", 1.5),
        ("body", 1.0),
    ]);
    for entry in entries {
        let skills = skill_values(entry).join(" ");
        let company = entry.company_like().unwrap_or_default();
        facets.add_document(
            entry.id(),
            &[("skills", skills.as_str()), ("company", company)],
        );
        let body = entry.body();
        text.add_document(
            entry.id(),
            &[
                ("title", entry.title_like()),
                ("company", company),
                ("summary", entry.summary()),
                ("body", body.as_str()),
            ],
        );
    }
    BlendedIndex::new(entries.iter().map(|e| e.id().to_owned()))
        .with_part(facets, FACET_INDEX_WEIGHT)
        .with_part(text, TEXT_INDEX_WEIGHT)
}
