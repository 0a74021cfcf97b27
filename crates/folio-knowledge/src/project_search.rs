use std::sync::Arc;

use chrono::NaiveDate;
use folio_search::normalize::{any_value_matches, canonicalize};
use folio_search::recency::timeframe_end;
use folio_search::tokens::has_meaningful_terms;
use folio_search::{
    BlendedIndex, LexicalIndex, SearchSpec, Searcher, SearcherOptions, SemanticRanker,
};
use serde::{Deserialize, Serialize};

use crate::records::Project;
use crate::retrieval::Scored;

const FACET_INDEX_WEIGHT: f32 = 1.0;
const TEXT_INDEX_WEIGHT: f32 = 0.6;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectQuery {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ProjectQuery {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

pub struct ProjectFilter {
    text: String,
    languages: Vec<String>,
    frameworks: Vec<String>,
    tags: Vec<String>,
    limit: Option<usize>,
}

impl ProjectFilter {
    fn facet_count(&self) -> usize {
        self.languages.len() + self.frameworks.len() + self.tags.len()
    }
}

/// Trimmed, non-empty values, deduplicated by canonical form in first-seen order.
pub(crate) fn clean_values(values: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for value in values {
        let value = value.trim();
        let key = canonicalize(value);
        if key.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(value.to_owned());
    }
    out
}

pub struct ProjectSpec;

impl SearchSpec for ProjectSpec {
    type Record = Project;
    type Query = ProjectQuery;
    type Filter = ProjectFilter;

    fn build_filter(&self, query: &ProjectQuery) -> ProjectFilter {
        ProjectFilter {
            text: query.text.trim().to_owned(),
            languages: clean_values(&query.languages),
            frameworks: clean_values(&query.frameworks),
            tags: clean_values(&query.tags),
            limit: query.limit,
        }
    }

    fn record_id<'r>(&self, record: &'r Project) -> &'r str {
        &record.id
    }

    fn has_structured_filters(&self, filter: &ProjectFilter) -> bool {
        filter.facet_count() > 0
    }

    fn matches_structured(&self, record: &Project, filter: &ProjectFilter) -> bool {
        filter
            .languages
            .iter()
            .all(|l| any_value_matches(&record.languages, l))
            && filter
                .frameworks
                .iter()
                .all(|f| any_value_matches(&record.frameworks, f))
            && filter.tags.iter().all(|t| any_value_matches(&record.tags, t))
    }

    #[allow(clippy::cast_precision_loss)]
    fn structured_score(&self, record: &Project, filter: &ProjectFilter) -> f32 {
        let total = filter.facet_count();
        if total == 0 {
            return 0.0;
        }
        let hits = filter
            .languages
            .iter()
            .filter(|l| any_value_matches(&record.languages, l))
            .count()
            + filter
                .frameworks
                .iter()
                .filter(|f| any_value_matches(&record.frameworks, f))
                .count()
            + filter
                .tags
                .iter()
                .filter(|t| any_value_matches(&record.tags, t))
                .count();
        hits as f32 / total as f32
    }

    fn text_query(&self, filter: &ProjectFilter) -> String {
        std::iter::once(filter.text.as_str())
            .chain(filter.languages.iter().map(String::as_str))
            .chain(filter.frameworks.iter().map(String::as_str))
            .chain(filter.tags.iter().map(String::as_str))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn has_query_terms(&self, filter: &ProjectFilter) -> bool {
        filter.facet_count() > 0 || has_meaningful_terms(&filter.text)
    }

    fn requested_limit(&self, filter: &ProjectFilter) -> Option<usize> {
        filter.limit
    }

    fn timestamp(&self, record: &Project, today: NaiveDate) -> Option<NaiveDate> {
        record
            .timeframe
            .as_deref()
            .and_then(|t| timeframe_end(t, today))
    }
}

/// Ranks projects by languages, frameworks and tags plus free text.
pub struct ProjectSearcher {
    projects: Arc<[Project]>,
    searcher: Searcher<ProjectSpec>,
}

impl ProjectSearcher {
    #[must_use]
    pub fn new(projects: Arc<[Project]>, options: SearcherOptions) -> Self {
        let index = build_index(&projects);
        Self {
            searcher: Searcher::new(ProjectSpec, options).with_index(Arc::new(index)),
            projects,
        }
    }

    #[must_use]
    pub fn with_ranker(mut self, ranker: Arc<dyn SemanticRanker>) -> Self {
        self.searcher = self.searcher.with_ranker(ranker);
        self
    }

    #[must_use]
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub async fn search(&self, query: &ProjectQuery) -> Vec<Scored<Project>> {
        self.search_at(query, chrono::Utc::now().date_naive()).await
    }

    pub async fn search_at(&self, query: &ProjectQuery, today: NaiveDate) -> Vec<Scored<Project>> {
        self.searcher
            .search_at(&self.projects, query, today)
            .await
            .into_iter()
            .map(Scored::from_result)
            .collect()
    }
}

fn build_index(projects: &[Project]) -> BlendedIndex {
    let mut facets = LexicalIndex::new(&[("languages", 1.0), ("frameworks", 1.0), ("tags", 1.0)]);
    let mut text = LexicalIndex::new(&[
        ("name", 3.0),
        ("summary", 1.5),
        ("role", 1.0),
        ("body", 1.0),
    ]);
    for p in projects {
        facets.add_document(
            p.id.clone(),
            &[
                ("languages", p.languages.join(" ").as_str()),
                ("frameworks", p.frameworks.join(" ").as_str()),
                ("tags", p.tags.join(" ").as_str()),
            ],
        );
        let body = [p.description.as_str()]
            .into_iter()
            .chain(p.highlights.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        text.add_document(
            p.id.clone(),
            &[
                ("name", p.name.as_str()),
                ("summary", p.summary.as_str()),
                ("role", p.role.as_deref().unwrap_or_default()),
                ("body", body.as_str()),
            ],
        );
    }
    BlendedIndex::new(projects.iter().map(|p| p.id.clone()))
        .with_part(facets, FACET_INDEX_WEIGHT)
        .with_part(text, TEXT_INDEX_WEIGHT)
}
