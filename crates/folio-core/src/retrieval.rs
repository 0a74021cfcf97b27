//! Executes a normalized plan against the retrieval driver.

use std::collections::HashSet;

use folio_knowledge::{
    Award, Education, Experience, Profile, Project, ProjectQuery, ResumeEntry, ResumeKind,
    ResumeQuery, RetrievalDriver, Skill,
};
use folio_search::normalize::canonicalize;
use folio_search::tokens::weighted_terms;
use futures::future::join_all;
use serde::Serialize;

use crate::cache::LruStore;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::plan::{AnswerLength, ExperienceScope, RetrievalPlan, RetrievalRequest, RetrievalSource};

const LOW_CONFIDENCE: f32 = 0.5;
const HIGH_CONFIDENCE: f32 = 0.8;
const LOW_CONFIDENCE_BUMP: usize = 4;
const CONCISE_TOP_K: usize = 3;
const VAGUE_TOPIC_TERMS: usize = 2;

/// Documents retrieved for one turn, deduplicated by id per slice.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub projects: Vec<Project>,
    pub experiences: Vec<Experience>,
    pub education: Vec<Education>,
    pub awards: Vec<Award>,
    pub skills: Vec<Skill>,
    pub profile: Option<Profile>,
}

impl RetrievalResult {
    /// Number of documents across all slices, profile included.
    #[must_use]
    pub fn total_documents(&self) -> usize {
        self.projects.len()
            + self.experiences.len()
            + self.education.len()
            + self.awards.len()
            + self.skills.len()
            + usize::from(self.profile.is_some())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_documents() == 0
    }

    fn push_project(&mut self, project: Project) {
        if !self.projects.iter().any(|p| p.id == project.id) {
            self.projects.push(project);
        }
    }

    fn push_resume(&mut self, entry: ResumeEntry) {
        match entry {
            ResumeEntry::Experience(e) => push_unique(&mut self.experiences, e, |x| &x.id),
            ResumeEntry::Education(e) => push_unique(&mut self.education, e, |x| &x.id),
            ResumeEntry::Award(a) => push_unique(&mut self.awards, a, |x| &x.id),
            ResumeEntry::Skill(s) => push_unique(&mut self.skills, s, |x| &x.id),
        }
    }
}

fn push_unique<T>(items: &mut Vec<T>, item: T, id: impl Fn(&T) -> &String) {
    if !items.iter().any(|existing| id(existing) == id(&item)) {
        items.push(item);
    }
}

/// Cached hits of a single request.
#[derive(Debug, Clone)]
pub enum CachedHits {
    Projects(Vec<Project>),
    Resume(Vec<ResumeEntry>),
}

impl CachedHits {
    fn len(&self) -> usize {
        match self {
            Self::Projects(p) => p.len(),
            Self::Resume(r) => r.len(),
        }
    }
}

/// What one request resolved to, for the reasoning trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutedRequest {
    pub source: RetrievalSource,
    pub query: String,
    pub top_k: usize,
    pub hits: usize,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub result: RetrievalResult,
    pub executed: Vec<ExecutedRequest>,
}

/// Effective result count for `request` under `plan`.
#[must_use]
pub fn effective_top_k(
    request: &RetrievalRequest,
    plan: &RetrievalPlan,
    config: &PipelineConfig,
) -> usize {
    let max = config.max_top_k.max(1);
    if plan.enumerate_all_relevant {
        return config.enumeration_top_k.max(1);
    }
    if plan.is_meta() {
        return config.meta_top_k.clamp(1, max);
    }

    let mut k = request.top_k.unwrap_or(config.default_top_k).min(max);
    let vague = weighted_terms(&plan.topic).len() < VAGUE_TOPIC_TERMS;
    if plan.planner_confidence < LOW_CONFIDENCE || vague {
        k += LOW_CONFIDENCE_BUMP;
    } else if plan.planner_confidence >= HIGH_CONFIDENCE
        && plan.answer_length_hint == AnswerLength::Brief
    {
        k = k.min(CONCISE_TOP_K);
    }
    k.clamp(1, max)
}

fn cache_key(
    owner_id: &str,
    request: &RetrievalRequest,
    top_k: usize,
    plan: &RetrievalPlan,
) -> String {
    let facets: Vec<&str> = plan.resume_facets.iter().map(|f| f.as_str()).collect();
    format!(
        "{owner_id}|{}|{}|{top_k}|{}|{:?}|{:?}|{}",
        request.source.as_str(),
        canonicalize(&request.query),
        facets.join(","),
        plan.experience_scope,
        plan.intent,
        plan.enumerate_all_relevant,
    )
}

fn resume_query(request: &RetrievalRequest, top_k: usize, plan: &RetrievalPlan) -> ResumeQuery {
    let employment_only = plan.experience_scope == ExperienceScope::EmploymentOnly;
    let kinds = if employment_only {
        vec![ResumeKind::Experience]
    } else {
        plan.resume_facets.clone()
    };
    ResumeQuery {
        text: request.query.clone(),
        kinds,
        employment_only,
        limit: Some(top_k),
        ..ResumeQuery::default()
    }
}

async fn fetch(
    driver: &dyn RetrievalDriver,
    request: &RetrievalRequest,
    top_k: usize,
    plan: &RetrievalPlan,
) -> Result<CachedHits, PipelineError> {
    let hits = match request.source {
        RetrievalSource::Projects => {
            let query = ProjectQuery {
                text: request.query.clone(),
                limit: Some(top_k),
                ..ProjectQuery::default()
            };
            let hits = driver.search_projects(&query).await?;
            CachedHits::Projects(hits.into_iter().map(|s| s.record).collect())
        }
        RetrievalSource::Resume => {
            let query = resume_query(request, top_k, plan);
            let hits = driver.search_resume(&query).await?;
            CachedHits::Resume(hits.into_iter().map(|s| s.record).collect())
        }
        // fetched once per turn in `execute`
        RetrievalSource::Profile => CachedHits::Resume(Vec::new()),
    };
    Ok(hits)
}

/// Run every request of `plan`, merging and deduplicating the hits.
///
/// # Errors
///
/// Returns `PipelineError::Retrieval` when the driver fails.
pub async fn execute(
    driver: &dyn RetrievalDriver,
    cache: &LruStore<String, CachedHits>,
    plan: &RetrievalPlan,
    owner_id: &str,
    config: &PipelineConfig,
) -> Result<RetrievalOutcome, PipelineError> {
    let searches: Vec<(&RetrievalRequest, usize)> = plan
        .retrieval_requests
        .iter()
        .filter(|r| r.source != RetrievalSource::Profile)
        .map(|r| (r, effective_top_k(r, plan, config)))
        .collect();
    let wants_profile = plan
        .retrieval_requests
        .iter()
        .any(|r| r.source == RetrievalSource::Profile);

    let fetched = join_all(searches.iter().map(|&(request, top_k)| async move {
        let key = cache_key(owner_id, request, top_k, plan);
        if let Some(hits) = cache.get(&key) {
            return Ok((hits, true));
        }
        let hits = fetch(driver, request, top_k, plan).await?;
        cache.put(key, hits.clone());
        Ok::<_, PipelineError>((hits, false))
    }))
    .await;

    let mut outcome = RetrievalOutcome::default();
    for ((request, top_k), fetched) in searches.into_iter().zip(fetched) {
        let (hits, cache_hit) = fetched?;
        outcome.executed.push(ExecutedRequest {
            source: request.source,
            query: request.query.clone(),
            top_k,
            hits: hits.len(),
            cache_hit,
        });
        match hits {
            CachedHits::Projects(projects) => {
                for project in projects {
                    outcome.result.push_project(project);
                }
            }
            CachedHits::Resume(entries) => {
                for entry in entries {
                    outcome.result.push_resume(entry);
                }
            }
        }
    }

    if wants_profile {
        outcome.result.profile = driver.profile().await?;
    }

    if plan.experience_scope == ExperienceScope::EmploymentOnly {
        restrict_to_employment(driver, &mut outcome.result).await?;
    }

    tracing::debug!(
        requests = outcome.executed.len(),
        cache_hits = outcome.executed.iter().filter(|e| e.cache_hit).count(),
        documents = outcome.result.total_documents(),
        "retrieval complete"
    );
    Ok(outcome)
}

async fn restrict_to_employment(
    driver: &dyn RetrievalDriver,
    result: &mut RetrievalResult,
) -> Result<(), PipelineError> {
    result.education.clear();
    result.awards.clear();
    result.skills.clear();
    result.experiences.retain(|e| e.kind.is_employment());

    let known: HashSet<&str> = result.projects.iter().map(|p| p.id.as_str()).collect();
    let mut linked: Vec<String> = Vec::new();
    for id in result.experiences.iter().flat_map(|e| &e.linked_projects) {
        if !known.contains(id.as_str()) && !linked.contains(id) {
            linked.push(id.clone());
        }
    }
    if linked.is_empty() {
        return Ok(());
    }

    for project in driver.projects_by_ids(&linked).await? {
        result.push_project(project);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use folio_knowledge::repository::BoxFuture;
    use folio_knowledge::{
        ExperienceKind, KnowledgeBase, KnowledgeError, KnowledgeRetrieval, Scored,
    };
    use folio_search::SearcherOptions;

    use super::*;
    use crate::plan::{AnswerMode, Intent, UiTarget};

    struct Counting {
        inner: KnowledgeRetrieval,
        searches: AtomicUsize,
    }

    impl RetrievalDriver for Counting {
        fn search_projects<'a>(
            &'a self,
            query: &'a ProjectQuery,
        ) -> BoxFuture<'a, Result<Vec<Scored<Project>>, KnowledgeError>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.inner.search_projects(query)
        }

        fn search_resume<'a>(
            &'a self,
            query: &'a ResumeQuery,
        ) -> BoxFuture<'a, Result<Vec<Scored<ResumeEntry>>, KnowledgeError>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.inner.search_resume(query)
        }

        fn profile(&self) -> BoxFuture<'_, Result<Option<Profile>, KnowledgeError>> {
            self.inner.profile()
        }

        fn projects_by_ids<'a>(
            &'a self,
            ids: &'a [String],
        ) -> BoxFuture<'a, Result<Vec<Project>, KnowledgeError>> {
            self.inner.projects_by_ids(ids)
        }
    }

    fn project(id: &str, name: &str, languages: &[&str]) -> Project {
        Project {
            id: id.into(),
            name: name.into(),
            summary: format!("{name} summary"),
            description: String::new(),
            languages: languages.iter().map(|l| (*l).to_owned()).collect(),
            frameworks: Vec::new(),
            tags: Vec::new(),
            role: None,
            timeframe: None,
            url: None,
            highlights: Vec::new(),
        }
    }

    fn experience(id: &str, kind: ExperienceKind, linked: &[&str]) -> ResumeEntry {
        ResumeEntry::Experience(Experience {
            id: id.into(),
            kind,
            company: format!("{id} corp"),
            title: "Rust engineer".into(),
            location: None,
            timeframe: Some("2021 - 2023".into()),
            summary: "Built rust services".into(),
            bullets: Vec::new(),
            skills: vec!["Rust".into()],
            linked_projects: linked.iter().map(|l| (*l).to_owned()).collect(),
        })
    }

    async fn driver() -> Counting {
        let kb = KnowledgeBase::new(
            vec![
                project("p-rust", "Rust search engine", &["Rust"]),
                project("p-linked", "Internal billing tool", &["Go"]),
            ],
            vec![
                experience("job", ExperienceKind::FullTime, &["p-linked"]),
                experience("volunteer", ExperienceKind::Volunteer, &[]),
                ResumeEntry::Skill(Skill {
                    id: "skill-rust".into(),
                    name: "Rust".into(),
                    category: None,
                    proficiency: None,
                    summary: "rust services".into(),
                    keywords: Vec::new(),
                }),
            ],
            Some(Profile {
                id: "profile".into(),
                name: "Ada".into(),
                headline: "Engineer".into(),
                location: None,
                summary: String::new(),
                about: Vec::new(),
                links: Vec::new(),
            }),
        );
        Counting {
            inner: KnowledgeRetrieval::from_knowledge_base(kb, None, SearcherOptions::default())
                .await
                .unwrap(),
            searches: AtomicUsize::new(0),
        }
    }

    fn plan(intent: Intent, requests: Vec<RetrievalRequest>) -> RetrievalPlan {
        RetrievalPlan {
            intent,
            topic: "rust backend services".into(),
            planner_confidence: 0.7,
            experience_scope: ExperienceScope::Any,
            retrieval_requests: requests,
            resume_facets: Vec::new(),
            answer_mode: AnswerMode::for_intent(intent),
            answer_length_hint: AnswerLength::Standard,
            enumerate_all_relevant: intent == Intent::List,
            ui_target: UiTarget::Auto,
        }
    }

    fn request(source: RetrievalSource, query: &str, top_k: Option<usize>) -> RetrievalRequest {
        RetrievalRequest {
            source,
            query: query.into(),
            top_k,
        }
    }

    #[test]
    fn top_k_adjustments() {
        let config = PipelineConfig::default();
        let req = request(RetrievalSource::Projects, "rust", Some(5));

        let base = plan(Intent::Describe, vec![req.clone()]);
        assert_eq!(effective_top_k(&req, &base, &config), 5);

        let mut low = base.clone();
        low.planner_confidence = 0.2;
        assert_eq!(effective_top_k(&req, &low, &config), 9);

        let mut vague = base.clone();
        vague.topic = "stuff".into();
        assert_eq!(effective_top_k(&req, &vague, &config), 9);

        let mut concise = base.clone();
        concise.planner_confidence = 0.9;
        concise.answer_length_hint = AnswerLength::Brief;
        assert_eq!(effective_top_k(&req, &concise, &config), CONCISE_TOP_K);

        let big = request(RetrievalSource::Projects, "rust", Some(500));
        assert_eq!(effective_top_k(&big, &base, &config), config.max_top_k);

        let meta = plan(Intent::Meta, vec![req.clone()]);
        assert_eq!(effective_top_k(&req, &meta, &config), config.meta_top_k);

        let list = plan(Intent::List, vec![req.clone()]);
        assert_eq!(effective_top_k(&req, &list, &config), config.enumeration_top_k);
    }

    #[tokio::test]
    async fn merges_dedups_and_fetches_profile_once() {
        let driver = driver().await;
        let cache = LruStore::new(8);
        let plan = plan(
            Intent::Describe,
            vec![
                request(RetrievalSource::Projects, "rust", None),
                request(RetrievalSource::Projects, "search engine", None),
                request(RetrievalSource::Resume, "rust", None),
                request(RetrievalSource::Profile, "about", None),
            ],
        );
        let outcome = execute(&driver, &cache, &plan, "ada", &PipelineConfig::default())
            .await
            .unwrap();
        let ids: Vec<_> = outcome.result.projects.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.iter().filter(|id| **id == "p-rust").count(), 1);
        assert!(outcome.result.profile.is_some());
        assert!(!outcome.result.skills.is_empty());
        assert_eq!(outcome.executed.len(), 3);
    }

    #[tokio::test]
    async fn second_run_hits_cache() {
        let driver = driver().await;
        let cache = LruStore::new(8);
        let plan = plan(
            Intent::Describe,
            vec![request(RetrievalSource::Projects, "rust", None)],
        );
        let config = PipelineConfig::default();
        execute(&driver, &cache, &plan, "ada", &config).await.unwrap();
        let again = execute(&driver, &cache, &plan, "ada", &config).await.unwrap();
        assert!(again.executed[0].cache_hit);
        assert_eq!(driver.searches.load(Ordering::SeqCst), 1);

        execute(&driver, &cache, &plan, "someone-else", &config)
            .await
            .unwrap();
        assert_eq!(driver.searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn employment_scope_filters_and_pulls_linked_projects() {
        let driver = driver().await;
        let cache = LruStore::new(8);
        let mut plan = plan(
            Intent::Describe,
            vec![request(RetrievalSource::Resume, "rust", None)],
        );
        plan.experience_scope = ExperienceScope::EmploymentOnly;
        let outcome = execute(&driver, &cache, &plan, "ada", &PipelineConfig::default())
            .await
            .unwrap();
        let result = outcome.result;
        assert!(result.skills.is_empty());
        assert!(result.experiences.iter().all(|e| e.kind.is_employment()));
        assert_eq!(result.experiences.len(), 1);
        assert_eq!(result.projects.len(), 1);
        assert_eq!(result.projects[0].id, "p-linked");
    }

    #[tokio::test]
    async fn empty_plan_retrieves_nothing() {
        let driver = driver().await;
        let cache = LruStore::new(8);
        let outcome = execute(
            &driver,
            &cache,
            &plan(Intent::Meta, Vec::new()),
            "ada",
            &PipelineConfig::default(),
        )
        .await
        .unwrap();
        assert!(outcome.result.is_empty());
        assert!(outcome.executed.is_empty());
    }
}
