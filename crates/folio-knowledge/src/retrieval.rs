//! Retrieval driver: one interface over the project and résumé searchers and
//! the profile accessor.

use std::collections::HashMap;
use std::sync::Arc;

use folio_search::{ScoreBreakdown, SearchResult, SearcherOptions, SemanticRanker};
use futures::future::join_all;
use serde::Serialize;

use crate::embeddings::EmbeddingRanker;
use crate::error::KnowledgeError;
use crate::project_search::{ProjectQuery, ProjectSearcher};
use crate::records::{Profile, Project, ResumeEntry};
use crate::repository::{
    BoxFuture, EmbeddingProvider, ExperienceRepository, ProfileRepository, ProjectRepository,
};
use crate::resume_search::{ResumeQuery, ResumeSearcher};
use crate::store::KnowledgeBase;

/// An owned search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scored<T> {
    pub record: T,
    /// Sort score (base score plus weighted recency).
    pub score: f32,
    pub breakdown: ScoreBreakdown,
}

impl<T: Clone> Scored<T> {
    pub(crate) fn from_result(result: SearchResult<'_, T>) -> Self {
        Self {
            record: result.record.clone(),
            score: result.sort_score,
            breakdown: result.breakdown,
        }
    }
}

/// "Search by text, return typed documents."
pub trait RetrievalDriver: Send + Sync {
    fn search_projects<'a>(
        &'a self,
        query: &'a ProjectQuery,
    ) -> BoxFuture<'a, Result<Vec<Scored<Project>>, KnowledgeError>>;

    fn search_resume<'a>(
        &'a self,
        query: &'a ResumeQuery,
    ) -> BoxFuture<'a, Result<Vec<Scored<ResumeEntry>>, KnowledgeError>>;

    fn profile(&self) -> BoxFuture<'_, Result<Option<Profile>, KnowledgeError>>;

    /// Projects with the given ids, in input order; unknown ids are skipped.
    fn projects_by_ids<'a>(
        &'a self,
        ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Project>, KnowledgeError>>;
}

pub struct KnowledgeRetrieval {
    projects: ProjectSearcher,
    resume: ResumeSearcher,
    project_repo: Arc<dyn ProjectRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
}

impl KnowledgeRetrieval {
    /// Load every record from the repositories and build both searchers.
    ///
    /// When `embedder` is given, stored record embeddings are fetched and a
    /// semantic ranker is attached to each searcher that has any.
    ///
    /// # Errors
    ///
    /// Returns an error if a repository fails to list or fetch embeddings.
    pub async fn build(
        project_repo: Arc<dyn ProjectRepository>,
        resume_repo: Arc<dyn ExperienceRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        options: SearcherOptions,
    ) -> Result<Self, KnowledgeError> {
        let project_records = project_repo.list_projects().await?;
        let resume_records = resume_repo.list_resume_entries().await?;

        let mut projects = ProjectSearcher::new(Arc::clone(&project_records), options.clone());
        let mut resume = ResumeSearcher::new(Arc::clone(&resume_records), options);

        if let Some(embedder) = embedder {
            let project_vectors = collect_vectors(
                project_records.iter().map(|p| p.id.as_str()),
                |id| project_repo.project_embedding(id),
            )
            .await?;
            let resume_vectors = collect_vectors(
                resume_records.iter().map(ResumeEntry::id),
                |id| resume_repo.resume_embedding(id),
            )
            .await?;

            tracing::debug!(
                projects = project_vectors.len(),
                resume = resume_vectors.len(),
                "record embeddings loaded"
            );

            if !project_vectors.is_empty() {
                let ranker: Arc<dyn SemanticRanker> =
                    Arc::new(EmbeddingRanker::new(Arc::clone(&embedder), project_vectors));
                projects = projects.with_ranker(ranker);
            }
            if !resume_vectors.is_empty() {
                let ranker: Arc<dyn SemanticRanker> =
                    Arc::new(EmbeddingRanker::new(embedder, resume_vectors));
                resume = resume.with_ranker(ranker);
            }
        }

        Ok(Self {
            projects,
            resume,
            project_repo,
            profile_repo,
        })
    }

    /// Build a driver over a single in-memory knowledge base.
    ///
    /// # Errors
    ///
    /// See [`KnowledgeRetrieval::build`].
    pub async fn from_knowledge_base(
        kb: KnowledgeBase,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        options: SearcherOptions,
    ) -> Result<Self, KnowledgeError> {
        let kb = Arc::new(kb);
        Self::build(
            Arc::clone(&kb) as Arc<dyn ProjectRepository>,
            Arc::clone(&kb) as Arc<dyn ExperienceRepository>,
            kb as Arc<dyn ProfileRepository>,
            embedder,
            options,
        )
        .await
    }

    #[must_use]
    pub fn project_searcher(&self) -> &ProjectSearcher {
        &self.projects
    }

    #[must_use]
    pub fn resume_searcher(&self) -> &ResumeSearcher {
        &self.resume
    }
}

async fn collect_vectors<'a, F>(
    ids: impl Iterator<Item = &'a str>,
    fetch: F,
) -> Result<HashMap<String, Vec<f32>>, KnowledgeError>
where
    F: Fn(&'a str) -> BoxFuture<'a, Result<Option<Vec<f32>>, KnowledgeError>>,
{
    let ids: Vec<&str> = ids.collect();
    let fetched = join_all(ids.iter().map(|&id| fetch(id))).await;
    let mut vectors = HashMap::with_capacity(ids.len());
    for (id, result) in ids.into_iter().zip(fetched) {
        if let Some(vector) = result? {
            vectors.insert(id.to_owned(), vector);
        }
    }
    Ok(vectors)
}

impl RetrievalDriver for KnowledgeRetrieval {
    fn search_projects<'a>(
        &'a self,
        query: &'a ProjectQuery,
    ) -> BoxFuture<'a, Result<Vec<Scored<Project>>, KnowledgeError>> {
        Box::pin(async move { Ok(self.projects.search(query).await) })
    }

    fn search_resume<'a>(
        &'a self,
        query: &'a ResumeQuery,
    ) -> BoxFuture<'a, Result<Vec<Scored<ResumeEntry>>, KnowledgeError>> {
        Box::pin(async move { Ok(self.resume.search(query).await) })
    }

    fn profile(&self) -> BoxFuture<'_, Result<Option<Profile>, KnowledgeError>> {
        self.profile_repo.get_profile()
    }

    fn projects_by_ids<'a>(
        &'a self,
        ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Project>, KnowledgeError>> {
        Box::pin(async move {
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(project) = self.project_repo.get_project(id).await? {
                    out.push(project);
                }
            }
            Ok(out)
        })
    }
}
