//! JSON-file backed knowledge base.
//!
//! Layout of the data directory:
//!
//! - `projects.json`: array of [`Project`]
//! - `resume.json`: array of [`ResumeEntry`] tagged by `type`
//! - `profile.json`: a single [`Profile`]
//! - `embeddings.json` (optional): `{"projects": {id: [f32]}, "resume": {id: [f32]}}`
//!
//! Missing files load as empty collections; malformed files are errors.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::KnowledgeError;
use crate::records::{Profile, Project, ResumeEntry};
use crate::repository::{BoxFuture, ExperienceRepository, ProfileRepository, ProjectRepository};

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Embeddings {
    #[serde(default)]
    pub projects: HashMap<String, Vec<f32>>,
    #[serde(default)]
    pub resume: HashMap<String, Vec<f32>>,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    projects: Arc<[Project]>,
    resume: Arc<[ResumeEntry]>,
    profile: Option<Profile>,
    embeddings: Arc<Embeddings>,
}

impl KnowledgeBase {
    #[must_use]
    pub fn new(projects: Vec<Project>, resume: Vec<ResumeEntry>, profile: Option<Profile>) -> Self {
        Self {
            projects: projects.into(),
            resume: resume.into(),
            profile,
            embeddings: Arc::default(),
        }
    }

    #[must_use]
    pub fn with_embeddings(mut self, embeddings: Embeddings) -> Self {
        self.embeddings = Arc::new(embeddings);
        self
    }

    /// Load every dataset from `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a present file cannot be read or parsed.
    pub async fn load(dir: &Path) -> Result<Self, KnowledgeError> {
        let projects: Vec<Project> = read_json(&dir.join("projects.json"))
            .await?
            .unwrap_or_default();
        let resume: Vec<ResumeEntry> = read_json(&dir.join("resume.json"))
            .await?
            .unwrap_or_default();
        let profile: Option<Profile> = read_json(&dir.join("profile.json")).await?;
        let embeddings: Embeddings = read_json(&dir.join("embeddings.json"))
            .await?
            .unwrap_or_default();

        tracing::info!(
            dir = %dir.display(),
            projects = projects.len(),
            resume_entries = resume.len(),
            has_profile = profile.is_some(),
            project_embeddings = embeddings.projects.len(),
            resume_embeddings = embeddings.resume.len(),
            "knowledge base loaded"
        );

        Ok(Self::new(projects, resume, profile).with_embeddings(embeddings))
    }

    #[must_use]
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    #[must_use]
    pub fn resume(&self) -> &[ResumeEntry] {
        &self.resume
    }

    #[must_use]
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, KnowledgeError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "knowledge file not found, using empty");
            return Ok(None);
        }
        Err(source) => {
            return Err(KnowledgeError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| KnowledgeError::Json {
            path: path.display().to_string(),
            source,
        })
}

impl ProjectRepository for KnowledgeBase {
    fn list_projects(&self) -> BoxFuture<'_, Result<Arc<[Project]>, KnowledgeError>> {
        let projects = Arc::clone(&self.projects);
        Box::pin(async move { Ok(projects) })
    }

    fn get_project<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Project>, KnowledgeError>> {
        Box::pin(async move { Ok(self.projects.iter().find(|p| p.id == id).cloned()) })
    }

    fn project_embedding<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<f32>>, KnowledgeError>> {
        Box::pin(async move { Ok(self.embeddings.projects.get(id).cloned()) })
    }
}

impl ExperienceRepository for KnowledgeBase {
    fn list_resume_entries(&self) -> BoxFuture<'_, Result<Arc<[ResumeEntry]>, KnowledgeError>> {
        let resume = Arc::clone(&self.resume);
        Box::pin(async move { Ok(resume) })
    }

    fn get_resume_entry<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ResumeEntry>, KnowledgeError>> {
        Box::pin(async move { Ok(self.resume.iter().find(|e| e.id() == id).cloned()) })
    }

    fn resume_embedding<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<f32>>, KnowledgeError>> {
        Box::pin(async move { Ok(self.embeddings.resume.get(id).cloned()) })
    }
}

impl ProfileRepository for KnowledgeBase {
    fn get_profile(&self) -> BoxFuture<'_, Result<Option<Profile>, KnowledgeError>> {
        let profile = self.profile.clone();
        Box::pin(async move { Ok(profile) })
    }
}
