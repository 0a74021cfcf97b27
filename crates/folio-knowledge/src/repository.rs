use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::KnowledgeError;
use crate::records::{Profile, Project, ResumeEntry};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ProjectRepository: Send + Sync {
    fn list_projects(&self) -> BoxFuture<'_, Result<Arc<[Project]>, KnowledgeError>>;

    fn get_project<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Project>, KnowledgeError>>;

    /// Precomputed embedding of a project, if one exists.
    fn project_embedding<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<f32>>, KnowledgeError>>;
}

pub trait ExperienceRepository: Send + Sync {
    fn list_resume_entries(&self) -> BoxFuture<'_, Result<Arc<[ResumeEntry]>, KnowledgeError>>;

    fn get_resume_entry<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ResumeEntry>, KnowledgeError>>;

    fn resume_embedding<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<f32>>, KnowledgeError>>;
}

pub trait ProfileRepository: Send + Sync {
    fn get_profile(&self) -> BoxFuture<'_, Result<Option<Profile>, KnowledgeError>>;
}

/// Turns texts into embedding vectors, one per input, in input order.
pub trait EmbeddingProvider: Send + Sync {
    fn embed_texts<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, KnowledgeError>>;
}
