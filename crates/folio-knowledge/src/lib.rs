//! Portfolio knowledge base: typed records, read-only repositories, the
//! project and résumé searchers and the retrieval driver used by the answer
//! pipeline.

pub mod embeddings;
pub mod error;
pub mod project_search;
pub mod records;
pub mod repository;
pub mod resume_search;
pub mod retrieval;
pub mod store;

pub use embeddings::{EmbeddingRanker, LlmEmbeddings};
pub use error::KnowledgeError;
pub use project_search::{ProjectQuery, ProjectSearcher};
pub use records::{
    Award, Education, Experience, ExperienceKind, Link, Profile, Project, ResumeEntry, ResumeKind,
    Skill,
};
pub use repository::{
    EmbeddingProvider, ExperienceRepository, ProfileRepository, ProjectRepository,
};
pub use resume_search::{ResumeQuery, ResumeSearcher};
pub use retrieval::{KnowledgeRetrieval, RetrievalDriver, Scored};
pub use store::{Embeddings, KnowledgeBase};
