#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("semantic scoring failed: {0}")]
    Semantic(String),

    #[error("embedding unavailable: {0}")]
    Embedding(String),
}
