use serde::Serialize;

use crate::events::Stage;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{stage} stage: {source}")]
    Llm {
        stage: Stage,
        #[source]
        source: folio_llm::LlmError,
    },

    #[error("{stage} stage returned malformed output after {attempts} attempts: {detail}")]
    MalformedOutput {
        stage: Stage,
        attempts: u32,
        detail: String,
    },

    #[error("{stage} stage aborted: {reason}")]
    Timeout { stage: Stage, reason: String },

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] folio_knowledge::KnowledgeError),

    #[error("invalid request: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    /// Stable error code reported to clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Llm { .. } | Self::MalformedOutput { .. } => "llm_error",
            Self::Timeout { .. } => "llm_timeout",
            Self::Retrieval(_) => "retrieval_error",
            Self::InvalidInput(_) => "internal_error",
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Llm { source, .. } => source.is_transient(),
            Self::Timeout { .. } => true,
            Self::MalformedOutput { .. }
            | Self::Retrieval(_)
            | Self::InvalidInput(_) => false,
        }
    }

    /// Suggested client back-off.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Llm {
                source: folio_llm::LlmError::RateLimited,
                ..
            } => Some(5_000),
            Self::Timeout { .. } => Some(1_000),
            _ => None,
        }
    }

    /// Message safe to show to an end user.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Llm { .. } | Self::MalformedOutput { .. } => {
                "Sorry, I had trouble generating an answer. Please try again."
            }
            Self::Timeout { .. } => "Sorry, that took too long. Please try again.",
            Self::Retrieval(_) => "Sorry, I couldn't look that up right now.",
            Self::InvalidInput(_) => "Sorry, I couldn't process that message.",
        }
    }
}

/// Wire form of a pipeline failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl From<&PipelineError> for ChatError {
    fn from(e: &PipelineError) -> Self {
        Self {
            code: e.code().to_owned(),
            message: e.to_string(),
            retryable: e.is_retryable(),
            retry_after_ms: e.retry_after_ms(),
        }
    }
}
