use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub owner: OwnerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

/// Values that never come from the config file.
#[derive(Clone, Default, PartialEq)]
pub struct ResolvedSecrets {
    pub llm_api_key: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_model: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Retries on HTTP 429.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            planner_model: None,
            evidence_model: None,
            answer_model: None,
            embedding_model: default_embedding_model(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
        }
    }
}

impl LlmConfig {
    #[must_use]
    pub fn planner_model(&self) -> &str {
        self.planner_model.as_deref().unwrap_or(&self.model)
    }

    #[must_use]
    pub fn evidence_model(&self) -> &str {
        self.evidence_model.as_deref().unwrap_or(&self.model)
    }

    #[must_use]
    pub fn answer_model(&self) -> &str {
        self.answer_model.as_deref().unwrap_or(&self.model)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Attach semantic rankers when record embeddings are available.
    #[serde(default = "default_true")]
    pub semantic: bool,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            semantic: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_owner_id() -> String {
    "default".into()
}

fn default_owner_name() -> String {
    "the portfolio owner".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OwnerConfig {
    #[serde(default = "default_owner_id")]
    pub id: String,
    #[serde(default = "default_owner_name")]
    pub name: String,
    /// Free text injected into every prompt.
    #[serde(default)]
    pub persona: String,
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            id: default_owner_id(),
            name: default_owner_name(),
            persona: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub soft_timeout_ms: u64,
    pub max_structured_attempts: u32,
    pub planner_cache_size: usize,
    pub retrieval_cache_size: usize,
    pub history_max_messages: usize,
    pub history_max_chars: usize,
    pub max_user_message_chars: usize,
    pub max_display_cards: usize,
    pub enumeration_top_k: usize,
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub meta_top_k: usize,
    pub snippet_chars: usize,
    pub full_body_items_per_source: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            soft_timeout_ms: 60_000,
            max_structured_attempts: 3,
            planner_cache_size: 64,
            retrieval_cache_size: 128,
            history_max_messages: 12,
            history_max_chars: 12_000,
            max_user_message_chars: 4_000,
            max_display_cards: 6,
            enumeration_top_k: 50,
            default_top_k: 8,
            max_top_k: 20,
            meta_top_k: 3,
            snippet_chars: 360,
            full_body_items_per_source: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    pub recency_lambda: f32,
    pub default_limit: usize,
    pub min_limit: usize,
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            recency_lambda: folio_search::searcher::DEFAULT_RECENCY_LAMBDA,
            default_limit: 8,
            min_limit: 1,
            max_limit: 50,
        }
    }
}

impl SearchConfig {
    #[must_use]
    pub fn searcher_options(&self) -> folio_search::SearcherOptions {
        folio_search::SearcherOptions {
            default_limit: self.default_limit,
            min_limit: self.min_limit,
            max_limit: self.max_limit,
            recency_lambda: (self.recency_lambda > 0.0).then_some(self.recency_lambda),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Also write logs to this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}
