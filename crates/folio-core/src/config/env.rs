use std::path::PathBuf;
use std::str::FromStr;

use super::Config;

/// Parse `FOLIO_*` variable `key`, logging and ignoring invalid values.
fn parsed<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring invalid {key} value: {raw}");
            None
        }
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_pipeline();

        if let Ok(v) = std::env::var("FOLIO_KNOWLEDGE_DATA_DIR") {
            self.knowledge.data_dir = PathBuf::from(v);
        }
        if let Some(v) = parsed::<bool>("FOLIO_KNOWLEDGE_SEMANTIC") {
            self.knowledge.semantic = v;
        }
        if let Ok(v) = std::env::var("FOLIO_OWNER_ID") {
            self.owner.id = v;
        }
        if let Ok(v) = std::env::var("FOLIO_OWNER_NAME") {
            self.owner.name = v;
        }
        if let Some(v) = parsed::<f32>("FOLIO_SEARCH_RECENCY_LAMBDA") {
            self.search.recency_lambda = v;
        }
        if let Ok(v) = std::env::var("FOLIO_LOG_FILE") {
            self.logging.file = (!v.is_empty()).then(|| PathBuf::from(v));
        }
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("FOLIO_LLM_API_KEY")
            && !v.is_empty()
        {
            self.secrets.llm_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("FOLIO_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("FOLIO_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("FOLIO_LLM_PLANNER_MODEL") {
            self.llm.planner_model = Some(v);
        }
        if let Ok(v) = std::env::var("FOLIO_LLM_EVIDENCE_MODEL") {
            self.llm.evidence_model = Some(v);
        }
        if let Ok(v) = std::env::var("FOLIO_LLM_ANSWER_MODEL") {
            self.llm.answer_model = Some(v);
        }
        if let Ok(v) = std::env::var("FOLIO_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Some(v) = parsed::<u32>("FOLIO_LLM_MAX_TOKENS") {
            self.llm.max_tokens = v;
        }
        if let Some(v) = parsed::<u32>("FOLIO_LLM_MAX_RETRIES") {
            self.llm.max_retries = v;
        }
    }

    fn apply_env_overrides_pipeline(&mut self) {
        let p = &mut self.pipeline;
        if let Some(v) = parsed("FOLIO_PIPELINE_SOFT_TIMEOUT_MS") {
            p.soft_timeout_ms = v;
        }
        if let Some(v) = parsed("FOLIO_PIPELINE_MAX_STRUCTURED_ATTEMPTS") {
            p.max_structured_attempts = v;
        }
        if let Some(v) = parsed("FOLIO_PIPELINE_HISTORY_MAX_MESSAGES") {
            p.history_max_messages = v;
        }
        if let Some(v) = parsed("FOLIO_PIPELINE_HISTORY_MAX_CHARS") {
            p.history_max_chars = v;
        }
        if let Some(v) = parsed("FOLIO_PIPELINE_MAX_USER_MESSAGE_CHARS") {
            p.max_user_message_chars = v;
        }
        if let Some(v) = parsed("FOLIO_PIPELINE_MAX_DISPLAY_CARDS") {
            p.max_display_cards = v;
        }
        if let Some(v) = parsed("FOLIO_PIPELINE_ENUMERATION_TOP_K") {
            p.enumeration_top_k = v;
        }
    }
}
