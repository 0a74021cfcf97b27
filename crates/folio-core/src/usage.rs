//! Per-turn accounting and the reasoning trace.

use serde::Serialize;

use crate::events::Stage;
use crate::evidence::EvidenceSummary;
use crate::plan::RetrievalPlan;
use crate::retrieval::ExecutedRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageUsage {
    pub stage: Stage,
    /// Empty when the stage did not call a model.
    pub model: String,
    pub duration_ms: u64,
    pub attempts: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_hit: bool,
}

impl StageUsage {
    #[must_use]
    pub fn new(stage: Stage, model: impl Into<String>) -> Self {
        Self {
            stage,
            model: model.into(),
            duration_ms: 0,
            attempts: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cache_hit: false,
        }
    }

    pub fn add_tokens(&mut self, usage: Option<folio_llm::TokenUsage>) {
        if let Some(usage) = usage {
            self.prompt_tokens += usage.prompt_tokens;
            self.completion_tokens += usage.completion_tokens;
        }
    }
}

/// What each stage decided, for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReasoningTrace {
    pub turn_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<RetrievalPlan>,
    pub retrieval: Vec<ExecutedRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceSummary>,
    pub answer_thoughts: Vec<String>,
}

/// Sum of token counts over `usage`.
#[must_use]
pub fn total_tokens(usage: &[StageUsage]) -> u64 {
    usage
        .iter()
        .map(|u| u.prompt_tokens + u.completion_tokens)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_accumulate() {
        let mut plan = StageUsage::new(Stage::Plan, "m");
        plan.add_tokens(Some(folio_llm::TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 2,
        }));
        plan.add_tokens(None);
        let mut answer = StageUsage::new(Stage::Answer, "m");
        answer.add_tokens(Some(folio_llm::TokenUsage {
            prompt_tokens: 5,
            completion_tokens: 5,
        }));
        assert_eq!(total_tokens(&[plan, answer]), 22);
    }

    #[test]
    fn empty_trace_serializes_compactly() {
        let json = serde_json::to_value(ReasoningTrace::default()).unwrap();
        assert!(json.get("plan").is_none());
        assert!(json.get("evidence").is_none());
    }
}
