//! Retrieval plan: the planner's raw output and its normalized form.

use std::collections::HashSet;

use folio_knowledge::ResumeKind;
use folio_search::normalize::canonicalize;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Describe,
    List,
    Compare,
    Fact,
    /// Questions about the assistant itself, greetings and small talk.
    Meta,
}

impl Intent {
    /// Lenient parse; anything unrecognized is `Describe`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "list" | "enumerate" | "enumeration" => Self::List,
            "compare" | "comparison" => Self::Compare,
            "fact" | "factual" | "lookup" | "yes_no" => Self::Fact,
            "meta" | "chitchat" | "chit_chat" | "small_talk" | "smalltalk" | "greeting" => {
                Self::Meta
            }
            _ => Self::Describe,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    Narrative,
    Enumeration,
    Comparison,
    Direct,
    Conversational,
}

impl AnswerMode {
    #[must_use]
    pub fn for_intent(intent: Intent) -> Self {
        match intent {
            Intent::Describe => Self::Narrative,
            Intent::List => Self::Enumeration,
            Intent::Compare => Self::Comparison,
            Intent::Fact => Self::Direct,
            Intent::Meta => Self::Conversational,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    Projects,
    Resume,
    Profile,
}

impl RetrievalSource {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "projects" | "project" | "portfolio" => Some(Self::Projects),
            "resume" | "résumé" | "experience" | "experiences" | "education" | "skills"
            | "awards" | "cv" => Some(Self::Resume),
            "profile" | "about" | "bio" => Some(Self::Profile),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Projects => "projects",
            Self::Resume => "resume",
            Self::Profile => "profile",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceScope {
    #[default]
    Any,
    EmploymentOnly,
}

impl ExperienceScope {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "employment_only" | "employment" | "jobs" | "work" => Self::EmploymentOnly,
            _ => Self::Any,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerLength {
    Brief,
    #[default]
    Standard,
    Detailed,
}

impl AnswerLength {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "brief" | "short" | "concise" => Self::Brief,
            "detailed" | "long" | "thorough" => Self::Detailed,
            _ => Self::Standard,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiTarget {
    #[default]
    Auto,
    Cards,
    TextOnly,
}

impl UiTarget {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "cards" | "card" => Self::Cards,
            "text_only" | "text" | "none" => Self::TextOnly,
            _ => Self::Auto,
        }
    }
}

/// Planner output as the model produces it. Every field is optional text so a
/// slightly-off response still parses; [`RetrievalPlan::normalize`] does the rest.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RawPlan {
    /// describe | list | compare | fact | meta
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub topic: String,
    /// Confidence in the interpretation, 0 to 1.
    #[serde(default)]
    pub confidence: Option<f32>,
    /// projects | resume | mixed
    #[serde(default)]
    pub focus: String,
    /// any | employment_only
    #[serde(default)]
    pub experience_scope: String,
    #[serde(default)]
    pub retrieval_requests: Vec<RawRequest>,
    /// experience | education | award | skill
    #[serde(default)]
    pub resume_facets: Vec<String>,
    /// brief | standard | detailed
    #[serde(default)]
    pub answer_length: String,
    /// auto | cards | text_only
    #[serde(default)]
    pub ui_target: String,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RawRequest {
    /// projects | resume | profile
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub top_k: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RetrievalRequest {
    pub source: RetrievalSource,
    pub query: String,
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalPlan {
    pub intent: Intent,
    pub topic: String,
    pub planner_confidence: f32,
    pub experience_scope: ExperienceScope,
    pub retrieval_requests: Vec<RetrievalRequest>,
    pub resume_facets: Vec<ResumeKind>,
    pub answer_mode: AnswerMode,
    pub answer_length_hint: AnswerLength,
    pub enumerate_all_relevant: bool,
    pub ui_target: UiTarget,
}

const DEFAULT_CONFIDENCE: f32 = 0.5;

impl RetrievalPlan {
    /// Normalize raw planner output.
    ///
    /// `fallback_query` is used for requests the model left blank and for the
    /// requests added to cover the inferred focus.
    #[must_use]
    pub fn normalize(raw: RawPlan, fallback_query: &str, max_top_k: usize) -> Self {
        let intent = Intent::parse(&raw.intent);
        let topic = raw.topic.trim().to_owned();
        let default_query = if topic.is_empty() {
            fallback_query.trim().to_owned()
        } else {
            topic.clone()
        };

        let planner_confidence = raw
            .confidence
            .filter(|c| c.is_finite())
            .map_or(DEFAULT_CONFIDENCE, |c| c.clamp(0.0, 1.0));

        let mut seen = HashSet::new();
        let mut retrieval_requests = Vec::new();
        for request in raw.retrieval_requests {
            let Some(source) = RetrievalSource::parse(&request.source) else {
                tracing::debug!(source = %request.source, "dropping request with unknown source");
                continue;
            };
            let query = match request.query.trim() {
                "" => default_query.clone(),
                q => q.to_owned(),
            };
            if !seen.insert((source, canonicalize(&query))) {
                continue;
            }
            let top_k = request
                .top_k
                .map(|k| usize::try_from(k).unwrap_or(usize::MAX).clamp(1, max_top_k.max(1)));
            retrieval_requests.push(RetrievalRequest {
                source,
                query,
                top_k,
            });
        }

        if intent != Intent::Meta {
            for &source in focus_sources(&raw.focus) {
                if retrieval_requests.iter().all(|r| r.source != source) {
                    retrieval_requests.push(RetrievalRequest {
                        source,
                        query: default_query.clone(),
                        top_k: None,
                    });
                }
            }
        }

        let mut resume_facets: Vec<ResumeKind> = raw
            .resume_facets
            .iter()
            .filter_map(|f| ResumeKind::from_facet(f))
            .collect();
        resume_facets.sort_unstable();
        resume_facets.dedup();

        Self {
            intent,
            topic,
            planner_confidence,
            experience_scope: ExperienceScope::parse(&raw.experience_scope),
            retrieval_requests,
            resume_facets,
            answer_mode: AnswerMode::for_intent(intent),
            answer_length_hint: AnswerLength::parse(&raw.answer_length),
            enumerate_all_relevant: intent == Intent::List,
            ui_target: UiTarget::parse(&raw.ui_target),
        }
    }

    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.intent == Intent::Meta
    }
}

fn focus_sources(focus: &str) -> &'static [RetrievalSource] {
    match focus.trim().to_lowercase().as_str() {
        "projects" | "project" => &[RetrievalSource::Projects],
        "resume" | "experience" | "experiences" => &[RetrievalSource::Resume],
        _ => &[RetrievalSource::Projects, RetrievalSource::Resume],
    }
}
