//! Evidence candidates, the prompt digest and normalization of the evidence
//! stage output against what was actually retrieved.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use folio_search::normalize::truncate_chars;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::retrieval::RetrievalResult;

/// Flag set when retrieval ran but returned nothing.
pub const OFF_TOPIC_FLAG: &str = "off_topic";

const SHORT_SNIPPET_DIVISOR: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Project,
    Experience,
    Education,
    Award,
    Skill,
    Profile,
}

impl DocType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Experience => "experience",
            Self::Education => "education",
            Self::Award => "award",
            Self::Skill => "skill",
            Self::Profile => "profile",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "project" | "projects" => Some(Self::Project),
            "experience" | "experiences" => Some(Self::Experience),
            "education" => Some(Self::Education),
            "award" | "awards" => Some(Self::Award),
            "skill" | "skills" => Some(Self::Skill),
            "profile" => Some(Self::Profile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    pub source: DocType,
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub relevance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceCandidate {
    /// `source:id`
    pub key: String,
    pub doc_type: DocType,
    pub rank_score: f32,
    pub item: EvidenceItem,
}

/// Candidate table in retrieval order, with the prompt digest built from it.
#[derive(Debug, Clone, Default)]
pub struct CandidateTable {
    candidates: Vec<EvidenceCandidate>,
    by_key: HashMap<String, usize>,
}

impl CandidateTable {
    /// Build candidates from `result`, deterministically.
    #[must_use]
    pub fn build(result: &RetrievalResult, config: &PipelineConfig) -> Self {
        let mut table = Self::default();
        let full = config.full_body_items_per_source;
        let long = config.snippet_chars;
        let short = (long / SHORT_SNIPPET_DIVISOR).max(1);

        let snippet = |idx: usize, body: String, summary: &str| {
            if idx < full {
                truncate_chars(&body, long)
            } else {
                truncate_chars(summary.trim(), short)
            }
        };

        for (idx, p) in result.projects.iter().enumerate() {
            let text = snippet(idx, p.body(), &p.summary);
            table.push(DocType::Project, idx, &p.id, p.name.clone(), text);
        }
        for (idx, e) in result.experiences.iter().enumerate() {
            let title = format!("{} at {}", e.title, e.company);
            let text = snippet(idx, e.body(), &e.summary);
            table.push(DocType::Experience, idx, &e.id, title, text);
        }
        for (idx, e) in result.education.iter().enumerate() {
            let title = format!("{}, {}", e.degree, e.institution);
            let text = snippet(idx, e.body(), &e.summary);
            table.push(DocType::Education, idx, &e.id, title, text);
        }
        for (idx, a) in result.awards.iter().enumerate() {
            let text = snippet(idx, a.summary.clone(), &a.summary);
            table.push(DocType::Award, idx, &a.id, a.title.clone(), text);
        }
        for (idx, s) in result.skills.iter().enumerate() {
            let text = snippet(idx, s.summary.clone(), &s.summary);
            table.push(DocType::Skill, idx, &s.id, s.name.clone(), text);
        }
        if let Some(profile) = &result.profile {
            let text = snippet(0, profile.body(), &profile.headline);
            table.push(DocType::Profile, 0, &profile.id, profile.name.clone(), text);
        }
        table
    }

    #[allow(clippy::cast_precision_loss)]
    fn push(&mut self, doc_type: DocType, idx: usize, id: &str, title: String, snippet: String) {
        let key = format!("{}:{id}", doc_type.as_str());
        if self.by_key.contains_key(&key) {
            return;
        }
        let rank_score = 1.0 / (1.0 + idx as f32);
        self.by_key.insert(key.clone(), self.candidates.len());
        self.candidates.push(EvidenceCandidate {
            key,
            doc_type,
            rank_score,
            item: EvidenceItem {
                source: doc_type,
                id: id.to_owned(),
                title,
                snippet,
                relevance: rank_score,
            },
        });
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&EvidenceCandidate> {
        self.by_key.get(key).map(|&i| &self.candidates[i])
    }

    #[must_use]
    pub fn candidates(&self) -> &[EvidenceCandidate] {
        &self.candidates
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Whether `id` is a known candidate of `doc_type`.
    #[must_use]
    pub fn contains(&self, doc_type: DocType, id: &str) -> bool {
        self.by_key
            .contains_key(&format!("{}:{id}", doc_type.as_str()))
    }

    /// Compact listing for the evidence prompt, one line per candidate.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut out = String::new();
        for c in &self.candidates {
            let _ = write!(out, "[{}] {}", c.key, c.item.title);
            if !c.item.snippet.is_empty() {
                let _ = write!(out, ": {}", c.item.snippet.replace('\n', " "));
            }
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighLevelAnswer {
    Yes,
    No,
    Partial,
    Unknown,
    NotApplicable,
}

impl HighLevelAnswer {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "yes" => Self::Yes,
            "no" => Self::No,
            "partial" | "partially" => Self::Partial,
            "not_applicable" | "n/a" | "na" => Self::NotApplicable,
            _ => Self::Unknown,
        }
    }

    /// Negative or unknown answers.
    #[must_use]
    pub fn is_negative(self) -> bool {
        matches!(self, Self::No | Self::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    None,
    Weak,
    Strong,
}

impl Completeness {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "none" => Some(Self::None),
            "weak" | "partial" => Some(Self::Weak),
            "strong" | "complete" => Some(Self::Strong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UiHints {
    /// Project ids worth showing as cards.
    #[serde(default)]
    pub projects: Vec<String>,
    /// Experience ids worth showing as cards.
    #[serde(default)]
    pub experiences: Vec<String>,
}

impl UiHints {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() && self.experiences.is_empty()
    }
}

/// Evidence stage output as the model produces it.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RawEvidence {
    /// yes | no | partial | unknown | not_applicable
    #[serde(default)]
    pub high_level_answer: String,
    /// none | weak | strong
    #[serde(default)]
    pub evidence_completeness: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub selected_evidence: Vec<RawEvidenceItem>,
    #[serde(default)]
    pub semantic_flags: Vec<String>,
    #[serde(default)]
    pub ui_hints: UiHints,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RawEvidenceItem {
    /// project | experience | education | award | skill | profile
    #[serde(default)]
    pub source: String,
    pub id: String,
    /// 0 to 1.
    #[serde(default)]
    pub relevance: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceSummary {
    pub high_level_answer: HighLevelAnswer,
    pub evidence_completeness: Completeness,
    pub reasoning: String,
    pub selected_evidence: Vec<EvidenceItem>,
    pub semantic_flags: Vec<String>,
    pub ui_hints: UiHints,
    pub ui_hint_warnings: Vec<String>,
}

impl EvidenceSummary {
    /// Fixed summary for meta turns.
    #[must_use]
    pub fn not_applicable() -> Self {
        Self {
            high_level_answer: HighLevelAnswer::NotApplicable,
            evidence_completeness: Completeness::None,
            reasoning: "Conversational turn; no portfolio evidence needed.".into(),
            selected_evidence: Vec::new(),
            semantic_flags: Vec::new(),
            ui_hints: UiHints::default(),
            ui_hint_warnings: Vec::new(),
        }
    }

    /// Fixed summary when retrieval returned no documents.
    #[must_use]
    pub fn no_documents() -> Self {
        Self {
            high_level_answer: HighLevelAnswer::Unknown,
            evidence_completeness: Completeness::None,
            reasoning: "Nothing in the knowledge base matched this question.".into(),
            selected_evidence: Vec::new(),
            semantic_flags: vec![OFF_TOPIC_FLAG.to_owned()],
            ui_hints: UiHints::default(),
            ui_hint_warnings: Vec::new(),
        }
    }

    /// Validate raw model output against `table`.
    ///
    /// Evidence and hint ids the table does not know are dropped with a
    /// warning. When nothing survives, completeness collapses to `None`.
    #[must_use]
    pub fn normalize(raw: RawEvidence, table: &CandidateTable, meta: bool) -> Self {
        let mut selected_evidence = Vec::new();
        let mut seen = HashSet::new();
        for raw_item in raw.selected_evidence {
            let Some(candidate) = resolve(table, &raw_item) else {
                tracing::warn!(
                    source = %raw_item.source,
                    id = %raw_item.id,
                    "dropping evidence not in the retrieved set"
                );
                continue;
            };
            if !seen.insert(candidate.key.clone()) {
                continue;
            }
            let mut item = candidate.item.clone();
            if let Some(relevance) = raw_item.relevance.filter(|r| r.is_finite()) {
                item.relevance = relevance.clamp(0.0, 1.0);
            }
            selected_evidence.push(item);
        }

        let mut ui_hint_warnings = Vec::new();
        let ui_hints = UiHints {
            projects: known_ids(
                raw.ui_hints.projects,
                table,
                DocType::Project,
                &mut ui_hint_warnings,
            ),
            experiences: known_ids(
                raw.ui_hints.experiences,
                table,
                DocType::Experience,
                &mut ui_hint_warnings,
            ),
        };

        let mut semantic_flags: Vec<String> = raw
            .semantic_flags
            .iter()
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        semantic_flags.dedup();

        let (high_level_answer, evidence_completeness) =
            if selected_evidence.is_empty() && ui_hints.is_empty() {
                let answer = if meta {
                    HighLevelAnswer::NotApplicable
                } else {
                    HighLevelAnswer::Unknown
                };
                (answer, Completeness::None)
            } else {
                (
                    HighLevelAnswer::parse(&raw.high_level_answer),
                    Completeness::parse(&raw.evidence_completeness).unwrap_or(Completeness::Weak),
                )
            };

        Self {
            high_level_answer,
            evidence_completeness,
            reasoning: raw.reasoning.trim().to_owned(),
            selected_evidence,
            semantic_flags,
            ui_hints,
            ui_hint_warnings,
        }
    }
}

fn resolve<'t>(table: &'t CandidateTable, raw: &RawEvidenceItem) -> Option<&'t EvidenceCandidate> {
    let id = raw.id.trim();
    if let Some(doc_type) = DocType::parse(&raw.source)
        && let Some(found) = table.get(&format!("{}:{id}", doc_type.as_str()))
    {
        return Some(found);
    }
    // models sometimes echo the full key as the id
    table.get(id)
}

fn known_ids(
    ids: Vec<String>,
    table: &CandidateTable,
    doc_type: DocType,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        let id = id.trim().to_owned();
        if !table.contains(doc_type, &id) {
            tracing::warn!(id = %id, kind = doc_type.as_str(), "dropping unknown ui hint");
            warnings.push(format!("unknown {} id: {id}", doc_type.as_str()));
            continue;
        }
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use folio_knowledge::{Experience, ExperienceKind, Project};

    use super::*;

    fn project(id: &str, summary: &str) -> Project {
        Project {
            id: id.into(),
            name: format!("Project {id}"),
            summary: summary.into(),
            description: "Long description of the work.".into(),
            languages: Vec::new(),
            frameworks: Vec::new(),
            tags: Vec::new(),
            role: None,
            timeframe: None,
            url: None,
            highlights: Vec::new(),
        }
    }

    fn result() -> RetrievalResult {
        RetrievalResult {
            projects: vec![project("a", "first"), project("b", "second")],
            experiences: vec![Experience {
                id: "job".into(),
                kind: ExperienceKind::FullTime,
                company: "Acme".into(),
                title: "Engineer".into(),
                location: None,
                timeframe: None,
                summary: "Shipped things".into(),
                bullets: vec!["Led a team".into()],
                skills: Vec::new(),
                linked_projects: Vec::new(),
            }],
            ..RetrievalResult::default()
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            full_body_items_per_source: 1,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn candidates_are_deterministic_and_ranked() {
        let table = CandidateTable::build(&result(), &config());
        let keys: Vec<_> = table.candidates().iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["project:a", "project:b", "experience:job"]);
        assert!((table.candidates()[1].rank_score - 0.5).abs() < f32::EPSILON);
        assert_eq!(table.get("experience:job").unwrap().item.title, "Engineer at Acme");

        // full body for the first item per source, summary only afterwards
        assert!(table.candidates()[0].item.snippet.contains("Long description"));
        assert_eq!(table.candidates()[1].item.snippet, "second");
        assert_eq!(
            CandidateTable::build(&result(), &config()).digest(),
            table.digest()
        );
    }

    #[test]
    fn snippets_are_bounded() {
        let mut r = result();
        r.projects[0].description = "x".repeat(2_000);
        let table = CandidateTable::build(&r, &PipelineConfig::default());
        assert!(table.candidates()[0].item.snippet.chars().count() <= 361);
    }

    #[test]
    fn hallucinated_ids_are_dropped() {
        let table = CandidateTable::build(&result(), &config());
        let raw: RawEvidence = serde_json::from_value(serde_json::json!({
            "high_level_answer": "yes",
            "evidence_completeness": "strong",
            "reasoning": "Project a covers it.",
            "selected_evidence": [
                {"source": "project", "id": "a", "relevance": 0.9},
                {"source": "project", "id": "ghost"},
                {"source": "", "id": "experience:job"},
                {"source": "project", "id": "a"},
            ],
            "ui_hints": {"projects": ["a", "ghost"], "experiences": ["job", "a"]},
        }))
        .unwrap();

        let summary = EvidenceSummary::normalize(raw, &table, false);
        let ids: Vec<_> = summary.selected_evidence.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "job"]);
        assert!((summary.selected_evidence[0].relevance - 0.9).abs() < f32::EPSILON);
        assert_eq!(summary.ui_hints.projects, vec!["a"]);
        assert_eq!(summary.ui_hints.experiences, vec!["job"]);
        assert_eq!(summary.ui_hint_warnings.len(), 2);
        assert_eq!(summary.high_level_answer, HighLevelAnswer::Yes);
        assert_eq!(summary.evidence_completeness, Completeness::Strong);
    }

    #[test]
    fn everything_dropped_collapses_completeness() {
        let table = CandidateTable::build(&result(), &config());
        let raw: RawEvidence = serde_json::from_value(serde_json::json!({
            "high_level_answer": "yes",
            "evidence_completeness": "strong",
            "selected_evidence": [{"source": "project", "id": "nope"}],
            "ui_hints": {"projects": ["nope"]},
        }))
        .unwrap();
        let summary = EvidenceSummary::normalize(raw.clone(), &table, false);
        assert_eq!(summary.evidence_completeness, Completeness::None);
        assert_eq!(summary.high_level_answer, HighLevelAnswer::Unknown);

        let meta = EvidenceSummary::normalize(raw, &table, true);
        assert_eq!(meta.high_level_answer, HighLevelAnswer::NotApplicable);
    }

    #[test]
    fn fast_path_summaries() {
        let off_topic = EvidenceSummary::no_documents();
        assert_eq!(off_topic.evidence_completeness, Completeness::None);
        assert_eq!(off_topic.semantic_flags, vec![OFF_TOPIC_FLAG]);
        assert_eq!(
            EvidenceSummary::not_applicable().high_level_answer,
            HighLevelAnswer::NotApplicable
        );
    }
}
