//! Card selection and attachment payloads shown next to the answer.

use folio_knowledge::{Experience, Project};
use folio_search::normalize::truncate_chars;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::evidence::{Completeness, EvidenceSummary, HighLevelAnswer, UiHints};
use crate::plan::{RetrievalPlan, UiTarget};
use crate::retrieval::RetrievalResult;

pub const ZERO_EVIDENCE_BANNER: &str =
    "I couldn't find anything in the portfolio about that. Try asking about a project, role or skill.";

#[must_use]
pub fn more_items_banner(hidden: usize) -> String {
    format!("and {hidden} more related items...")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UiPayload {
    /// Project ids to render as cards, in display order.
    pub projects: Vec<String>,
    pub experiences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    /// Cards were withheld on purpose.
    pub suppressed: bool,
}

impl UiPayload {
    #[must_use]
    pub fn card_count(&self) -> usize {
        self.projects.len() + self.experiences.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectCard {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperienceCard {
    pub id: String,
    pub company: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub summary: String,
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    Project(ProjectCard),
    Experience(ExperienceCard),
}

impl Attachment {
    fn project(p: &Project, max_chars: usize) -> Self {
        Self::Project(ProjectCard {
            id: p.id.clone(),
            name: p.name.clone(),
            summary: truncate_chars(&p.summary, max_chars),
            languages: p.languages.clone(),
            frameworks: p.frameworks.clone(),
            tags: p.tags.clone(),
            timeframe: p.timeframe.clone(),
            url: p.url.clone(),
        })
    }

    fn experience(e: &Experience, max_chars: usize) -> Self {
        Self::Experience(ExperienceCard {
            id: e.id.clone(),
            company: e.company.clone(),
            title: e.title.clone(),
            timeframe: e.timeframe.clone(),
            location: e.location.clone(),
            summary: truncate_chars(&e.summary, max_chars),
            skills: e.skills.clone(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Project(p) => &p.id,
            Self::Experience(e) => &e.id,
        }
    }
}

/// Narrow evidence hints by the answer's hints, never adding ids.
///
/// Falls back to the evidence hints when the answer offers none or when the
/// intersection is empty.
#[must_use]
pub fn narrow_hints(evidence: &UiHints, answer: Option<&UiHints>) -> UiHints {
    let Some(answer) = answer.filter(|a| !a.is_empty()) else {
        return evidence.clone();
    };
    let keep = |wanted: &[String], allowed: &[String]| -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for id in wanted {
            if allowed.contains(id) && !out.contains(id) {
                out.push(id.clone());
            } else if !allowed.contains(id) {
                tracing::warn!(id = %id, "answer hinted at an id outside the evidence hints");
            }
        }
        out
    };
    let narrowed = UiHints {
        projects: keep(&answer.projects, &evidence.projects),
        experiences: keep(&answer.experiences, &evidence.experiences),
    };
    if narrowed.is_empty() {
        evidence.clone()
    } else {
        narrowed
    }
}

/// Decide which cards to show and resolve them to attachments.
#[must_use]
pub fn assemble(
    plan: &RetrievalPlan,
    evidence: &EvidenceSummary,
    hints: &UiHints,
    result: &RetrievalResult,
    config: &PipelineConfig,
) -> (UiPayload, Vec<Attachment>) {
    let mut ui = UiPayload::default();

    if evidence.evidence_completeness == Completeness::None && !plan.is_meta() {
        ui.banner = Some(ZERO_EVIDENCE_BANNER.to_owned());
    }

    let negative = matches!(
        evidence.high_level_answer,
        HighLevelAnswer::No | HighLevelAnswer::Unknown | HighLevelAnswer::NotApplicable
    );
    if plan.ui_target == UiTarget::TextOnly || (plan.is_meta() && negative) {
        ui.suppressed = true;
        return (ui, Vec::new());
    }

    let cap = config.max_display_cards;
    let projects: Vec<&Project> = hints
        .projects
        .iter()
        .filter_map(|id| result.projects.iter().find(|p| &p.id == id))
        .collect();
    let experiences: Vec<&Experience> = hints
        .experiences
        .iter()
        .filter_map(|id| result.experiences.iter().find(|e| &e.id == id))
        .collect();

    let shown_projects = projects.len().min(cap);
    let shown_experiences = experiences.len().min(cap - shown_projects);
    let hidden = projects.len() + experiences.len() - shown_projects - shown_experiences;

    let mut attachments = Vec::with_capacity(shown_projects + shown_experiences);
    for p in &projects[..shown_projects] {
        ui.projects.push(p.id.clone());
        attachments.push(Attachment::project(p, config.snippet_chars));
    }
    for e in &experiences[..shown_experiences] {
        ui.experiences.push(e.id.clone());
        attachments.push(Attachment::experience(e, config.snippet_chars));
    }

    if hidden > 0 && plan.enumerate_all_relevant {
        ui.banner = Some(more_items_banner(hidden));
    }
    (ui, attachments)
}

#[cfg(test)]
mod tests {
    use folio_knowledge::ExperienceKind;

    use super::*;
    use crate::plan::{AnswerLength, AnswerMode, ExperienceScope, Intent};

    fn plan(intent: Intent) -> RetrievalPlan {
        RetrievalPlan {
            intent,
            topic: "work".into(),
            planner_confidence: 0.9,
            experience_scope: ExperienceScope::Any,
            retrieval_requests: Vec::new(),
            resume_facets: Vec::new(),
            answer_mode: AnswerMode::for_intent(intent),
            answer_length_hint: AnswerLength::Standard,
            enumerate_all_relevant: intent == Intent::List,
            ui_target: UiTarget::Auto,
        }
    }

    fn experience(i: usize) -> Experience {
        Experience {
            id: format!("job-{i}"),
            kind: ExperienceKind::FullTime,
            company: format!("Company {i}"),
            title: "Engineer".into(),
            location: None,
            timeframe: None,
            summary: "x".repeat(1_000),
            bullets: Vec::new(),
            skills: Vec::new(),
            linked_projects: Vec::new(),
        }
    }

    fn evidence(hints: UiHints) -> EvidenceSummary {
        EvidenceSummary {
            high_level_answer: HighLevelAnswer::Yes,
            evidence_completeness: Completeness::Strong,
            reasoning: String::new(),
            selected_evidence: Vec::new(),
            semantic_flags: Vec::new(),
            ui_hints: hints,
            ui_hint_warnings: Vec::new(),
        }
    }

    #[test]
    fn enumeration_caps_cards_and_adds_banner() {
        let result = RetrievalResult {
            experiences: (0..15).map(experience).collect(),
            ..RetrievalResult::default()
        };
        let hints = UiHints {
            projects: Vec::new(),
            experiences: result.experiences.iter().map(|e| e.id.clone()).collect(),
        };
        let config = PipelineConfig::default();
        let (ui, attachments) = assemble(
            &plan(Intent::List),
            &evidence(hints.clone()),
            &hints,
            &result,
            &config,
        );
        assert_eq!(ui.card_count(), 6);
        assert_eq!(attachments.len(), 6);
        assert_eq!(ui.banner.as_deref(), Some("and 9 more related items..."));
        assert_eq!(attachments[0].id(), "job-0");

        let Attachment::Experience(card) = &attachments[0] else {
            panic!("expected an experience card");
        };
        assert!(card.summary.chars().count() <= config.snippet_chars + 1);
    }

    #[test]
    fn truncation_without_enumeration_has_no_banner() {
        let result = RetrievalResult {
            experiences: (0..8).map(experience).collect(),
            ..RetrievalResult::default()
        };
        let hints = UiHints {
            projects: Vec::new(),
            experiences: result.experiences.iter().map(|e| e.id.clone()).collect(),
        };
        let (ui, _) = assemble(
            &plan(Intent::Describe),
            &evidence(hints.clone()),
            &hints,
            &result,
            &PipelineConfig::default(),
        );
        assert_eq!(ui.card_count(), 6);
        assert!(ui.banner.is_none());
    }

    #[test]
    fn zero_evidence_banner() {
        let (ui, attachments) = assemble(
            &plan(Intent::Fact),
            &EvidenceSummary::no_documents(),
            &UiHints::default(),
            &RetrievalResult::default(),
            &PipelineConfig::default(),
        );
        assert_eq!(ui.banner.as_deref(), Some(ZERO_EVIDENCE_BANNER));
        assert!(attachments.is_empty());
    }

    #[test]
    fn text_only_and_negative_meta_suppress_cards() {
        let result = RetrievalResult {
            experiences: vec![experience(0)],
            ..RetrievalResult::default()
        };
        let hints = UiHints {
            projects: Vec::new(),
            experiences: vec!["job-0".into()],
        };

        let mut text_only = plan(Intent::Describe);
        text_only.ui_target = UiTarget::TextOnly;
        let config = PipelineConfig::default();
        let (ui, attachments) =
            assemble(&text_only, &evidence(hints.clone()), &hints, &result, &config);
        assert!(ui.suppressed);
        assert!(attachments.is_empty());

        let mut negative = evidence(hints.clone());
        negative.high_level_answer = HighLevelAnswer::Unknown;
        let (ui, _) = assemble(&plan(Intent::Meta), &negative, &hints, &result, &config);
        assert!(ui.suppressed);
        assert!(ui.banner.is_none());
    }

    #[test]
    fn answer_hints_only_narrow() {
        let evidence = UiHints {
            projects: vec!["a".into(), "b".into()],
            experiences: vec!["job".into()],
        };
        let answer = UiHints {
            projects: vec!["b".into(), "invented".into()],
            experiences: Vec::new(),
        };
        let narrowed = narrow_hints(&evidence, Some(&answer));
        assert_eq!(narrowed.projects, vec!["b"]);
        assert!(narrowed.experiences.is_empty());

        let only_invented = UiHints {
            projects: vec!["invented".into()],
            experiences: Vec::new(),
        };
        assert_eq!(narrow_hints(&evidence, Some(&only_invented)), evidence);
        assert_eq!(narrow_hints(&evidence, None), evidence);
        assert_eq!(narrow_hints(&evidence, Some(&UiHints::default())), evidence);
    }
}
