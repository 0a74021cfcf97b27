use std::fmt::Write as _;

use folio_llm::Message;

use crate::config::OwnerConfig;
use crate::conversation::Conversation;
use crate::evidence::{CandidateTable, EvidenceSummary};
use crate::plan::RetrievalPlan;

const PLANNER_PROMPT: &str = "\
You plan retrieval for a portfolio assistant that answers questions about {owner}.\n\
\n\
Read the conversation and decide what the latest user message is asking.\n\
\n\
## Fields\n\
- intent: describe (explain something), list (enumerate all matching items), \
compare (contrast items), fact (a specific detail or yes/no), meta (greetings, \
small talk or questions about the assistant itself).\n\
- topic: a short search phrase for the subject of the question.\n\
- confidence: 0 to 1, how sure you are about the interpretation.\n\
- focus: projects, resume or mixed.\n\
- experience_scope: employment_only when the user asks about jobs or employers only, else any.\n\
- retrieval_requests: searches to run. source is projects, resume or profile. \
Use profile for questions about {owner} as a person.\n\
- resume_facets: any of experience, education, award, skill.\n\
- answer_length: brief, standard or detailed.\n\
- ui_target: cards when the user wants to see items, text_only when they ask for \
plain text, else auto.\n\
\n\
Never invent facts. Only plan searches.";

const EVIDENCE_PROMPT: &str = "\
You review retrieved documents about {owner} and decide what evidence answers the question.\n\
\n\
Each document is listed as [source:id] title: snippet.\n\
\n\
## Rules\n\
- selected_evidence: only documents that support the answer. Copy source and id \
exactly from the listing. Never cite a document that is not listed.\n\
- high_level_answer: yes, no, partial, unknown or not_applicable.\n\
- evidence_completeness: strong when the documents fully answer the question, \
weak when they only partly do, none when nothing is relevant.\n\
- ui_hints: project and experience ids worth showing as cards. List every \
relevant one when the user asks for a list.\n\
- semantic_flags: short labels such as off_topic or ambiguous, if any.\n\
- reasoning: one or two sentences.";

const ANSWER_PROMPT: &str = "\
You are the portfolio assistant of {owner}. Answer the latest user message.\n\
\n\
## Rules\n\
- Use only the evidence below. If it does not cover the question, say so plainly.\n\
- Do not mention documents, ids, retrieval or evidence in the message.\n\
- message: the reply in Markdown.\n\
- thoughts: a few short private notes on how the evidence was used.\n\
- ui_hints: optional, only ids already listed in the evidence ui hints, and only \
to show fewer cards.";

fn with_owner(template: &str, owner: &OwnerConfig) -> String {
    let mut prompt = template.replace("{owner}", &owner.name);
    if !owner.persona.trim().is_empty() {
        prompt.push_str("\n\n## Persona\n");
        prompt.push_str(owner.persona.trim());
    }
    prompt
}

#[must_use]
pub fn planner_messages(owner: &OwnerConfig, conversation: &Conversation) -> Vec<Message> {
    vec![
        Message::system(with_owner(PLANNER_PROMPT, owner)),
        Message::user(format!("Conversation:\n{}", conversation.snippet())),
    ]
}

#[must_use]
pub fn evidence_messages(
    owner: &OwnerConfig,
    plan: &RetrievalPlan,
    question: &str,
    table: &CandidateTable,
) -> Vec<Message> {
    let mut user = String::new();
    let _ = writeln!(user, "Question: {question}");
    let _ = writeln!(user, "Intent: {:?}", plan.intent);
    if !plan.topic.is_empty() {
        let _ = writeln!(user, "Topic: {}", plan.topic);
    }
    let _ = write!(user, "\nDocuments:\n{}", table.digest());
    vec![
        Message::system(with_owner(EVIDENCE_PROMPT, owner)),
        Message::user(user),
    ]
}

#[must_use]
pub fn answer_messages(
    owner: &OwnerConfig,
    plan: &RetrievalPlan,
    evidence: &EvidenceSummary,
    conversation: &Conversation,
) -> Vec<Message> {
    let mut system = with_owner(ANSWER_PROMPT, owner);
    let _ = write!(
        system,
        "\n\n## Plan\nanswer_mode: {:?}\nanswer_length: {:?}\nenumerate_all_relevant: {}",
        plan.answer_mode, plan.answer_length_hint, plan.enumerate_all_relevant
    );
    let evidence_json = serde_json::to_string_pretty(evidence).unwrap_or_default();
    let _ = write!(system, "\n\n## Evidence\n{evidence_json}");

    let mut messages = Vec::with_capacity(conversation.messages.len() + 1);
    messages.push(Message::system(system));
    messages.extend(conversation.messages.iter().cloned());
    messages
}

#[cfg(test)]
mod tests {
    use folio_llm::Role;

    use super::*;

    fn owner() -> OwnerConfig {
        OwnerConfig {
            id: "ada".into(),
            name: "Ada".into(),
            persona: "Warm, precise, British spelling.".into(),
        }
    }

    fn conversation() -> Conversation {
        Conversation::window(&[Message::user("What did you build in Rust?")], 12, 1_000, 1_000)
            .unwrap()
    }

    #[test]
    fn planner_prompt_names_owner_and_persona() {
        let messages = planner_messages(&owner(), &conversation());
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("questions about Ada"));
        assert!(messages[0].content.contains("British spelling"));
        assert!(!messages[0].content.contains("{owner}"));
        assert!(messages[1].content.contains("user: What did you build in Rust?"));
    }

    #[test]
    fn answer_prompt_carries_evidence_and_history() {
        let plan = crate::plan::RetrievalPlan::normalize(
            crate::plan::RawPlan::default(),
            "What did you build in Rust?",
            20,
        );
        let messages = answer_messages(
            &owner(),
            &plan,
            &EvidenceSummary::no_documents(),
            &conversation(),
        );
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("off_topic"));
        assert!(messages[0].content.contains("answer_mode: Narrative"));
        assert_eq!(messages[1].role, Role::User);
    }
}
