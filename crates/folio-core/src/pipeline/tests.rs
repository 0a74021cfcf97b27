use std::sync::Arc;

use folio_knowledge::{
    Experience, ExperienceKind, KnowledgeBase, KnowledgeRetrieval, Profile, Project, ResumeEntry,
};
use folio_llm::mock::MockProvider;
use folio_search::SearcherOptions;
use tokio::sync::mpsc;

use super::*;
use crate::evidence::{Completeness, HighLevelAnswer};

fn project(id: &str, name: &str, languages: &[&str]) -> Project {
    Project {
        id: id.into(),
        name: name.into(),
        summary: format!("{name} summary"),
        description: String::new(),
        languages: languages.iter().map(|l| (*l).to_owned()).collect(),
        frameworks: Vec::new(),
        tags: Vec::new(),
        role: None,
        timeframe: None,
        url: None,
        highlights: Vec::new(),
    }
}

fn job(id: &str) -> ResumeEntry {
    ResumeEntry::Experience(Experience {
        id: id.into(),
        kind: ExperienceKind::FullTime,
        company: format!("{id} ltd"),
        title: "Backend engineer".into(),
        location: None,
        timeframe: Some("2020 - 2022".into()),
        summary: "Rust services".into(),
        bullets: Vec::new(),
        skills: vec!["Rust".into()],
        linked_projects: Vec::new(),
    })
}

async fn pipeline_with(kb: KnowledgeBase) -> ChatPipeline {
    let driver = KnowledgeRetrieval::from_knowledge_base(kb, None, SearcherOptions::default())
        .await
        .unwrap();
    let mut config = Config::default();
    config.owner.id = "ada".into();
    config.owner.name = "Ada".into();
    ChatPipeline::new(config, Arc::new(driver))
}

async fn pipeline() -> ChatPipeline {
    pipeline_with(KnowledgeBase::new(
        vec![
            project("p-rust", "Rust search engine", &["Rust"]),
            project("p-web", "Bakery website", &["PHP"]),
        ],
        vec![job("acme")],
        Some(Profile {
            id: "profile".into(),
            name: "Ada".into(),
            headline: "Engineer".into(),
            location: None,
            summary: String::new(),
            about: Vec::new(),
            links: Vec::new(),
        }),
    ))
    .await
}

const PLAN: &str = r#"{"intent":"describe","topic":"rust search","confidence":0.9,
    "focus":"projects","retrieval_requests":[{"source":"projects","query":"rust"}]}"#;

const EVIDENCE: &str = r#"{"high_level_answer":"yes","evidence_completeness":"strong",
    "reasoning":"The search engine is written in Rust.",
    "selected_evidence":[{"source":"project","id":"p-rust","relevance":0.9},
                         {"source":"project","id":"p-ghost"}],
    "ui_hints":{"projects":["p-rust","p-ghost"],"experiences":[]}}"#;

const ANSWER: &str =
    r#"{"message":"Ada built a search engine in Rust.","thoughts":["cited p-rust"]}"#;

fn question() -> Vec<Message> {
    vec![Message::user("What have you built with Rust?")]
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn full_turn_streams_and_renders_cards() {
    let pipeline = pipeline().await;
    let provider = MockProvider::with_responses(vec![PLAN.into(), EVIDENCE.into(), ANSWER.into()])
        .with_chunk_chars(4);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let response = pipeline
        .run(
            &provider,
            &question(),
            RunOptions {
                events: Some(tx),
                ..RunOptions::default()
            },
        )
        .await;

    assert!(response.error.is_none(), "{:?}", response.error);
    assert_eq!(response.message, "Ada built a search engine in Rust.");
    assert_eq!(response.thoughts, vec!["cited p-rust".to_owned()]);
    assert_eq!(response.ui.projects, vec!["p-rust".to_owned()]);
    assert_eq!(response.attachments.len(), 1);
    assert_eq!(provider.call_count(), 3);

    let evidence = response.trace.evidence.as_ref().unwrap();
    assert_eq!(evidence.high_level_answer, HighLevelAnswer::Yes);
    assert_eq!(evidence.evidence_completeness, Completeness::Strong);
    assert_eq!(evidence.selected_evidence.len(), 1);
    assert!(!evidence.ui_hint_warnings.is_empty());

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(ChatEvent::Item { turn_id }) if *turn_id == response.turn_id));
    assert!(matches!(events.last(), Some(ChatEvent::Done { .. })));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Token { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, response.message);

    let traces: Vec<(usize, &ReasoningTrace)> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            ChatEvent::Reasoning { trace } => Some((i, trace)),
            _ => None,
        })
        .collect();
    let first_token = events
        .iter()
        .position(|e| matches!(e, ChatEvent::Token { .. }))
        .unwrap();
    assert_eq!(traces.len(), 4);

    let (_, after_plan) = traces[0];
    assert!(after_plan.plan.is_some());
    assert!(after_plan.retrieval.is_empty());
    let (_, after_retrieval) = traces[1];
    assert!(!after_retrieval.retrieval.is_empty());
    assert!(after_retrieval.evidence.is_none());
    let (at, after_evidence) = traces[2];
    assert!(after_evidence.evidence.is_some());
    assert!(at < first_token);
    let (at, after_answer) = traces[3];
    assert!(at > first_token);
    assert_eq!(after_answer.answer_thoughts, vec!["cited p-rust".to_owned()]);
}

#[tokio::test]
async fn repeated_question_reuses_plan_and_retrieval() {
    let pipeline = pipeline().await;
    let provider = MockProvider::with_responses(vec![
        PLAN.into(),
        EVIDENCE.into(),
        ANSWER.into(),
        EVIDENCE.into(),
        ANSWER.into(),
    ]);

    pipeline.run(&provider, &question(), RunOptions::default()).await;
    let second = pipeline.run(&provider, &question(), RunOptions::default()).await;

    assert!(second.error.is_none());
    assert_eq!(provider.call_count(), 5);
    assert!(second.usage[0].cache_hit);
    assert_eq!(second.usage[0].stage, Stage::Plan);
    assert!(second.trace.retrieval.iter().all(|r| r.cache_hit));
}

#[tokio::test]
async fn meta_turn_skips_retrieval_and_evidence() {
    let pipeline = pipeline().await;
    let provider = MockProvider::with_responses(vec![
        r#"{"intent":"meta","topic":"greeting","confidence":0.95}"#.into(),
        r#"{"message":"Hi! Ask me anything about Ada's work."}"#.into(),
    ]);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let response = pipeline
        .run(
            &provider,
            &[Message::user("hello there")],
            RunOptions {
                events: Some(tx),
                ..RunOptions::default()
            },
        )
        .await;

    assert!(response.error.is_none());
    assert_eq!(provider.call_count(), 2);
    assert!(response.ui.suppressed);
    assert!(response.ui.banner.is_none());
    assert!(response.attachments.is_empty());
    assert_eq!(
        response.trace.evidence.as_ref().unwrap().high_level_answer,
        HighLevelAnswer::NotApplicable
    );

    let skipped: Vec<Stage> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ChatEvent::Stage {
                stage,
                status: StageStatus::Skipped,
                ..
            } => Some(stage),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![Stage::Retrieval, Stage::Evidence]);
}

#[tokio::test]
async fn empty_knowledge_base_skips_evidence_call() {
    let pipeline = pipeline_with(KnowledgeBase::new(Vec::new(), Vec::new(), None)).await;
    let provider = MockProvider::with_responses(vec![
        PLAN.into(),
        r#"{"message":"I could not find anything about that."}"#.into(),
    ]);

    let response = pipeline.run(&provider, &question(), RunOptions::default()).await;

    assert!(response.error.is_none());
    assert_eq!(provider.call_count(), 2);
    let evidence = response.trace.evidence.as_ref().unwrap();
    assert_eq!(evidence.evidence_completeness, Completeness::None);
    assert_eq!(evidence.semantic_flags, vec!["off_topic".to_owned()]);
    assert_eq!(
        response.ui.banner.as_deref(),
        Some(crate::ui::ZERO_EVIDENCE_BANNER)
    );
}

#[tokio::test]
async fn malformed_plan_is_retried() {
    let pipeline = pipeline().await;
    let provider = MockProvider::with_responses(vec![
        "Sure! Here is the plan you asked for.".into(),
        PLAN.into(),
        EVIDENCE.into(),
        ANSWER.into(),
    ]);

    let response = pipeline.run(&provider, &question(), RunOptions::default()).await;

    assert!(response.error.is_none());
    assert_eq!(response.usage[0].attempts, 2);
}

#[tokio::test]
async fn exhausted_retries_fail_with_llm_error() {
    let pipeline = pipeline().await;
    let provider = MockProvider::default();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let response = pipeline
        .run(
            &provider,
            &question(),
            RunOptions {
                events: Some(tx),
                ..RunOptions::default()
            },
        )
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.code, "llm_error");
    assert!(!error.retryable);
    assert_eq!(provider.call_count(), 3);
    assert!(response.ui.projects.is_empty());
    assert!(!response.message.is_empty());

    let events = drain(&mut rx);
    assert!(matches!(events.last(), Some(ChatEvent::Error { .. })));
    assert!(!events.iter().any(|e| matches!(e, ChatEvent::Done { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::Stage {
            stage: Stage::Plan,
            status: StageStatus::Failed,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn soft_timeout_aborts_turn() {
    let pipeline = pipeline().await;
    let provider = MockProvider::with_responses(vec![PLAN.into()]).with_delay(10_000);

    let response = pipeline
        .run(
            &provider,
            &question(),
            RunOptions {
                soft_timeout_ms: Some(100),
                ..RunOptions::default()
            },
        )
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.code, "llm_timeout");
    assert!(error.retryable);
    assert_eq!(error.retry_after_ms, Some(1_000));
}

#[tokio::test]
async fn caller_cancellation_stops_turn() {
    let pipeline = pipeline().await;
    let provider = MockProvider::with_responses(vec![PLAN.into()]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let response = pipeline
        .run(
            &provider,
            &question(),
            RunOptions {
                cancel: Some(cancel),
                ..RunOptions::default()
            },
        )
        .await;

    assert_eq!(response.error.unwrap().code, "llm_timeout");
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_call() {
    let pipeline = pipeline().await;
    let provider = MockProvider::default();

    let response = pipeline
        .run(
            &provider,
            &[Message::assistant("no user message")],
            RunOptions::default(),
        )
        .await;

    assert_eq!(response.error.unwrap().code, "internal_error");
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn answer_hints_narrow_cards() {
    let pipeline = pipeline().await;
    let plan = r#"{"intent":"list","topic":"projects","confidence":0.9,"focus":"projects",
        "retrieval_requests":[{"source":"projects","query":"search engine website"}]}"#;
    let evidence = r#"{"high_level_answer":"yes","evidence_completeness":"strong",
        "selected_evidence":[{"source":"project","id":"p-rust"},{"source":"project","id":"p-web"}],
        "ui_hints":{"projects":["p-rust","p-web"]}}"#;
    let answer = r#"{"message":"Here is the Rust one.","ui_hints":{"projects":["p-rust"]}}"#;
    let provider =
        MockProvider::with_responses(vec![plan.into(), evidence.into(), answer.into()]);

    let response = pipeline.run(&provider, &question(), RunOptions::default()).await;

    assert!(response.error.is_none());
    assert_eq!(response.ui.projects, vec!["p-rust".to_owned()]);
}

#[tokio::test]
async fn staged_providers_route_each_stage() {
    let pipeline = pipeline().await;
    let planner = MockProvider::with_responses(vec![PLAN.into()]);
    let evidence = MockProvider::with_responses(vec![EVIDENCE.into()]);
    let answer = MockProvider::with_responses(vec![ANSWER.into()]);

    let response = pipeline
        .run_staged(
            StageProviders {
                planner: &planner,
                evidence: &evidence,
                answer: &answer,
            },
            &question(),
            RunOptions::default(),
        )
        .await;

    assert!(response.error.is_none());
    assert_eq!(planner.call_count(), 1);
    assert_eq!(evidence.call_count(), 1);
    assert_eq!(answer.call_count(), 1);
    let usage_stages: Vec<Stage> = response.usage.iter().map(|u| u.stage).collect();
    assert_eq!(usage_stages, vec![Stage::Plan, Stage::Evidence, Stage::Answer]);
}
