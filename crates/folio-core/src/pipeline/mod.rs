//! The staged chat pipeline: plan, retrieve, summarize evidence, answer.

mod cancel;
mod llm;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Instant;

use folio_knowledge::RetrievalDriver;
use folio_llm::{LlmProvider, Message};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use self::cancel::TurnCancel;
use crate::answer::AnswerPayload;
use crate::cache::LruStore;
use crate::config::Config;
use crate::conversation::Conversation;
use crate::error::{ChatError, PipelineError};
use crate::events::{ChatEvent, EventSink, Stage, StageStatus};
use crate::evidence::{CandidateTable, EvidenceSummary, RawEvidence};
use crate::plan::{RawPlan, RetrievalPlan};
use crate::prompts;
use crate::retrieval::{self, CachedHits, RetrievalOutcome};
use crate::ui::{self, Attachment, UiPayload};
use crate::usage::{ReasoningTrace, StageUsage};

/// Providers used by each model-backed stage.
pub struct StageProviders<'a, P> {
    pub planner: &'a P,
    pub evidence: &'a P,
    pub answer: &'a P,
}

impl<'a, P> StageProviders<'a, P> {
    /// Same provider for every stage.
    #[must_use]
    pub fn uniform(provider: &'a P) -> Self {
        Self {
            planner: provider,
            evidence: provider,
            answer: provider,
        }
    }
}

impl<P> Clone for StageProviders<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for StageProviders<'_, P> {}

#[derive(Debug, Default)]
pub struct RunOptions {
    pub events: Option<mpsc::UnboundedSender<ChatEvent>>,
    pub cancel: Option<CancellationToken>,
    /// Overrides `pipeline.soft_timeout_ms`.
    pub soft_timeout_ms: Option<u64>,
}

/// Result of one turn. Always well-formed, even when the turn failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatbotResponse {
    pub turn_id: String,
    pub message: String,
    pub thoughts: Vec<String>,
    pub ui: UiPayload,
    pub attachments: Vec<Attachment>,
    pub trace: ReasoningTrace,
    pub usage: Vec<StageUsage>,
    pub truncation_applied: bool,
    pub total_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ChatError>,
}

struct Turn {
    trace: ReasoningTrace,
    usage: Vec<StageUsage>,
    truncation_applied: bool,
}

struct Completed {
    answer: AnswerPayload,
    ui: UiPayload,
    attachments: Vec<Attachment>,
}

pub struct ChatPipeline {
    config: Config,
    driver: Arc<dyn RetrievalDriver>,
    planner_cache: LruStore<(String, String), RetrievalPlan>,
    retrieval_cache: LruStore<String, CachedHits>,
}

impl ChatPipeline {
    #[must_use]
    pub fn new(config: Config, driver: Arc<dyn RetrievalDriver>) -> Self {
        let planner_cache = LruStore::new(config.pipeline.planner_cache_size);
        let retrieval_cache = LruStore::new(config.pipeline.retrieval_cache_size);
        Self {
            config,
            driver,
            planner_cache,
            retrieval_cache,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serve one turn with a single provider for every stage.
    pub async fn run<P: LlmProvider>(
        &self,
        provider: &P,
        messages: &[Message],
        options: RunOptions,
    ) -> ChatbotResponse {
        self.run_staged(StageProviders::uniform(provider), messages, options)
            .await
    }

    /// Serve one turn. Emits exactly one `done` or one `error` event.
    pub async fn run_staged<P: LlmProvider>(
        &self,
        providers: StageProviders<'_, P>,
        messages: &[Message],
        options: RunOptions,
    ) -> ChatbotResponse {
        let started = Instant::now();
        let turn_id = uuid::Uuid::new_v4().to_string();
        let sink = EventSink::new(options.events);
        sink.emit(ChatEvent::Item {
            turn_id: turn_id.clone(),
        });

        let soft_timeout_ms = options
            .soft_timeout_ms
            .unwrap_or(self.config.pipeline.soft_timeout_ms);
        let cancel = TurnCancel::arm(options.cancel.as_ref(), soft_timeout_ms);

        let mut turn = Turn {
            trace: ReasoningTrace {
                turn_id: turn_id.clone(),
                ..ReasoningTrace::default()
            },
            usage: Vec::new(),
            truncation_applied: false,
        };

        let span = tracing::info_span!("turn", turn_id = %turn_id);
        let outcome = self
            .execute(providers, messages, &cancel, &sink, &mut turn)
            .instrument(span)
            .await;
        let total_duration_ms = elapsed_ms(started);

        match outcome {
            Ok(done) => {
                tracing::info!(
                    turn_id = %turn_id,
                    total_duration_ms,
                    cards = done.ui.card_count(),
                    "turn complete"
                );
                sink.emit(ChatEvent::Done {
                    total_duration_ms,
                    truncation_applied: turn.truncation_applied,
                });
                ChatbotResponse {
                    turn_id,
                    message: done.answer.message,
                    thoughts: done.answer.thoughts,
                    ui: done.ui,
                    attachments: done.attachments,
                    trace: turn.trace,
                    usage: turn.usage,
                    truncation_applied: turn.truncation_applied,
                    total_duration_ms,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(turn_id = %turn_id, code = e.code(), "turn failed: {e}");
                let error = ChatError::from(&e);
                sink.emit(ChatEvent::Error {
                    error: error.clone(),
                });
                ChatbotResponse {
                    turn_id,
                    message: e.user_message().to_owned(),
                    thoughts: Vec::new(),
                    ui: UiPayload::default(),
                    attachments: Vec::new(),
                    trace: turn.trace,
                    usage: turn.usage,
                    truncation_applied: turn.truncation_applied,
                    total_duration_ms,
                    error: Some(error),
                }
            }
        }
    }

    async fn execute<P: LlmProvider>(
        &self,
        providers: StageProviders<'_, P>,
        messages: &[Message],
        cancel: &TurnCancel,
        sink: &EventSink,
        turn: &mut Turn,
    ) -> Result<Completed, PipelineError> {
        let p = &self.config.pipeline;
        let conversation = Conversation::window(
            messages,
            p.history_max_messages,
            p.history_max_chars,
            p.max_user_message_chars,
        )?;
        turn.truncation_applied = conversation.truncated;

        let plan = self
            .plan_stage(providers.planner, &conversation, cancel, sink, turn)
            .instrument(tracing::info_span!("stage", stage = "plan"))
            .await?;
        turn.trace.plan = Some(plan.clone());
        emit_trace(sink, turn);

        let retrieved = self
            .retrieval_stage(&plan, cancel, sink)
            .instrument(tracing::info_span!("stage", stage = "retrieval"))
            .await?;
        turn.trace.retrieval.clone_from(&retrieved.executed);
        emit_trace(sink, turn);

        let evidence = self
            .evidence_stage(
                providers.evidence,
                &plan,
                &conversation,
                &retrieved,
                cancel,
                sink,
                turn,
            )
            .instrument(tracing::info_span!("stage", stage = "evidence"))
            .await?;
        turn.trace.evidence = Some(evidence.clone());
        emit_trace(sink, turn);

        let answer = self
            .answer_stage(
                providers.answer,
                &plan,
                &evidence,
                &conversation,
                cancel,
                sink,
                turn,
            )
            .instrument(tracing::info_span!("stage", stage = "answer"))
            .await?;
        turn.trace.answer_thoughts.clone_from(&answer.thoughts);
        emit_trace(sink, turn);

        let hints = ui::narrow_hints(&evidence.ui_hints, answer.ui_hints.as_ref());
        let (ui, attachments) = ui::assemble(&plan, &evidence, &hints, &retrieved.result, p);
        sink.emit(ChatEvent::Ui { ui: ui.clone() });
        for attachment in &attachments {
            sink.emit(ChatEvent::Attachment {
                attachment: attachment.clone(),
            });
        }

        Ok(Completed {
            answer,
            ui,
            attachments,
        })
    }

    async fn plan_stage<P: LlmProvider>(
        &self,
        provider: &P,
        conversation: &Conversation,
        cancel: &TurnCancel,
        sink: &EventSink,
        turn: &mut Turn,
    ) -> Result<RetrievalPlan, PipelineError> {
        let started = Instant::now();
        sink.stage(Stage::Plan, StageStatus::Started, None);
        cancel.check(Stage::Plan)?;

        let mut usage = StageUsage::new(Stage::Plan, self.config.llm.planner_model());
        let key = (self.config.owner.id.clone(), conversation.snippet());

        let result = if let Some(plan) = self.planner_cache.get(&key) {
            tracing::debug!("planner cache hit");
            usage.cache_hit = true;
            Ok(plan)
        } else {
            let messages = prompts::planner_messages(&self.config.owner, conversation);
            llm::structured::<RawPlan, P>(
                provider,
                &messages,
                Stage::Plan,
                cancel,
                self.config.pipeline.max_structured_attempts,
                &mut usage,
            )
            .await
            .map(|raw| {
                let plan = RetrievalPlan::normalize(
                    raw,
                    conversation.last_user_message(),
                    self.config.pipeline.max_top_k,
                );
                self.planner_cache.put(key, plan.clone());
                plan
            })
        };

        usage.duration_ms = elapsed_ms(started);
        turn.usage.push(usage);
        let plan = settle(sink, Stage::Plan, started, result)?;
        tracing::info!(
            intent = ?plan.intent,
            requests = plan.retrieval_requests.len(),
            confidence = plan.planner_confidence,
            "plan ready"
        );
        Ok(plan)
    }

    async fn retrieval_stage(
        &self,
        plan: &RetrievalPlan,
        cancel: &TurnCancel,
        sink: &EventSink,
    ) -> Result<RetrievalOutcome, PipelineError> {
        if plan.retrieval_requests.is_empty() {
            sink.stage(Stage::Retrieval, StageStatus::Skipped, None);
            return Ok(RetrievalOutcome::default());
        }

        let started = Instant::now();
        sink.stage(Stage::Retrieval, StageStatus::Started, None);
        cancel.check(Stage::Retrieval)?;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(cancel.error(Stage::Retrieval)),
            result = retrieval::execute(
                self.driver.as_ref(),
                &self.retrieval_cache,
                plan,
                &self.config.owner.id,
                &self.config.pipeline,
            ) => result,
        };
        let outcome = settle(sink, Stage::Retrieval, started, result)?;
        tracing::info!(
            documents = outcome.result.total_documents(),
            "retrieval ready"
        );
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn evidence_stage<P: LlmProvider>(
        &self,
        provider: &P,
        plan: &RetrievalPlan,
        conversation: &Conversation,
        retrieved: &RetrievalOutcome,
        cancel: &TurnCancel,
        sink: &EventSink,
        turn: &mut Turn,
    ) -> Result<EvidenceSummary, PipelineError> {
        if plan.is_meta() {
            sink.stage(Stage::Evidence, StageStatus::Skipped, None);
            return Ok(EvidenceSummary::not_applicable());
        }
        if retrieved.result.is_empty() {
            tracing::info!("no documents retrieved, skipping evidence model call");
            sink.stage(Stage::Evidence, StageStatus::Skipped, None);
            return Ok(EvidenceSummary::no_documents());
        }

        let started = Instant::now();
        sink.stage(Stage::Evidence, StageStatus::Started, None);
        cancel.check(Stage::Evidence)?;

        let table = CandidateTable::build(&retrieved.result, &self.config.pipeline);
        let messages = prompts::evidence_messages(
            &self.config.owner,
            plan,
            conversation.last_user_message(),
            &table,
        );
        let mut usage = StageUsage::new(Stage::Evidence, self.config.llm.evidence_model());
        let result = llm::structured::<RawEvidence, P>(
            provider,
            &messages,
            Stage::Evidence,
            cancel,
            self.config.pipeline.max_structured_attempts,
            &mut usage,
        )
        .await
        .map(|raw| EvidenceSummary::normalize(raw, &table, plan.is_meta()));

        usage.duration_ms = elapsed_ms(started);
        turn.usage.push(usage);
        let evidence = settle(sink, Stage::Evidence, started, result)?;
        tracing::info!(
            answer = ?evidence.high_level_answer,
            completeness = ?evidence.evidence_completeness,
            selected = evidence.selected_evidence.len(),
            "evidence ready"
        );
        Ok(evidence)
    }

    #[allow(clippy::too_many_arguments)]
    async fn answer_stage<P: LlmProvider>(
        &self,
        provider: &P,
        plan: &RetrievalPlan,
        evidence: &EvidenceSummary,
        conversation: &Conversation,
        cancel: &TurnCancel,
        sink: &EventSink,
        turn: &mut Turn,
    ) -> Result<AnswerPayload, PipelineError> {
        let started = Instant::now();
        sink.stage(Stage::Answer, StageStatus::Started, None);
        cancel.check(Stage::Answer)?;

        let messages = prompts::answer_messages(&self.config.owner, plan, evidence, conversation);
        let mut usage = StageUsage::new(Stage::Answer, self.config.llm.answer_model());
        let result = llm::stream_answer(
            provider,
            &messages,
            cancel,
            self.config.pipeline.max_structured_attempts,
            sink,
            &mut usage,
        )
        .await;

        usage.duration_ms = elapsed_ms(started);
        turn.usage.push(usage);
        settle(sink, Stage::Answer, started, result)
    }
}

/// Publish the trace as it stands after a stage.
fn emit_trace(sink: &EventSink, turn: &Turn) {
    sink.emit(ChatEvent::Reasoning {
        trace: turn.trace.clone(),
    });
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Emit the stage's terminal status and pass the result through.
fn settle<T>(
    sink: &EventSink,
    stage: Stage,
    started: Instant,
    result: Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    let status = if result.is_ok() {
        StageStatus::Completed
    } else {
        StageStatus::Failed
    };
    sink.stage(stage, status, Some(elapsed_ms(started)));
    result
}
