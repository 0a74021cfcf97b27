use std::future::Future;

use folio_llm::structured::{chat_typed, parse_structured, response_schema};
use folio_llm::{LlmError, LlmProvider, Message};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tokio_stream::StreamExt;

use super::cancel::TurnCancel;
use crate::answer::{AnswerPayload, MessageStreamer};
use crate::error::PipelineError;
use crate::events::{ChatEvent, EventSink, Stage};
use crate::usage::StageUsage;

/// Race `fut` against turn cancellation.
pub(crate) async fn guarded<T>(
    cancel: &TurnCancel,
    stage: Stage,
    fut: impl Future<Output = Result<T, LlmError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(cancel.error(stage)),
        result = fut => result.map_err(|source| PipelineError::Llm { stage, source }),
    }
}

/// Schema-constrained call, retried while the output does not parse.
pub(crate) async fn structured<T, P>(
    provider: &P,
    messages: &[Message],
    stage: Stage,
    cancel: &TurnCancel,
    max_attempts: u32,
    usage: &mut StageUsage,
) -> Result<T, PipelineError>
where
    T: DeserializeOwned + JsonSchema,
    P: LlmProvider,
{
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        usage.attempts = attempt;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancel.error(stage)),
            result = chat_typed::<T, P>(provider, messages) => result,
        };
        usage.add_tokens(provider.last_usage());

        match result {
            Ok(value) => return Ok(value),
            Err(e @ LlmError::StructuredParse(_)) => {
                tracing::warn!(%stage, attempt, max_attempts, "malformed structured output: {e}");
                last_error = e.to_string();
            }
            Err(source) => return Err(PipelineError::Llm { stage, source }),
        }
    }

    Err(PipelineError::MalformedOutput {
        stage,
        attempts: max_attempts,
        detail: last_error,
    })
}

/// Stream the answer, emitting message deltas as token events.
///
/// A malformed final document is retried only while nothing has reached the
/// user; once text was emitted it becomes the answer.
pub(crate) async fn stream_answer<P: LlmProvider>(
    provider: &P,
    messages: &[Message],
    cancel: &TurnCancel,
    max_attempts: u32,
    sink: &EventSink,
    usage: &mut StageUsage,
) -> Result<AnswerPayload, PipelineError> {
    let stage = Stage::Answer;
    let schema = response_schema::<AnswerPayload>()
        .map_err(|source| PipelineError::Llm { stage, source })?;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        usage.attempts = attempt;
        let mut streamer = MessageStreamer::new();

        let raw = if provider.supports_streaming() {
            let mut stream =
                guarded(cancel, stage, provider.chat_structured_stream(messages, &schema)).await?;
            let mut raw = String::new();
            loop {
                let item = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(cancel.error(stage)),
                    item = stream.next() => item,
                };
                let Some(chunk) = item else {
                    break;
                };
                let chunk = chunk.map_err(|source| PipelineError::Llm { stage, source })?;
                raw.push_str(&chunk);
                if let Some(delta) = streamer.push(&raw) {
                    sink.emit(ChatEvent::Token { delta });
                }
            }
            raw
        } else {
            guarded(cancel, stage, provider.chat_structured(messages, &schema)).await?
        };
        usage.add_tokens(provider.last_usage());

        match parse_structured::<AnswerPayload>(&raw) {
            Ok(mut payload) => {
                if let Some(delta) = streamer.finish(&payload.message) {
                    sink.emit(ChatEvent::Token { delta });
                }
                streamer.emitted().clone_into(&mut payload.message);
                return Ok(payload);
            }
            Err(e) if !streamer.emitted().is_empty() => {
                tracing::warn!(attempt, "answer did not parse after streaming, keeping streamed text: {e}");
                return Ok(AnswerPayload {
                    message: streamer.emitted().to_owned(),
                    thoughts: Vec::new(),
                    ui_hints: None,
                });
            }
            Err(e) => {
                tracing::warn!(attempt, max_attempts, "malformed answer output: {e}");
                last_error = e.to_string();
            }
        }
    }

    Err(PipelineError::MalformedOutput {
        stage,
        attempts: max_attempts,
        detail: last_error,
    })
}
