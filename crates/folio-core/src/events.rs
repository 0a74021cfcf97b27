//! Per-turn event stream delivered to the transport layer.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::ChatError;
use crate::ui::{Attachment, UiPayload};
use crate::usage::ReasoningTrace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Retrieval,
    Evidence,
    Answer,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Retrieval => "retrieval",
            Self::Evidence => "evidence",
            Self::Answer => "answer",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// First event of a turn.
    Item { turn_id: String },
    Stage {
        stage: Stage,
        status: StageStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    Token { delta: String },
    Reasoning { trace: ReasoningTrace },
    Ui { ui: UiPayload },
    Attachment { attachment: Attachment },
    Error { error: ChatError },
    Done {
        total_duration_ms: u64,
        truncation_applied: bool,
    },
}

impl ChatEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Item { .. } => "item",
            Self::Stage { .. } => "stage",
            Self::Token { .. } => "token",
            Self::Reasoning { .. } => "reasoning",
            Self::Ui { .. } => "ui",
            Self::Attachment { .. } => "attachment",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }

    /// Render as a server-sent-events frame.
    #[must_use]
    pub fn to_sse_frame(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".into());
        format!("event: {}\ndata: {data}\n\n", self.name())
    }
}

/// Fire-and-forget event delivery. A missing or closed receiver never fails a turn.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ChatEvent>>,
}

impl EventSink {
    #[must_use]
    pub fn new(tx: Option<mpsc::UnboundedSender<ChatEvent>>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: ChatEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.send(event) {
            tracing::warn!(event = e.0.name(), "event receiver closed, dropping event");
        }
    }

    pub fn stage(&self, stage: Stage, status: StageStatus, duration_ms: Option<u64>) {
        self.emit(ChatEvent::Stage {
            stage,
            status,
            duration_ms,
        });
    }
}
