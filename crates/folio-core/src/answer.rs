//! Answer payload and incremental message streaming.

use folio_llm::partial_json::extract_string_field;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::evidence::UiHints;

/// Field of the answer object streamed to the user.
pub const MESSAGE_FIELD: &str = "message";

/// Final answer as produced by the answer stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnswerPayload {
    /// The reply shown to the user.
    pub message: String,
    /// Short private notes on how the evidence was used.
    #[serde(default)]
    pub thoughts: Vec<String>,
    /// Subset of the evidence ui hints worth showing, if narrower.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_hints: Option<UiHints>,
}

/// Turns growing JSON snapshots of an [`AnswerPayload`] into message deltas.
///
/// Only text extending what was already emitted is produced. Trailing
/// whitespace is held back until something follows it.
#[derive(Debug, Clone, Default)]
pub struct MessageStreamer {
    emitted: String,
    diverged: bool,
}

impl MessageStreamer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the full snapshot received so far; returns the new suffix, if any.
    pub fn push(&mut self, snapshot: &str) -> Option<String> {
        let message = extract_string_field(snapshot, MESSAGE_FIELD)?;
        self.advance(&message)
    }

    /// Feed the parsed final message; returns whatever was not streamed yet.
    pub fn finish(&mut self, final_message: &str) -> Option<String> {
        self.advance(final_message)
    }

    /// Text delivered so far.
    #[must_use]
    pub fn emitted(&self) -> &str {
        &self.emitted
    }

    /// Whether a snapshot ever contradicted the emitted prefix.
    #[must_use]
    pub fn diverged(&self) -> bool {
        self.diverged
    }

    fn advance(&mut self, message: &str) -> Option<String> {
        let candidate = message.trim_end();
        if !candidate.starts_with(self.emitted.as_str()) {
            if !self.diverged {
                tracing::warn!("streamed message diverged from emitted prefix");
            }
            self.diverged = true;
            return None;
        }
        if candidate.len() == self.emitted.len() {
            return None;
        }
        let delta = candidate[self.emitted.len()..].to_owned();
        self.emitted.push_str(&delta);
        Some(delta)
    }
}
