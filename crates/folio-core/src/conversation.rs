//! Input validation and the sliding history window.

use folio_llm::{Message, Role};

use crate::error::PipelineError;

/// Recent conversation handed to the planner and answer stages.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    /// Non-system messages inside the window, oldest first. Never empty.
    pub messages: Vec<Message>,
    /// Whether any earlier message was cut to fit the window.
    pub truncated: bool,
}

impl Conversation {
    /// Validate `messages` and cut them down to the window.
    ///
    /// System messages are ignored; prompts are built by the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidInput` when there is no trailing user
    /// message, it is blank, or it exceeds `max_user_chars`.
    pub fn window(
        messages: &[Message],
        max_messages: usize,
        max_chars: usize,
        max_user_chars: usize,
    ) -> Result<Self, PipelineError> {
        let turns: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();

        let Some(last) = turns.last() else {
            return Err(PipelineError::InvalidInput("no messages".into()));
        };
        if last.role != Role::User {
            return Err(PipelineError::InvalidInput(
                "last message must come from the user".into(),
            ));
        }
        if last.content.trim().is_empty() {
            return Err(PipelineError::InvalidInput("empty user message".into()));
        }
        let user_chars = last.content.chars().count();
        if user_chars > max_user_chars {
            return Err(PipelineError::InvalidInput(format!(
                "user message has {user_chars} characters, limit is {max_user_chars}"
            )));
        }

        let keep = max_messages.max(1).min(turns.len());
        let mut start = turns.len() - keep;
        let mut total: usize = turns[start..].iter().map(|m| m.content.chars().count()).sum();
        while total > max_chars && start < turns.len() - 1 {
            total -= turns[start].content.chars().count();
            start += 1;
        }

        Ok(Self {
            messages: turns[start..].iter().map(|m| (*m).clone()).collect(),
            truncated: start > 0,
        })
    }

    /// The trailing user message.
    #[must_use]
    pub fn last_user_message(&self) -> &str {
        self.messages.last().map_or("", |m| m.content.as_str())
    }

    /// Plain-text rendering used in prompts and as the planner cache key.
    #[must_use]
    pub fn snippet(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                };
                format!("{role}: {}", m.content.trim())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
