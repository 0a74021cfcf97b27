use std::future::Future;
use std::pin::Pin;

use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Incremental text chunks of a streamed completion.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// JSON schema the response must conform to.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

/// Token accounting reported by the provider for its most recent call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

pub trait LlmProvider: Send + Sync {
    /// Send messages to the LLM and return the assistant response.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or the response is invalid.
    fn chat(&self, messages: &[Message]) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Send messages and receive the response as a stream of text chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be started.
    fn chat_stream(
        &self,
        messages: &[Message],
    ) -> impl Future<Output = Result<ChatStream, LlmError>> + Send;

    fn supports_streaming(&self) -> bool;

    /// # Errors
    ///
    /// Returns an error if the provider does not support embeddings or the request fails.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    /// Embed several texts, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns the first embedding failure.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send {
        async move {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }
    }

    fn supports_embeddings(&self) -> bool;

    fn name(&self) -> &str;

    /// Request a response constrained to `schema`.
    ///
    /// Providers without native structured output get the schema injected
    /// into the system prompt instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying chat call fails.
    fn chat_structured(
        &self,
        messages: &[Message],
        schema: &ResponseSchema,
    ) -> impl Future<Output = Result<String, LlmError>> + Send {
        let prompted = with_schema_instruction(messages, schema);
        async move { self.chat(&prompted).await }
    }

    /// Streaming variant of [`LlmProvider::chat_structured`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be started.
    fn chat_structured_stream(
        &self,
        messages: &[Message],
        schema: &ResponseSchema,
    ) -> impl Future<Output = Result<ChatStream, LlmError>> + Send {
        let prompted = with_schema_instruction(messages, schema);
        async move { self.chat_stream(&prompted).await }
    }

    /// Usage reported for the most recent completed call, if the backend reports it.
    fn last_usage(&self) -> Option<TokenUsage> {
        None
    }
}

/// Append a JSON-schema instruction to the system prompt (inserting one when absent).
#[must_use]
pub fn with_schema_instruction(messages: &[Message], schema: &ResponseSchema) -> Vec<Message> {
    let schema_text = serde_json::to_string(&schema.schema).unwrap_or_default();
    let instruction = format!(
        "Respond with a single JSON object named {} that matches this JSON schema. \
         Do not wrap it in prose.\n{schema_text}",
        schema.name
    );

    let mut out = messages.to_vec();
    if let Some(system) = out.iter_mut().find(|m| m.role == Role::System) {
        system.content.push_str("\n\n");
        system.content.push_str(&instruction);
    } else {
        out.insert(0, Message::system(instruction));
    }
    out
}
