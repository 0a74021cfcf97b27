//! LLM provider abstraction, structured output and streaming helpers.

pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod partial_json;
pub mod provider;
pub(crate) mod retry;
pub(crate) mod sse;
pub mod structured;

pub use error::LlmError;
pub use provider::{LlmProvider, Message, ResponseSchema, Role, TokenUsage};
