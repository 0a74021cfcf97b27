//! Folio answer pipeline: plan, retrieve, weigh evidence, stream an answer and
//! assemble UI cards for one chat turn.

pub mod answer;
pub mod cache;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod evidence;
pub mod pipeline;
pub mod plan;
pub mod prompts;
pub mod retrieval;
pub mod ui;
pub mod usage;

pub use config::Config;
pub use error::{ChatError, PipelineError};
pub use events::{ChatEvent, Stage, StageStatus};
pub use evidence::EvidenceSummary;
pub use pipeline::{ChatPipeline, ChatbotResponse, RunOptions, StageProviders};
pub use plan::RetrievalPlan;
pub use ui::{Attachment, UiPayload};
pub use usage::{ReasoningTrace, StageUsage};
