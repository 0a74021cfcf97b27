//! Schema generation and tolerant parsing for structured model output.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message, ResponseSchema};

/// Build the response schema for `T`, named after the type.
///
/// # Errors
///
/// Returns `LlmError::StructuredParse` if the generated schema cannot be serialized.
pub fn response_schema<T: JsonSchema>() -> Result<ResponseSchema, LlmError> {
    let schema = schemars::schema_for!(T);
    let schema =
        serde_json::to_value(&schema).map_err(|e| LlmError::StructuredParse(e.to_string()))?;
    let name = std::any::type_name::<T>()
        .rsplit("::")
        .next()
        .unwrap_or("Output")
        .to_owned();
    Ok(ResponseSchema { name, schema })
}

/// One way of locating a JSON document inside raw model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// The whole response is the document.
    Direct,
    /// The document sits inside a ```json fenced block.
    FencedBlock,
    /// The first balanced `{...}` block in the response.
    FirstJsonBlock,
}

/// Strategies in the order they are attempted.
pub const PARSE_STRATEGIES: [ParseStrategy; 3] = [
    ParseStrategy::Direct,
    ParseStrategy::FencedBlock,
    ParseStrategy::FirstJsonBlock,
];

impl ParseStrategy {
    /// Slice of `raw` this strategy would hand to the JSON parser.
    #[must_use]
    pub fn candidate(self, raw: &str) -> Option<&str> {
        match self {
            Self::Direct => {
                let trimmed = raw.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            Self::FencedBlock => fenced_block(raw),
            Self::FirstJsonBlock => first_json_block(raw),
        }
    }
}

/// Parse `raw` into `T`, trying each [`ParseStrategy`] in order.
///
/// # Errors
///
/// Returns `LlmError::StructuredParse` with the last parse failure when no strategy succeeds.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let mut last_error = String::from("empty response");
    for strategy in PARSE_STRATEGIES {
        let Some(candidate) = strategy.candidate(raw) else {
            continue;
        };
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = format!("{strategy:?}: {e}"),
        }
    }
    Err(LlmError::StructuredParse(last_error))
}

/// Request a schema-constrained response and deserialize it into `T`.
///
/// # Errors
///
/// Returns an error if the provider call fails or the output cannot be parsed.
pub async fn chat_typed<T, P>(provider: &P, messages: &[Message]) -> Result<T, LlmError>
where
    T: DeserializeOwned + JsonSchema,
    P: LlmProvider,
{
    let schema = response_schema::<T>()?;
    let raw = provider.chat_structured(messages, &schema).await?;
    parse_structured(&raw)
}

fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after_fence = &raw[start + 3..];
    let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    let block = body[..end].trim();
    (!block.is_empty()).then_some(block)
}

/// First balanced JSON object in `raw`, skipping braces inside string literals.
#[must_use]
pub fn first_json_block(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
