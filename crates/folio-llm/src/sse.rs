use eventsource_stream::Eventsource;
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::{ChatStream, TokenUsage};

/// What one `data:` frame of a chat-completions stream carries.
#[derive(Debug, Default, PartialEq)]
struct Frame {
    text: Option<String>,
    usage: Option<TokenUsage>,
}

/// Turn a chat-completions SSE response into a text stream.
///
/// The final usage frame (sent when `stream_options.include_usage` is set) is
/// handed to `on_usage` instead of being yielded.
pub(crate) fn completion_stream<F>(response: reqwest::Response, on_usage: F) -> ChatStream
where
    F: Fn(TokenUsage) + Send + 'static,
{
    let text = response
        .bytes_stream()
        .eventsource()
        .filter_map(move |event| {
            let frame = match event {
                Ok(event) => decode(&event.data),
                Err(e) => return Some(Err(LlmError::SseParse(e.to_string()))),
            };
            match frame {
                Ok(frame) => {
                    if let Some(usage) = frame.usage {
                        on_usage(usage);
                    }
                    frame.text.map(Ok)
                }
                Err(e) => Some(Err(e)),
            }
        });
    Box::pin(text)
}

fn decode(data: &str) -> Result<Frame, LlmError> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(Frame::default());
    }

    let chunk: Chunk = serde_json::from_str(data)
        .map_err(|e| LlmError::SseParse(format!("bad stream chunk: {e}")))?;
    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|t| !t.is_empty());
    let usage = chunk.usage.map(|u| TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
    });
    Ok(Frame { text, usage })
}

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
