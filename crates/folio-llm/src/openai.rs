use std::fmt;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{ChatStream, LlmProvider, Message, ResponseSchema, Role, TokenUsage};
use crate::retry::RetryPolicy;
use crate::sse::completion_stream;

const PROVIDER: &str = "openai";

type UsageSlot = Arc<Mutex<Option<TokenUsage>>>;

/// OpenAI-compatible chat completions backend.
///
/// Each instance tracks the usage of its own most recent call, so per-stage
/// clones made with [`OpenAiProvider::with_model`] report independently.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    embedding_model: Option<String>,
    retry: RetryPolicy,
    last_usage: UsageSlot,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("embedding_model", &self.embedding_model)
            .field("max_retries", &self.retry.max_retries)
            .finish_non_exhaustive()
    }
}

impl Clone for OpenAiProvider {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            embedding_model: self.embedding_model.clone(),
            retry: self.retry,
            last_usage: UsageSlot::default(),
        }
    }
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        max_tokens: u32,
        embedding_model: Option<String>,
    ) -> Self {
        Self {
            client: crate::http::default_client(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_owned(),
            model,
            max_tokens,
            embedding_model,
            retry: RetryPolicy::default(),
            last_usage: UsageSlot::default(),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Retries on HTTP 429 before giving up with `LlmError::RateLimited`.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry = RetryPolicy::new(max_retries);
        self
    }

    /// Same endpoint and credentials, different chat model.
    #[must_use]
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn set_usage(&self, usage: Option<TokenUsage>) {
        record_usage(&self.last_usage, &self.model, usage);
    }

    /// POST `body` to `path` and decode a JSON reply.
    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, LlmError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.post(path, body).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .retry
            .send(PROVIDER, || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(body)
                    .send()
            })
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        tracing::error!(%status, path, "OpenAI API error: {text}");
        if status.is_server_error() {
            Err(LlmError::Unavailable)
        } else {
            Err(LlmError::Other(format!(
                "OpenAI {path} request failed (status {status})"
            )))
        }
    }

    fn chat_body<'a>(
        &'a self,
        messages: &'a [ApiMessage<'a>],
        stream: bool,
        response_format: Option<ResponseFormat<'a>>,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
            response_format,
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        response_format: Option<ResponseFormat<'_>>,
    ) -> Result<String, LlmError> {
        self.set_usage(None);
        let api_messages = convert_messages(messages);
        let body = self.chat_body(&api_messages, false, response_format);
        let resp: OpenAiChatResponse = self.post_json("chat/completions", &body).await?;

        self.set_usage(resp.usage.map(TokenUsage::from));
        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse {
                provider: PROVIDER.into(),
            })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        response_format: Option<ResponseFormat<'_>>,
    ) -> Result<ChatStream, LlmError> {
        self.set_usage(None);
        let api_messages = convert_messages(messages);
        let body = self.chat_body(&api_messages, true, response_format);
        let response = self.post("chat/completions", &body).await?;

        let slot = Arc::clone(&self.last_usage);
        let model = self.model.clone();
        Ok(completion_stream(response, move |usage| {
            record_usage(&slot, &model, Some(usage));
        }))
    }
}

fn record_usage(slot: &Mutex<Option<TokenUsage>>, model: &str, usage: Option<TokenUsage>) {
    if let Some(u) = usage {
        tracing::debug!(
            model,
            prompt_tokens = u.prompt_tokens,
            completion_tokens = u.completion_tokens,
            "OpenAI API usage"
        );
    }
    if let Ok(mut guard) = slot.lock() {
        *guard = usage;
    }
}

impl LlmProvider for OpenAiProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.complete(messages, None).await
    }

    async fn chat_stream(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        self.complete_stream(messages, None).await
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_batch(&[text.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse {
                provider: PROVIDER.into(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let model = self
            .embedding_model
            .as_deref()
            .ok_or(LlmError::EmbedUnsupported {
                provider: PROVIDER.into(),
            })?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            input: texts,
            model,
        };
        let mut resp: EmbeddingResponse = self.post_json("embeddings", &body).await?;
        if resp.data.len() != texts.len() {
            return Err(LlmError::Other(format!(
                "OpenAI returned {} embeddings for {} inputs",
                resp.data.len(),
                texts.len()
            )));
        }
        resp.data.sort_by_key(|d| d.index);
        Ok(resp.data.into_iter().map(|d| d.embedding).collect())
    }

    fn supports_embeddings(&self) -> bool {
        self.embedding_model.is_some()
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn chat_structured(
        &self,
        messages: &[Message],
        schema: &ResponseSchema,
    ) -> Result<String, LlmError> {
        self.complete(messages, Some(ResponseFormat::json_schema(schema)))
            .await
    }

    async fn chat_structured_stream(
        &self,
        messages: &[Message],
        schema: &ResponseSchema,
    ) -> Result<ChatStream, LlmError> {
        self.complete_stream(messages, Some(ResponseFormat::json_schema(schema)))
            .await
    }

    fn last_usage(&self) -> Option<TokenUsage> {
        self.last_usage.lock().ok().and_then(|g| *g)
    }
}

fn convert_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            ApiMessage {
                role,
                content: &msg.content,
            }
        })
        .collect()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage<'a>],
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    r#type: &'a str,
    json_schema: JsonSchemaFormat<'a>,
}

impl<'a> ResponseFormat<'a> {
    fn json_schema(schema: &'a ResponseSchema) -> Self {
        Self {
            r#type: "json_schema",
            json_schema: JsonSchemaFormat {
                name: &schema.name,
                schema: &schema.schema,
                strict: false,
            },
        }
    }
}

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    schema: &'a serde_json::Value,
    strict: bool,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<OpenAiUsage> for TokenUsage {
    fn from(u: OpenAiUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }
    }
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_provider() -> OpenAiProvider {
        OpenAiProvider::new(
            "sk-test-key".into(),
            "https://api.openai.com/v1/".into(),
            "gpt-4o-mini".into(),
            2048,
            Some("text-embedding-3-small".into()),
        )
    }

    #[test]
    fn new_trims_trailing_slash() {
        let p = test_provider();
        assert_eq!(p.base_url, "https://api.openai.com/v1");
        assert_eq!(p.model(), "gpt-4o-mini");
        assert_eq!(p.retry, RetryPolicy::new(2));
    }

    #[test]
    fn with_model_keeps_endpoint() {
        let p = test_provider().with_model("gpt-4o");
        assert_eq!(p.model(), "gpt-4o");
        assert_eq!(p.api_key, "sk-test-key");
        assert_eq!(p.embedding_model.as_deref(), Some("text-embedding-3-small"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let debug = format!("{:?}", test_provider());
        assert!(!debug.contains("sk-test-key"));
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("gpt-4o-mini"));
    }

    #[test]
    fn supports_embeddings_depends_on_model() {
        assert!(test_provider().supports_embeddings());
        let p = OpenAiProvider::new("k".into(), "http://x".into(), "m".into(), 10, None);
        assert!(!p.supports_embeddings());
    }

    #[test]
    fn name_and_streaming() {
        let p = test_provider();
        assert_eq!(p.name(), "openai");
        assert!(p.supports_streaming());
    }

    #[test]
    fn chat_request_serialization_plain() {
        let msgs = [ApiMessage {
            role: "user",
            content: "hello",
        }];
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: &msgs,
            max_tokens: 1024,
            stream: false,
            stream_options: None,
            response_format: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"model\":\"gpt-4o-mini\""));
        assert!(json.contains("\"max_tokens\":1024"));
        assert!(!json.contains("\"stream\""));
        assert!(!json.contains("response_format"));
    }

    #[test]
    fn chat_request_serialization_structured_stream() {
        let schema = ResponseSchema {
            name: "Answer".into(),
            schema: serde_json::json!({"type": "object"}),
        };
        let body = ChatRequest {
            model: "m",
            messages: &[],
            max_tokens: 10,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
            response_format: Some(ResponseFormat::json_schema(&schema)),
        };
        let json: serde_json::Value = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["response_format"]["json_schema"]["name"], "Answer");
        assert_eq!(
            json["response_format"]["json_schema"]["schema"]["type"],
            "object"
        );
    }

    #[test]
    fn parse_chat_response_with_usage() {
        let json = r#"{"choices":[{"message":{"content":"Hello!"}}],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#;
        let resp: OpenAiChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hello!"));
        let usage = resp.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 3);
    }

    #[test]
    fn parse_chat_response_null_content() {
        let json = r#"{"choices":[{"message":{"content":null}}]}"#;
        let resp: OpenAiChatResponse = serde_json::from_str(json).unwrap();
        assert!(resp.choices[0].message.content.is_none());
    }

    #[test]
    fn usage_is_per_instance() {
        let p = test_provider();
        assert!(p.last_usage().is_none());
        p.set_usage(Some(TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
        }));
        assert_eq!(p.last_usage().unwrap().total(), 120);
        assert!(p.clone().last_usage().is_none());
    }

    #[test]
    fn embedding_request_is_batched() {
        let texts = vec!["a".to_owned(), "b".to_owned()];
        let body = EmbeddingRequest {
            input: &texts,
            model: "text-embedding-3-small",
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"input\":[\"a\",\"b\"]"));
    }

    #[test]
    fn parse_embedding_response_with_index() {
        let json = r#"{"data":[{"index":1,"embedding":[0.5]},{"index":0,"embedding":[0.1]}]}"#;
        let mut resp: EmbeddingResponse = serde_json::from_str(json).unwrap();
        resp.data.sort_by_key(|d| d.index);
        assert_eq!(resp.data[0].embedding, vec![0.1]);
    }

    #[test]
    fn convert_messages_maps_roles() {
        let messages = vec![
            Message::system("sys"),
            Message::user("u"),
            Message::assistant("a"),
        ];
        let api = convert_messages(&messages);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].role, "user");
        assert_eq!(api[2].role, "assistant");
        assert_eq!(api[2].content, "a");
    }

    #[tokio::test]
    async fn embed_without_model_is_unsupported() {
        let p = OpenAiProvider::new("k".into(), "http://127.0.0.1:1".into(), "m".into(), 10, None);
        let err = p.embed("text").await.unwrap_err();
        assert!(matches!(err, LlmError::EmbedUnsupported { .. }));
    }

    #[tokio::test]
    async fn chat_unreachable_endpoint_errors() {
        let p = OpenAiProvider::new("k".into(), "http://127.0.0.1:1".into(), "m".into(), 10, None);
        let err = p.chat(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Http(_)));
        assert!(err.is_transient());
    }

    /// Accept one connection, read the full request and answer with `response`.
    async fn serve_once(response: String) -> String {
        use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut content_length = 0usize;
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await.unwrap() == 0 || line == "\r\n" {
                    break;
                }
                if let Some((name, value)) = line.split_once(':')
                    && name.eq_ignore_ascii_case("content-length")
                {
                    content_length = value.trim().parse().unwrap();
                }
            }
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).await.unwrap();
            let mut socket = reader.into_inner();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn chat_returns_content_and_usage() {
        let body = r#"{"choices":[{"message":{"content":"{\"ok\":true}"}}],"usage":{"prompt_tokens":9,"completion_tokens":4}}"#;
        let base = serve_once(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ))
        .await;
        let p = OpenAiProvider::new("k".into(), base, "m".into(), 10, None);
        let out = p.chat(&[Message::user("hi")]).await.unwrap();
        assert_eq!(out, r#"{"ok":true}"#);
        assert_eq!(p.last_usage().unwrap().total(), 13);
    }

    #[tokio::test]
    async fn streamed_completion_reports_usage_at_end() {
        use tokio_stream::StreamExt;

        let sse = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n\
                   data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                   data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                   data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                   data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":2}}\n\n\
                   data: [DONE]\n\n";
        let base = serve_once(sse.to_owned()).await;
        let p = OpenAiProvider::new("k".into(), base, "m".into(), 10, None);

        let mut stream = p.chat_stream(&[Message::user("hi")]).await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap());
        }
        assert_eq!(text, "Hello");
        assert_eq!(
            p.last_usage(),
            Some(TokenUsage {
                prompt_tokens: 7,
                completion_tokens: 2,
            })
        );
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let base = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy"
                .to_owned(),
        )
        .await;
        let p = OpenAiProvider::new("k".into(), base, "m".into(), 10, None);
        let err = p.chat(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable));
    }
}
