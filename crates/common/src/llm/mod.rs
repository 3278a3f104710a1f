//! Generative model abstraction
//!
//! Wraps the remote generative-model service behind a trait with three call
//! shapes: one-shot generation, tool-call (function calling) generation, and
//! token streaming. The streaming contract makes no assumption about whether
//! the provider emits cumulative snapshots or true deltas; normalization
//! happens at the consumer (see the explanation streamer).

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// A stream of text chunks from the model
pub type TextStream = BoxStream<'static, Result<String>>;

/// One turn of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Sampling parameters for one call
#[derive(Debug, Clone, Serialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { temperature: 0.2, top_p: Some(0.9), max_output_tokens: 600 }
    }
}

/// A function the model may call
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDecl {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the parameters
    pub parameters: serde_json::Value,
}

/// A function call chosen by the model
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: serde_json::Value,
}

/// Trait over the remote generative-model service
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// One-shot generation returning the full text
    async fn generate(
        &self,
        model: &str,
        messages: &[ChatMessage],
        system: Option<&str>,
        params: &GenerationParams,
    ) -> Result<String>;

    /// Tool-call generation; returns the function call if the model made one
    async fn generate_with_tools(
        &self,
        model: &str,
        messages: &[ChatMessage],
        system: Option<&str>,
        tools: &[FunctionDecl],
        params: &GenerationParams,
    ) -> Result<Option<FunctionCall>>;

    /// Streaming generation
    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        system: Option<&str>,
        params: &GenerationParams,
    ) -> Result<TextStream>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// HTTP client against a Gemini-style REST surface:
/// `POST {base}/v1beta/models/{model}:generateContent` and
/// `:streamGenerateContent?alt=sse`.
pub struct HttpGenerativeClient {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "functionCall")]
    function_call: Option<RawFunctionCall>,
}

#[derive(Deserialize)]
struct RawFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

impl HttpGenerativeClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_base = config.api_base.clone().ok_or_else(|| AppError::Configuration {
            message: "llm.api_base is not configured".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, api_base, api_key: config.api_key.clone() })
    }

    fn request_body(
        messages: &[ChatMessage],
        system: Option<&str>,
        tools: &[FunctionDecl],
        params: &GenerationParams,
    ) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                let role = if m.role == "assistant" { "model" } else { "user" };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": params.temperature,
                "topP": params.top_p,
                "maxOutputTokens": params.max_output_tokens,
            },
        });

        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if !tools.is_empty() {
            body["tools"] = json!([{ "functionDeclarations": tools }]);
        }
        body
    }

    fn endpoint(&self, model: &str, verb: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.api_base.trim_end_matches('/'),
            model,
            verb
        )
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let mut builder = self.client.post(url).json(body);
        if let Some(ref key) = self.api_key {
            builder = builder.header("x-goog-api-key", key);
        }
        let response = builder.send().await.map_err(|e| AppError::LlmError {
            message: format!("Request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::LlmError {
                message: format!("API error {}: {}", status, text),
            });
        }
        Ok(response)
    }
}

fn candidate_text(response: &GenerateResponse) -> String {
    response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|c| {
            c.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>()
        })
        .unwrap_or_default()
}

#[async_trait]
impl GenerativeModel for HttpGenerativeClient {
    async fn generate(
        &self,
        model: &str,
        messages: &[ChatMessage],
        system: Option<&str>,
        params: &GenerationParams,
    ) -> Result<String> {
        let body = Self::request_body(messages, system, &[], params);
        let url = self.endpoint(model, "generateContent");
        let response = self.post(&url, &body).await?;
        let parsed: GenerateResponse = response.json().await.map_err(|e| AppError::LlmError {
            message: format!("Failed to parse response: {}", e),
        })?;
        Ok(candidate_text(&parsed))
    }

    async fn generate_with_tools(
        &self,
        model: &str,
        messages: &[ChatMessage],
        system: Option<&str>,
        tools: &[FunctionDecl],
        params: &GenerationParams,
    ) -> Result<Option<FunctionCall>> {
        let body = Self::request_body(messages, system, tools, params);
        let url = self.endpoint(model, "generateContent");
        let response = self.post(&url, &body).await?;
        let parsed: GenerateResponse = response.json().await.map_err(|e| AppError::LlmError {
            message: format!("Failed to parse response: {}", e),
        })?;

        for candidate in &parsed.candidates {
            let Some(content) = &candidate.content else { continue };
            for part in &content.parts {
                if let Some(call) = &part.function_call {
                    return Ok(Some(FunctionCall {
                        name: call.name.clone(),
                        args: call.args.clone(),
                    }));
                }
            }
        }
        Ok(None)
    }

    async fn stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        system: Option<&str>,
        params: &GenerationParams,
    ) -> Result<TextStream> {
        let body = Self::request_body(messages, system, &[], params);
        let url = format!("{}?alt=sse", self.endpoint(model, "streamGenerateContent"));
        let response = self.post(&url, &body).await?;

        let byte_stream = response.bytes_stream();
        let stream = async_stream::try_stream! {
            futures::pin_mut!(byte_stream);
            let mut buffer = String::new();
            while let Some(bytes) = byte_stream.next().await {
                let bytes = bytes.map_err(|e| AppError::LlmError {
                    message: format!("Stream read failed: {}", e),
                })?;
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Frames are `data: {json}` lines separated by blank lines
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data: ") else { continue };
                    if payload == "[DONE]" {
                        continue;
                    }
                    let parsed: GenerateResponse =
                        serde_json::from_str(payload).map_err(|e| AppError::LlmError {
                            message: format!("Malformed stream frame: {}", e),
                        })?;
                    let text = candidate_text(&parsed);
                    if !text.is_empty() {
                        yield text;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

/// Scriptable model for tests: fixed stream chunks, fixed generation replies,
/// optional fixed function call, and per-model failure injection.
#[derive(Default)]
pub struct MockModel {
    /// Chunks yielded by `stream`
    pub chunks: Vec<String>,
    /// Reply returned by `generate`
    pub reply: String,
    /// Function call returned by `generate_with_tools` (None = no call)
    pub function_call: Option<FunctionCall>,
    /// Models that fail on every call
    pub failing_models: Vec<String>,
    /// Models invoked, in order
    calls: Mutex<Vec<String>>,
}

impl MockModel {
    pub fn streaming(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn replying(reply: &str) -> Self {
        Self { reply: reply.to_string(), ..Default::default() }
    }

    pub fn with_function_call(name: &str, args: serde_json::Value) -> Self {
        Self {
            function_call: Some(FunctionCall { name: name.to_string(), args }),
            ..Default::default()
        }
    }

    pub fn failing_for(mut self, models: &[&str]) -> Self {
        self.failing_models = models.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    /// Models invoked so far, in call order
    pub fn invoked_models(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, model: &str) -> Result<()> {
        self.calls.lock().unwrap().push(model.to_string());
        if self.failing_models.iter().any(|m| m == model) {
            return Err(AppError::LlmError {
                message: format!("mock failure for model {}", model),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GenerativeModel for MockModel {
    async fn generate(
        &self,
        model: &str,
        _messages: &[ChatMessage],
        _system: Option<&str>,
        _params: &GenerationParams,
    ) -> Result<String> {
        self.record(model)?;
        Ok(self.reply.clone())
    }

    async fn generate_with_tools(
        &self,
        model: &str,
        _messages: &[ChatMessage],
        _system: Option<&str>,
        _tools: &[FunctionDecl],
        _params: &GenerationParams,
    ) -> Result<Option<FunctionCall>> {
        self.record(model)?;
        Ok(self.function_call.clone())
    }

    async fn stream(
        &self,
        model: &str,
        _messages: &[ChatMessage],
        _system: Option<&str>,
        _params: &GenerationParams,
    ) -> Result<TextStream> {
        self.record(model)?;
        let chunks = self.chunks.clone();
        Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

/// Mock that routes each model name to a different scripted behavior;
/// used to exercise the fallback chain.
#[derive(Default)]
pub struct RoutingMockModel {
    pub routes: HashMap<String, Vec<String>>,
}

impl RoutingMockModel {
    pub fn route(mut self, model: &str, chunks: &[&str]) -> Self {
        self.routes.insert(
            model.to_string(),
            chunks.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl GenerativeModel for RoutingMockModel {
    async fn generate(
        &self,
        model: &str,
        _messages: &[ChatMessage],
        _system: Option<&str>,
        _params: &GenerationParams,
    ) -> Result<String> {
        match self.routes.get(model) {
            Some(chunks) => Ok(chunks.concat()),
            None => Err(AppError::LlmError { message: format!("no route for {}", model) }),
        }
    }

    async fn generate_with_tools(
        &self,
        model: &str,
        _messages: &[ChatMessage],
        _system: Option<&str>,
        _tools: &[FunctionDecl],
        _params: &GenerationParams,
    ) -> Result<Option<FunctionCall>> {
        match self.routes.get(model) {
            Some(_) => Ok(None),
            None => Err(AppError::LlmError { message: format!("no route for {}", model) }),
        }
    }

    async fn stream(
        &self,
        model: &str,
        _messages: &[ChatMessage],
        _system: Option<&str>,
        _params: &GenerationParams,
    ) -> Result<TextStream> {
        match self.routes.get(model) {
            Some(chunks) => {
                let chunks = chunks.clone();
                Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
            }
            None => Err(AppError::LlmError { message: format!("no route for {}", model) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_stream_yields_chunks() {
        let model = MockModel::streaming(&["Hello ", "world"]);
        let mut stream = model
            .stream("any", &[ChatMessage::user("hi")], None, &GenerationParams::default())
            .await
            .unwrap();

        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            collected.push_str(&chunk.unwrap());
        }
        assert_eq!(collected, "Hello world");
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let model = MockModel::streaming(&["ok"]).failing_for(&["bad-model"]);
        assert!(model
            .stream("bad-model", &[], None, &GenerationParams::default())
            .await
            .is_err());
        assert!(model
            .stream("good-model", &[], None, &GenerationParams::default())
            .await
            .is_ok());
        assert_eq!(model.invoked_models(), vec!["bad-model", "good-model"]);
    }

    #[test]
    fn test_request_body_shape() {
        let body = HttpGenerativeClient::request_body(
            &[ChatMessage::user("q"), ChatMessage::assistant("a")],
            Some("sys"),
            &[],
            &GenerationParams::default(),
        );
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
    }
}
