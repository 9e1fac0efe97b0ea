use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures::{Stream, StreamExt, future, stream};
use reqwest::{StatusCode, multipart};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::pin::Pin;

/// Lazy sequence of completion deltas, in the order the upstream produced them.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("unexpected upstream payload: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the model for a single JSON object instead of free text.
    pub json_object: bool,
}

impl ChatRequest {
    fn to_json(&self, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.messages,
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if self.json_object {
            body["response_format"] = json!({ "type": "json_object" });
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }
}

#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub model: String,
    pub voice: String,
    pub input: String,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Bytes,
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub model: String,
    pub audio: Bytes,
    pub file_name: String,
    pub mime_type: String,
    pub prompt: Option<String>,
}

/// The generative service this gateway fronts.
///
/// Implementations hold configuration only; every call is independent.
#[async_trait]
pub trait GenerativeApi: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatMessage, UpstreamError>;

    /// Starts a streamed completion. Errors here happen before any fragment is
    /// produced; faults after that arrive as items of the stream.
    async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream, UpstreamError>;

    async fn speech(&self, request: SpeechRequest) -> Result<Bytes, UpstreamError>;

    async fn image(&self, request: ImageRequest) -> Result<GeneratedImage, UpstreamError>;

    async fn image_variation(
        &self,
        model: &str,
        image: Bytes,
    ) -> Result<GeneratedImage, UpstreamError>;

    async fn transcribe(&self, request: TranscriptionRequest) -> Result<Value, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(client: reqwest::Client, api_base: String, api_key: String) -> Self {
        OpenAiClient {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn api_path(&self, api_path: &str) -> String {
        if api_path.starts_with('/') {
            format!("{}{}", self.api_base, api_path)
        } else {
            format!("{}/{}", self.api_base, api_path)
        }
    }

    async fn post_json(
        &self,
        api_path: &str,
        body: &Value,
    ) -> Result<reqwest::Response, UpstreamError> {
        let resp = self
            .client
            .post(self.api_path(api_path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        check_status(resp).await
    }

    async fn post_form(
        &self,
        api_path: &str,
        form: multipart::Form,
    ) -> Result<reqwest::Response, UpstreamError> {
        let resp = self
            .client
            .post(self.api_path(api_path))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        check_status(resp).await
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(UpstreamError::Status { status, body })
}

fn first_image(json: &Value) -> Result<GeneratedImage, UpstreamError> {
    let data = json
        .pointer("/data/0")
        .ok_or_else(|| UpstreamError::Decode("image response has no data".to_string()))?;
    let encoded = data
        .get("b64_json")
        .and_then(Value::as_str)
        .ok_or_else(|| UpstreamError::Decode("image response has no b64_json".to_string()))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| UpstreamError::Decode(format!("invalid base64 image: {}", e)))?;
    Ok(GeneratedImage {
        bytes: Bytes::from(bytes),
        revised_prompt: data
            .get("revised_prompt")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[async_trait]
impl GenerativeApi for OpenAiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatMessage, UpstreamError> {
        let resp = self
            .post_json("/chat/completions", &request.to_json(false))
            .await?;
        let json: Value = resp.json().await?;
        let message = json
            .pointer("/choices/0/message")
            .cloned()
            .ok_or_else(|| UpstreamError::Decode("completion has no choices".to_string()))?;
        serde_json::from_value(message).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream, UpstreamError> {
        let resp = self
            .post_json("/chat/completions", &request.to_json(true))
            .await?;
        let mut decoder = SseDecoder::default();
        let events = resp
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.push(&bytes),
                Err(e) => vec![Err(UpstreamError::Request(e))],
            })
            .flat_map(stream::iter)
            .take_while(|event| future::ready(!matches!(event, Ok(SseEvent::Done))))
            .map(|event| {
                event.map(|e| match e {
                    SseEvent::Fragment(text) => text,
                    SseEvent::Done => String::new(),
                })
            });
        Ok(Box::pin(events))
    }

    async fn speech(&self, request: SpeechRequest) -> Result<Bytes, UpstreamError> {
        let body = json!({
            "model": request.model,
            "voice": request.voice,
            "input": request.input,
            "response_format": "mp3",
        });
        let resp = self.post_json("/audio/speech", &body).await?;
        Ok(resp.bytes().await?)
    }

    async fn image(&self, request: ImageRequest) -> Result<GeneratedImage, UpstreamError> {
        let body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "n": 1,
            "size": request.size,
            "response_format": "b64_json",
        });
        let resp = self.post_json("/images/generations", &body).await?;
        first_image(&resp.json().await?)
    }

    async fn image_variation(
        &self,
        model: &str,
        image: Bytes,
    ) -> Result<GeneratedImage, UpstreamError> {
        let part = multipart::Part::stream(image)
            .file_name("image.png")
            .mime_str("image/png")?;
        let form = multipart::Form::new()
            .text("model", model.to_string())
            .text("n", "1")
            .text("response_format", "b64_json")
            .part("image", part);
        let resp = self.post_form("/images/variations", form).await?;
        first_image(&resp.json().await?)
    }

    async fn transcribe(&self, request: TranscriptionRequest) -> Result<Value, UpstreamError> {
        let part = multipart::Part::stream(request.audio)
            .file_name(request.file_name)
            .mime_str(&request.mime_type)?;
        let mut form = multipart::Form::new()
            .text("model", request.model)
            .text("response_format", "verbose_json")
            .part("file", part);
        if let Some(prompt) = request.prompt {
            form = form.text("prompt", prompt);
        }
        let resp = self.post_form("/audio/transcriptions", form).await?;
        Ok(resp.json().await?)
    }
}

/// Longest event line the decoder will buffer while waiting for its newline.
pub const MAX_SSE_LINE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Fragment(String),
    Done,
}

/// Incremental decoder for `text/event-stream` completion chunks.
///
/// Network chunks do not respect line boundaries, so partial lines are kept
/// until the rest arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<SseEvent, UpstreamError>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = Self::decode_line(&line) {
                events.push(event);
            }
        }
        if self.buffer.len() > MAX_SSE_LINE {
            self.buffer.clear();
            events.push(Err(UpstreamError::Decode(format!(
                "event line exceeds {} bytes",
                MAX_SSE_LINE
            ))));
        }
        events
    }

    fn decode_line(line: &[u8]) -> Option<Result<SseEvent, UpstreamError>> {
        let line = match std::str::from_utf8(line) {
            Ok(line) => line.trim_end_matches(['\r', '\n']),
            Err(e) => return Some(Err(UpstreamError::Decode(e.to_string()))),
        };
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            return Some(Ok(SseEvent::Done));
        }
        let chunk: Value = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => return Some(Err(UpstreamError::Decode(e.to_string()))),
        };
        let content = chunk
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Some(Ok(SseEvent::Fragment(content.to_string())))
    }
}
