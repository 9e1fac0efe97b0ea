#![allow(dead_code)]

pub mod mock_openai_server;

use actix_web::{App, test as actix_test, web};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use gpt_relay_rs::server::configure;
use gpt_relay_rs::state::{GatewayState, ModelConfig};
use gpt_relay_rs::upstream::{
    ChatMessage, ChatRequest, FragmentStream, GeneratedImage, GenerativeApi, ImageRequest,
    SpeechRequest, TranscriptionRequest, UpstreamError,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

pub const FAKE_MP3: &[u8] = b"ID3\x04\x00fake-mp3-frames";
pub const FAKE_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];

/// In-process stand-in for the upstream API.
#[derive(Default)]
pub struct FakeApi {
    pub chat_reply: String,
    pub fragments: Vec<String>,
    /// Emit a fault after this many fragments.
    pub fail_after: Option<usize>,
    /// Fail every call before producing anything.
    pub unavailable: bool,
    pub chat_requests: Mutex<Vec<ChatRequest>>,
    pub speech_requests: Mutex<Vec<SpeechRequest>>,
    pub transcriptions: Mutex<Vec<TranscriptionRequest>>,
    pub variation_inputs: Mutex<Vec<Bytes>>,
}

impl FakeApi {
    pub fn replying(chat_reply: &str) -> Self {
        FakeApi {
            chat_reply: chat_reply.to_string(),
            ..Default::default()
        }
    }

    pub fn streaming(fragments: &[&str]) -> Self {
        FakeApi {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    fn check_available(&self) -> Result<(), UpstreamError> {
        if self.unavailable {
            return Err(UpstreamError::Decode("upstream unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl GenerativeApi for FakeApi {
    async fn chat(&self, request: ChatRequest) -> Result<ChatMessage, UpstreamError> {
        self.check_available()?;
        self.chat_requests.lock().unwrap().push(request);
        Ok(ChatMessage {
            role: "assistant".to_string(),
            content: self.chat_reply.clone(),
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream, UpstreamError> {
        self.check_available()?;
        self.chat_requests.lock().unwrap().push(request);
        let mut items: Vec<Result<String, UpstreamError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(UpstreamError::Decode("stream broke".to_string())));
        }
        Ok(Box::pin(stream::iter(items)))
    }

    async fn speech(&self, request: SpeechRequest) -> Result<Bytes, UpstreamError> {
        self.check_available()?;
        self.speech_requests.lock().unwrap().push(request);
        Ok(Bytes::from_static(FAKE_MP3))
    }

    async fn image(&self, request: ImageRequest) -> Result<GeneratedImage, UpstreamError> {
        self.check_available()?;
        Ok(GeneratedImage {
            bytes: Bytes::from_static(FAKE_PNG),
            revised_prompt: Some(format!("revised: {}", request.prompt)),
        })
    }

    async fn image_variation(
        &self,
        _model: &str,
        image: Bytes,
    ) -> Result<GeneratedImage, UpstreamError> {
        self.check_available()?;
        self.variation_inputs.lock().unwrap().push(image.clone());
        let mut bytes = image.to_vec();
        bytes.reverse();
        Ok(GeneratedImage {
            bytes: Bytes::from(bytes),
            revised_prompt: None,
        })
    }

    async fn transcribe(&self, request: TranscriptionRequest) -> Result<Value, UpstreamError> {
        self.check_available()?;
        let reply = json!({
            "text": "hola mundo",
            "language": "spanish",
            "bytes": request.audio.len(),
        });
        self.transcriptions.lock().unwrap().push(request);
        Ok(reply)
    }
}

pub struct TestContext {
    pub api: Arc<FakeApi>,
    pub state: web::Data<GatewayState>,
    _dir: tempfile::TempDir,
}

impl TestContext {
    pub async fn new(api: FakeApi) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(api);
        let state = GatewayState::with_api(
            api.clone(),
            dir.path().join("generated"),
            ModelConfig::default(),
        )
        .await
        .unwrap();
        TestContext {
            api,
            state: web::Data::new(state),
            _dir: dir,
        }
    }

    pub async fn create_app(
        &self,
    ) -> impl actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse,
        Error = actix_web::Error,
    > {
        actix_test::init_service(
            App::new()
                .app_data(self.state.clone())
                .configure(configure),
        )
        .await
    }
}
