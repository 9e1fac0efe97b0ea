//! Mock OpenAI API server for testing the real HTTP client

use actix_web::dev::ServerHandle;
use actix_web::http::header::{AUTHORIZATION, CONTENT_TYPE};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures::stream;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::net::SocketAddr;

pub const MOCK_API_KEY: &str = "sk-mock";

pub struct MockOpenAIServer {
    addr: SocketAddr,
    handle: ServerHandle,
}

impl MockOpenAIServer {
    /// Starts the server on an ephemeral port. Must be called inside an actix
    /// system (e.g. `#[actix_web::test]`).
    pub async fn start() -> Self {
        let server = HttpServer::new(|| {
            App::new()
                .route("/v1/chat/completions", web::post().to(mock_chat_completions))
                .route("/v1/audio/speech", web::post().to(mock_speech))
                .route("/v1/images/generations", web::post().to(mock_image))
                .route("/v1/images/variations", web::post().to(mock_multipart_image))
                .route(
                    "/v1/audio/transcriptions",
                    web::post().to(mock_transcriptions),
                )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        MockOpenAIServer { addr, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}

fn authorized(req: &HttpRequest) -> bool {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", MOCK_API_KEY))
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(json!({
        "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
    }))
}

async fn mock_chat_completions(req: HttpRequest, body: web::Json<Value>) -> HttpResponse {
    if !authorized(&req) {
        return unauthorized();
    }
    let prompt = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();

    if body["stream"].as_bool().unwrap_or(false) {
        let mut events = String::new();
        events.push_str(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
        );
        for piece in ["Hola", " mundo", "!"] {
            let chunk = json!({ "choices": [{ "index": 0, "delta": { "content": piece } }] });
            events.push_str(&format!("data: {}\n\n", chunk));
        }
        events.push_str(
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        );
        events.push_str("data: [DONE]\n\n");

        // Deliver in awkward 7-byte pieces so events straddle network chunks.
        let chunks: Vec<Result<Bytes, Infallible>> = events
            .into_bytes()
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        return HttpResponse::Ok()
            .content_type("text/event-stream")
            .streaming(stream::iter(chunks));
    }

    let content = if body["response_format"]["type"] == "json_object" {
        json!({ "user_score": 100, "errors": [], "message": "Perfect!" }).to_string()
    } else {
        format!("echo: {}", prompt)
    };
    HttpResponse::Ok().json(json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "model": body["model"],
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    }))
}

async fn mock_speech(req: HttpRequest, body: web::Json<Value>) -> HttpResponse {
    if !authorized(&req) {
        return unauthorized();
    }
    let audio = format!(
        "ID3:{}:{}",
        body["voice"].as_str().unwrap_or_default(),
        body["input"].as_str().unwrap_or_default()
    );
    HttpResponse::Ok().content_type("audio/mpeg").body(audio)
}

fn image_payload() -> Value {
    json!({
        "created": 1700000000,
        "data": [{
            "b64_json": BASE64.encode([0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]),
            "revised_prompt": "a calm lake at dawn"
        }]
    })
}

async fn mock_image(req: HttpRequest, body: web::Json<Value>) -> HttpResponse {
    if !authorized(&req) {
        return unauthorized();
    }
    if body["response_format"] != "b64_json" {
        return HttpResponse::BadRequest().finish();
    }
    HttpResponse::Ok().json(image_payload())
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"))
}

async fn mock_multipart_image(req: HttpRequest, body: Bytes) -> HttpResponse {
    if !authorized(&req) {
        return unauthorized();
    }
    if !is_multipart(&req) || body.is_empty() {
        return HttpResponse::BadRequest().finish();
    }
    HttpResponse::Ok().json(image_payload())
}

async fn mock_transcriptions(req: HttpRequest, body: Bytes) -> HttpResponse {
    if !authorized(&req) {
        return unauthorized();
    }
    if !is_multipart(&req) {
        return HttpResponse::BadRequest().finish();
    }
    let text = String::from_utf8_lossy(&body);
    HttpResponse::Ok().json(json!({
        "task": "transcribe",
        "text": "hola mundo",
        "has_prompt": text.contains("name=\"prompt\""),
        "verbose": text.contains("verbose_json"),
    }))
}
