use crate::assets::Category;
use crate::error::ApiError;
use crate::io_struct::{
    AudioToTextQuery, AudioUpload, ImageGenerationReqInput, ImageVariationReqInput, OrthographyReqInput,
    ProsConsReqInput, TextToAudioReqInput, TranslateReqInput, require_non_empty,
};
use crate::relay::{RelayError, relay};
use crate::state::{GatewayConfig, GatewayState};
use crate::use_cases;
use actix_multipart::Multipart;
use actix_web::http::header::CONTENT_TYPE;
use actix_web::{HttpRequest, HttpResponse, HttpServer, get, post, web};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt;
use std::io::Write;
use std::pin::pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Largest upload accepted for transcription.
pub const MAX_AUDIO_UPLOAD: usize = 5 * 1000 * 1024;

/// Largest non-file field accepted in an upload form.
const MAX_FORM_FIELD: usize = 64 * 1024;

#[get("/health")]
pub async fn health(_req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

#[post("/orthography-check")]
pub async fn orthography_check(
    req: web::Json<OrthographyReqInput>,
    app_state: web::Data<GatewayState>,
) -> Result<HttpResponse, ApiError> {
    require_non_empty("prompt", &req.prompt)?;
    let verdict = use_cases::orthography_check(&app_state, req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(verdict))
}

#[post("/pros-cons-discusser")]
pub async fn pros_cons_discusser(
    req: web::Json<ProsConsReqInput>,
    app_state: web::Data<GatewayState>,
) -> Result<HttpResponse, ApiError> {
    require_non_empty("prompt", &req.prompt)?;
    let message = use_cases::pros_cons_discusser(&app_state, req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(message))
}

#[post("/pros-cons-discusser-stream")]
pub async fn pros_cons_discusser_stream(
    req: web::Json<ProsConsReqInput>,
    app_state: web::Data<GatewayState>,
) -> Result<HttpResponse, ApiError> {
    require_non_empty("prompt", &req.prompt)?;
    // Failures before the first fragment still get a proper error response.
    let fragments = use_cases::pros_cons_discusser_stream(&app_state, req.into_inner()).await?;

    let (tx, rx) = mpsc::channel(1);
    actix_web::rt::spawn(async move {
        match relay(fragments, tx).await {
            Ok(stats) => log::info!(
                "Relayed {} fragments ({} bytes) to client",
                stats.fragments,
                stats.bytes
            ),
            Err(RelayError::ClientDisconnected) => {
                log::warn!("Client disconnected mid-stream, upstream cancelled")
            }
            Err(e @ RelayError::UpstreamFailed(_)) => log::error!("Relay aborted: {}", e),
        }
    });

    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .streaming(ReceiverStream::new(rx)))
}

#[post("/translate")]
pub async fn translate(
    req: web::Json<TranslateReqInput>,
    app_state: web::Data<GatewayState>,
) -> Result<HttpResponse, ApiError> {
    require_non_empty("prompt", &req.prompt)?;
    require_non_empty("lang", &req.lang)?;
    let output = use_cases::translate(&app_state, req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(output))
}

#[post("/text-to-audio")]
pub async fn text_to_audio(
    req: web::Json<TextToAudioReqInput>,
    app_state: web::Data<GatewayState>,
) -> Result<HttpResponse, ApiError> {
    require_non_empty("prompt", &req.prompt)?;
    let created = use_cases::text_to_audio(&app_state, req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(created))
}

#[get("/text-to-audio/{file_id}")]
pub async fn text_to_audio_getter(
    file_id: web::Path<String>,
    app_state: web::Data<GatewayState>,
) -> Result<HttpResponse, ApiError> {
    send_asset(&app_state, &file_id, Category::Audio).await
}

#[post("/image-generation")]
pub async fn image_generation(
    req: web::Json<ImageGenerationReqInput>,
    app_state: web::Data<GatewayState>,
) -> Result<HttpResponse, ApiError> {
    require_non_empty("prompt", &req.prompt)?;
    let created = use_cases::image_generation(&app_state, req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(created))
}

#[get("/image-generation/{file_id}")]
pub async fn image_getter(
    file_id: web::Path<String>,
    app_state: web::Data<GatewayState>,
) -> Result<HttpResponse, ApiError> {
    send_asset(&app_state, &file_id, Category::Image).await
}

#[post("/image-variation")]
pub async fn image_variation(
    req: web::Json<ImageVariationReqInput>,
    app_state: web::Data<GatewayState>,
) -> Result<HttpResponse, ApiError> {
    require_non_empty("base_image", &req.base_image)?;
    let created = use_cases::image_variation(&app_state, req.into_inner()).await?;
    Ok(HttpResponse::Ok().json(created))
}

/// Accepts a `multipart/form-data` form with a `file` part and an optional
/// `prompt` field, or a raw `audio/*` body. Query parameters fill in whatever
/// the body did not carry.
#[post("/audio-to-text")]
pub async fn audio_to_text(
    req: HttpRequest,
    query: web::Query<AudioToTextQuery>,
    payload: web::Payload,
    app_state: web::Data<GatewayState>,
) -> Result<HttpResponse, ApiError> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let upload = if content_type.starts_with("multipart/form-data") {
        read_multipart_upload(Multipart::new(req.headers(), payload)).await?
    } else if content_type.starts_with("audio/") {
        AudioUpload {
            audio: read_limited(payload, MAX_AUDIO_UPLOAD).await?,
            mime_type: content_type,
            file_name: None,
            prompt: None,
        }
    } else {
        return Err(ApiError::BadRequest(
            "Expected a multipart form or an audio/* request body".to_string(),
        ));
    };

    let query = query.into_inner();
    let upload = AudioUpload {
        file_name: upload.file_name.or(query.file_name),
        prompt: upload.prompt.or(query.prompt),
        ..upload
    };
    if upload.audio.is_empty() {
        return Err(ApiError::BadRequest("Audio file is empty".to_string()));
    }
    let transcription = use_cases::audio_to_text(&app_state, upload).await?;
    Ok(HttpResponse::Ok().json(transcription))
}

async fn read_multipart_upload(multipart: Multipart) -> Result<AudioUpload, ApiError> {
    let mut multipart = pin!(multipart);
    let mut file = None;
    let mut prompt = None;

    while let Some(field) = multipart.next().await {
        let field = field
            .map_err(|e| ApiError::BadRequest(format!("Invalid multipart payload: {}", e)))?;
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let mime_type = field
                    .content_type()
                    .map(|m| m.essence_str().to_string())
                    .unwrap_or_default();
                if !mime_type.starts_with("audio/") {
                    return Err(ApiError::BadRequest(
                        "Expected an audio/* file".to_string(),
                    ));
                }
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .filter(|n| !n.is_empty())
                    .map(str::to_string);
                let audio = read_limited(field, MAX_AUDIO_UPLOAD).await?;
                file = Some((audio, mime_type, file_name));
            }
            "prompt" => {
                let text = read_limited(field, MAX_FORM_FIELD).await?;
                prompt = Some(String::from_utf8_lossy(&text).into_owned());
            }
            _ => {
                read_limited(field, MAX_FORM_FIELD).await?;
            }
        }
    }

    let (audio, mime_type, file_name) =
        file.ok_or_else(|| ApiError::BadRequest("Audio file is required".to_string()))?;
    Ok(AudioUpload {
        audio,
        mime_type,
        file_name,
        prompt,
    })
}

/// Collects a body or form field, failing once it grows past `limit` bytes.
async fn read_limited<S, E>(stream: S, limit: usize) -> Result<Bytes, ApiError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    let mut stream = pin!(stream);
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| ApiError::BadRequest(format!("Failed reading upload: {}", e)))?;
        if buf.len() + chunk.len() > limit {
            return Err(ApiError::PayloadTooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

async fn send_asset(
    app_state: &GatewayState,
    file_id: &str,
    category: Category,
) -> Result<HttpResponse, ApiError> {
    let handle = app_state.assets.resolve(file_id, category).await?;
    let body = handle.open().await?;
    Ok(HttpResponse::Ok()
        .content_type(category.content_type())
        .no_chunking(handle.len)
        .streaming(body))
}

/// Registers the `/gpt` routes. Shared by the server and the tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(
        web::scope("/gpt")
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                ApiError::BadRequest(err.to_string()).into()
            }))
            .service(orthography_check)
            .service(pros_cons_discusser)
            .service(pros_cons_discusser_stream)
            .service(translate)
            .service(text_to_audio)
            .service(text_to_audio_getter)
            .service(image_generation)
            .service(image_getter)
            .service(image_variation)
            .service(audio_to_text),
    );
}

pub fn init_logging(level: log::LevelFilter) {
    // RUST_LOG, when set, overrides the configured level
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .try_init();
}

pub async fn startup(config: GatewayConfig, app_state: GatewayState) -> std::io::Result<()> {
    let app_state = web::Data::new(app_state);

    log::info!(
        "Starting server at {}:{}, assets in {}",
        config.host,
        config.port,
        app_state.assets.root().display()
    );

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_state.clone())
            .configure(configure)
    })
    .bind((config.host, config.port))?
    .run()
    .await
}
