use crate::assets::{AssetId, Category};
use crate::error::ApiError;
use crate::io_struct::{
    AssetCreated, AudioUpload, ImageGenerationReqInput, ImageVariationReqInput,
    OrthographyReqInput, ProsConsReqInput, TextToAudioReqInput, TranslateOutput,
    TranslateReqInput,
};
use crate::state::GatewayState;
use crate::upstream::{
    ChatMessage, ChatRequest, FragmentStream, ImageRequest, SpeechRequest, TranscriptionRequest,
    UpstreamError,
};
use serde_json::Value;

const ORTHOGRAPHY_PROMPT: &str = r#"You will receive a text that may contain spelling and grammar mistakes.
Words used must exist in the dictionary of the language of the text.
Answer only with a JSON object of this shape:
{
  "user_score": number,   // percentage of correctness, 0-100
  "errors": string[],     // each entry "wrong -> correction"
  "message": string       // short encouraging feedback; congratulate if there are no errors
}"#;

const PROS_CONS_PROMPT: &str = "You will be asked to compare options. Give an answer with the \
pros and cons of each one, formatted as markdown with lists. Keep it under 500 tokens.";

pub const VOICES: &[&str] = &["nova", "alloy", "echo", "fable", "onyx", "shimmer"];
const DEFAULT_VOICE: &str = "nova";
const IMAGE_SIZE: &str = "1024x1024";

/// Retrieval path served by the GET route of each category.
pub fn asset_url(category: Category, id: &AssetId) -> String {
    match category {
        Category::Audio => format!("/gpt/text-to-audio/{}", id),
        Category::Image => format!("/gpt/image-generation/{}", id),
    }
}

pub fn select_voice(voice: Option<&str>) -> &'static str {
    voice
        .map(str::to_lowercase)
        .and_then(|v| VOICES.iter().copied().find(|known| *known == v))
        .unwrap_or(DEFAULT_VOICE)
}

pub async fn orthography_check(
    state: &GatewayState,
    input: OrthographyReqInput,
) -> Result<Value, ApiError> {
    let request = ChatRequest {
        model: state.models.chat.clone(),
        messages: vec![
            ChatMessage::system(ORTHOGRAPHY_PROMPT),
            ChatMessage::user(input.prompt),
        ],
        temperature: Some(0.3),
        max_tokens: Some(input.max_tokens.unwrap_or(150)),
        json_object: true,
    };
    let message = state.api.chat(request).await?;
    let verdict = serde_json::from_str(&message.content).map_err(|e| {
        UpstreamError::Decode(format!("orthography answer is not JSON: {}", e))
    })?;
    Ok(verdict)
}

fn pros_cons_request(state: &GatewayState, input: ProsConsReqInput) -> ChatRequest {
    ChatRequest {
        model: state.models.chat.clone(),
        messages: vec![
            ChatMessage::system(PROS_CONS_PROMPT),
            ChatMessage::user(input.prompt),
        ],
        temperature: Some(0.8),
        max_tokens: Some(500),
        json_object: false,
    }
}

pub async fn pros_cons_discusser(
    state: &GatewayState,
    input: ProsConsReqInput,
) -> Result<ChatMessage, ApiError> {
    Ok(state.api.chat(pros_cons_request(state, input)).await?)
}

pub async fn pros_cons_discusser_stream(
    state: &GatewayState,
    input: ProsConsReqInput,
) -> Result<FragmentStream, ApiError> {
    Ok(state.api.chat_stream(pros_cons_request(state, input)).await?)
}

pub async fn translate(
    state: &GatewayState,
    input: TranslateReqInput,
) -> Result<TranslateOutput, ApiError> {
    let request = ChatRequest {
        model: state.models.chat.clone(),
        messages: vec![ChatMessage::system(format!(
            "Translate the following text to {}: {}",
            input.lang, input.prompt
        ))],
        temperature: Some(0.2),
        ..Default::default()
    };
    let message = state.api.chat(request).await?;
    Ok(TranslateOutput {
        message: message.content,
    })
}

pub async fn text_to_audio(
    state: &GatewayState,
    input: TextToAudioReqInput,
) -> Result<AssetCreated, ApiError> {
    let request = SpeechRequest {
        model: state.models.speech.clone(),
        voice: select_voice(input.voice.as_deref()).to_string(),
        input: input.prompt,
    };
    let audio = state.api.speech(request).await?;
    let id = state.assets.store(&audio, Category::Audio).await?;
    log::info!("Generated audio {} ({} bytes)", id, audio.len());
    Ok(AssetCreated {
        url: asset_url(Category::Audio, &id),
        id: id.to_string(),
        revised_prompt: None,
    })
}

pub async fn image_generation(
    state: &GatewayState,
    input: ImageGenerationReqInput,
) -> Result<AssetCreated, ApiError> {
    let request = ImageRequest {
        model: state.models.image.clone(),
        prompt: input.prompt,
        size: IMAGE_SIZE.to_string(),
    };
    let image = state.api.image(request).await?;
    let id = state.assets.store(&image.bytes, Category::Image).await?;
    log::info!("Generated image {} ({} bytes)", id, image.bytes.len());
    Ok(AssetCreated {
        url: asset_url(Category::Image, &id),
        id: id.to_string(),
        revised_prompt: image.revised_prompt,
    })
}

pub async fn image_variation(
    state: &GatewayState,
    input: ImageVariationReqInput,
) -> Result<AssetCreated, ApiError> {
    let base = state
        .assets
        .resolve(&input.base_image, Category::Image)
        .await?;
    let base_bytes = base.read_all().await?;
    let image = state
        .api
        .image_variation(&state.models.variation, base_bytes)
        .await?;
    let id = state.assets.store(&image.bytes, Category::Image).await?;
    log::info!("Generated variation {} of image {}", id, base.id);
    Ok(AssetCreated {
        url: asset_url(Category::Image, &id),
        id: id.to_string(),
        revised_prompt: image.revised_prompt,
    })
}

/// File extension the transcription API expects for an audio media type.
/// Unknown or vendor-prefixed subtypes fall back to `mp3`.
pub fn audio_extension(mime_type: &str) -> &'static str {
    let subtype = mime_type
        .split(';')
        .next()
        .and_then(|essence| essence.trim().split('/').nth(1))
        .unwrap_or_default()
        .to_ascii_lowercase();
    match subtype.as_str() {
        "wav" | "wave" | "x-wav" | "vnd.wave" => "wav",
        "m4a" | "x-m4a" => "m4a",
        "mp4" => "mp4",
        "webm" => "webm",
        "ogg" => "ogg",
        "flac" | "x-flac" => "flac",
        _ => "mp3",
    }
}

pub async fn audio_to_text(state: &GatewayState, upload: AudioUpload) -> Result<Value, ApiError> {
    let file_name = upload
        .file_name
        .unwrap_or_else(|| format!("audio.{}", audio_extension(&upload.mime_type)));
    let request = TranscriptionRequest {
        model: state.models.transcription.clone(),
        audio: upload.audio,
        file_name,
        mime_type: upload.mime_type,
        prompt: upload.prompt.filter(|p| !p.trim().is_empty()),
    };
    Ok(state.api.transcribe(request).await?)
}
