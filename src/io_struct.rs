use crate::error::ApiError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct OrthographyReqInput {
    pub prompt: String,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProsConsReqInput {
    pub prompt: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TranslateReqInput {
    pub prompt: String,
    pub lang: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TextToAudioReqInput {
    pub prompt: String,
    pub voice: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ImageGenerationReqInput {
    pub prompt: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ImageVariationReqInput {
    pub base_image: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AudioToTextQuery {
    pub prompt: Option<String>,
    pub file_name: Option<String>,
}

/// Audio received on `/audio-to-text`, from either a multipart form or a raw body.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub audio: Bytes,
    pub mime_type: String,
    pub file_name: Option<String>,
    pub prompt: Option<String>,
}

/// Identifier and retrieval path of a freshly stored asset.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetCreated {
    pub id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranslateOutput {
    pub message: String,
}

pub fn require_non_empty(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} should not be empty", field)));
    }
    Ok(())
}
