use crate::assets::AssetStore;
use crate::upstream::{GenerativeApi, OpenAiClient};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub api_base: String,
    pub api_key: String,
    pub timeout: u64,
    pub storage_dir: PathBuf,
    pub models: ModelConfig,
    pub log_level: log::LevelFilter,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub chat: String,
    pub speech: String,
    pub image: String,
    pub variation: String,
    pub transcription: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            chat: "gpt-4".to_string(),
            speech: "tts-1".to_string(),
            image: "dall-e-3".to_string(),
            variation: "dall-e-2".to_string(),
            transcription: "whisper-1".to_string(),
        }
    }
}

/// Shared, read-only state handed to every request handler.
#[derive(Clone)]
pub struct GatewayState {
    pub api: Arc<dyn GenerativeApi>,
    pub assets: AssetStore,
    pub models: ModelConfig,
}

impl GatewayState {
    pub async fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        if config.api_key.trim().is_empty() {
            anyhow::bail!("An API key is required (--api-key or OPENAI_API_KEY)");
        }
        if !config.api_base.starts_with("http://") && !config.api_base.starts_with("https://") {
            anyhow::bail!("Invalid API base URL: {}", config.api_base);
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout))
            .build()?;
        let api = OpenAiClient::new(client, config.api_base, config.api_key);
        Self::with_api(Arc::new(api), config.storage_dir, config.models).await
    }

    /// Builds the state around an already constructed upstream capability.
    pub async fn with_api(
        api: Arc<dyn GenerativeApi>,
        storage_dir: PathBuf,
        models: ModelConfig,
    ) -> anyhow::Result<Self> {
        let assets = AssetStore::open(&storage_dir).await.map_err(|e| {
            anyhow::anyhow!("Failed to prepare storage dir {}: {}", storage_dir.display(), e)
        })?;
        Ok(Self {
            api,
            assets,
            models,
        })
    }
}
