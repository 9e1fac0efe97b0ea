use clap::Parser;
use gpt_relay_rs::Gateway;
use gpt_relay_rs::state::{GatewayConfig, ModelConfig};
use std::path::PathBuf;
use std::process::ExitCode;

/// HTTP gateway in front of an OpenAI-compatible API
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Host to bind the server
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Base URL of the upstream API
    #[arg(long, default_value = "https://api.openai.com/v1")]
    api_base: String,

    /// API key for the upstream API
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Upstream request timeout in seconds
    #[arg(long, default_value_t = 600)]
    timeout: u64,

    /// Directory holding generated audio and images
    #[arg(long, default_value = "./generated")]
    storage_dir: PathBuf,

    #[arg(long, default_value = "gpt-4")]
    chat_model: String,

    #[arg(long, default_value = "tts-1")]
    speech_model: String,

    #[arg(long, default_value = "dall-e-3")]
    image_model: String,

    #[arg(long, default_value = "dall-e-2")]
    variation_model: String,

    #[arg(long, default_value = "whisper-1")]
    transcription_model: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

impl From<Args> for GatewayConfig {
    fn from(args: Args) -> Self {
        GatewayConfig {
            host: args.host,
            port: args.port,
            api_base: args.api_base,
            api_key: args.api_key,
            timeout: args.timeout,
            storage_dir: args.storage_dir,
            models: ModelConfig {
                chat: args.chat_model,
                speech: args.speech_model,
                image: args.image_model,
                variation: args.variation_model,
                transcription: args.transcription_model,
            },
            log_level: args.log_level,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let gateway = Gateway::new(args.into());
    match gateway.start() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gpt-relay failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
