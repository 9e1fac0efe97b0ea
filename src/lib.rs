pub mod assets;
pub mod error;
pub mod io_struct;
pub mod relay;
pub mod server;
pub mod state;
pub mod upstream;
pub mod use_cases;

use server::{init_logging, startup};
use state::{GatewayConfig, GatewayState};
use tokio::signal;

pub struct Gateway {
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Gateway { config }
    }

    /// Runs the HTTP server until it fails or Ctrl+C is received.
    pub fn start(&self) -> anyhow::Result<()> {
        init_logging(self.config.log_level);

        let ret: anyhow::Result<()> = actix_web::rt::System::new().block_on(async move {
            let state = GatewayState::new(self.config.clone()).await?;
            tokio::select! {
                res = startup(self.config.clone(), state) => res?,
                _ = signal::ctrl_c() => log::info!("Received Ctrl+C, shutting down"),
            }
            Ok(())
        });
        ret
    }
}
