//! Webhook server command: `issue2pr serve`.

use anyhow::{Context, Result};

use issue2pr::config::Config;
use issue2pr::server::{AppState, start_server};

pub async fn cmd_serve(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate().context("Invalid configuration")?;

    let state = AppState::from_config(&config)?;
    start_server(state, &config.server).await
}
