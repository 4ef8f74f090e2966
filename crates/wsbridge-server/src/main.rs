use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use wsbridge_config::{expand_tilde, Config, ConfigManager};
use wsbridge_server::{init_logging, run_server};

#[derive(Parser, Debug, Clone)]
#[command(name = "wsbridge")]
#[command(about = "WebSocket bridge with subprotocol negotiation and client heartbeats")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, env = "WSBRIDGE_CONFIG", default_value = "~/.wsbridge/config.json")]
    config: String,

    /// Listen host (overrides config)
    #[arg(long, env = "WSBRIDGE_HOST")]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(long, env = "WSBRIDGE_PORT")]
    port: Option<u16>,

    /// Backend host[:port] (overrides config)
    #[arg(long, env = "WSBRIDGE_BACKEND")]
    backend: Option<String>,

    /// Bridged path, repeatable (replaces configured paths)
    #[arg(long = "path")]
    paths: Vec<String>,

    /// Heartbeat interval, e.g. "15s" (overrides config)
    #[arg(long, env = "WSBRIDGE_INTERVAL")]
    interval: Option<String>,

    /// Log level or filter directive (overrides config and RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(backend) = &self.backend {
            config.bridge.backend_host = backend.clone();
        }
        if !self.paths.is_empty() {
            config.bridge.backend_paths = self.paths.clone();
        }
        if let Some(interval) = &self.interval {
            config.bridge.interval = interval.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = expand_tilde(&cli.config).unwrap_or_else(|| PathBuf::from(&cli.config));
    let mut manager = ConfigManager::load_or_default(&config_path)
        .await
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    manager.update(|config| cli.apply(config));
    let config = manager.into_validated().context("invalid configuration")?;

    init_logging(&config.logging, cli.log_level.as_deref())?;

    run_server(config).await
}
