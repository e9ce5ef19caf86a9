//! HTTP server binary for the Jarvis assistant.

use clap::Parser;
use jarvis::config::AssistantConfig;
use jarvis::server::{self, ApiServer};
use jarvis::startup;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Streaming chat assistant with web search and inline speech.
#[derive(Parser)]
#[command(name = "jarvis-server", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "JARVIS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,
}

/// Explicit path, then `./jarvis.toml` if present, then the platform default.
fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }
    let local = PathBuf::from("jarvis.toml");
    if local.exists() {
        return Some(local);
    }
    AssistantConfig::default_path()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("jarvis=info,jarvis_search=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let path = resolve_config_path(cli.config);
    let mut config = AssistantConfig::load(path.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.ensure_dirs()?;

    info!("Jarvis v{}", env!("CARGO_PKG_VERSION"));
    let state = startup::build_state(&config).await?;
    let chat = state.chat.clone();
    let app = server::router(state, config.server.cors_allow_all);

    let api = ApiServer::start(
        app,
        &config.server.host,
        config.server.port,
        CancellationToken::new(),
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down, saving sessions");
    api.shutdown().await;
    chat.save_all().await;
    Ok(())
}
