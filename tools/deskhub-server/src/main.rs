//! DeskHub Server
//!
//! Runs a hub: a router with the network-socket provider attached and the
//! profile and voice-agent subsystems installed.

mod config;

use anyhow::Result;
use clap::Parser;
use config::HubConfig;
use deskhub_core::ProviderKind;
use deskhub_router::{AgentFanout, ProfileSynchronizer, Router};
use deskhub_transport::{WebSocketConfig, WebSocketProvider};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deskhub")]
#[command(about = "DeskHub client registry and message router")]
#[command(version)]
struct Cli {
    /// WebSocket listen address (overrides the config file)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Hub name (overrides the config file)
    #[arg(short, long)]
    name: Option<String>,

    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// App allowed to receive device audio; repeat for several
    #[arg(short, long = "agent")]
    agents: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => HubConfig::load_from(path)?,
        None => HubConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.websocket.listen = listen;
    }
    if let Some(name) = cli.name {
        config.router.name = name;
    }
    if !cli.agents.is_empty() {
        config.agent.allow_list = cli.agents;
    }
    config.validate()?;

    tracing::info!("Starting {}", config.router.name);
    let router = Router::new(config.router_config());

    let profiles = ProfileSynchronizer::install(&router)?;
    if let Some(profile) = config.profile.clone() {
        profiles.activate(profile);
    }
    AgentFanout::install(&router, config.agent.allow_list.clone())?;

    let _clients = router.on_client_list(|clients| {
        let established = clients.iter().filter(|c| c.is_established()).count();
        tracing::info!(
            "{} clients known, {} established",
            clients.len(),
            established
        );
    });

    let (sink, events) = router.provider_channel(ProviderKind::network_socket());
    let websocket = WebSocketProvider::with_config(
        sink,
        WebSocketConfig {
            ping_interval: Duration::from_millis(config.websocket.ping_interval_ms.max(100)),
            ..Default::default()
        },
    );
    let addr = websocket.bind(&config.websocket.listen.to_string()).await?;
    router.attach_provider(websocket.clone(), events)?;

    tracing::info!("Listening on ws://{}", addr);

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    websocket.stop().await;
    router.shutdown();

    Ok(())
}
