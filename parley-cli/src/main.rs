use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use colored::*;
use parley_core::IceServerConfig;
use parley_server::{
    AgentConfig, AgentDeps, AppState, ProcessPipelineFactory, RoomRegistry, SignalingService,
    WebRtcTransportFactory, ws_handler,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley", version, about = "Multi-room voice agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling endpoint and the room agent.
    Serve {
        /// TOML configuration file; defaults apply to anything it leaves out.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Log filter used when RUST_LOG is unset.
        #[arg(long, default_value = "info")]
        log: String,
    },

    /// Print the effective configuration as TOML.
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<AgentConfig> {
    match path {
        Some(path) => AgentConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(AgentConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::Serve { config, bind, log } => {
            let mut config = load_config(config)?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            init_tracing(&log);
            serve(config).await
        }
        Commands::Config { config } => {
            let config = load_config(config)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(config: AgentConfig) -> Result<()> {
    println!("{}", "Starting parley agent...".green().bold());

    let ice_servers = config
        .transport
        .ice_servers
        .iter()
        .map(|url| IceServerConfig {
            urls: vec![url.clone()],
            username: None,
            credential: None,
        })
        .collect();
    let signaling = SignalingService::new(ice_servers);

    let addr = config.server.bind;
    let media = Arc::new(WebRtcTransportFactory::new(config.transport.clone()));
    let pipelines = Arc::new(ProcessPipelineFactory::new(config.pipeline.clone()));
    let deps = AgentDeps::new(config, media, Arc::new(signaling.clone()), pipelines)
        .context("Invalid router configuration")?;

    let registry = RoomRegistry::new(deps, Arc::new(signaling.clone()));
    let reconciler = registry.spawn_reconciler();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws/{peer_id}", get(ws_handler))
        .layer(cors)
        .with_state(AppState {
            signaling,
            registry: registry.clone(),
        });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Signaling server listening on ws://{}/ws/{{peer_id}}", addr);
    println!("   {} ws://{}/ws/<peer_id>", "Listening on".cyan(), addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    reconciler.abort();
    registry.shutdown().await;
    println!("{}", "Agent stopped.".green().bold());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
