//! agentd CLI — the main entry point.
//!
//! Commands:
//! - `serve`  — start the agent runtime and HTTP gateway
//! - `doctor` — check configuration and report session state
//!
//! Exit codes: 0 on clean shutdown, 1 on fatal initialization error,
//! 2 on unrecoverable runtime error.

use agentd_config::AppConfig;
use agentd_gateway::GatewayState;
use agentd_services::ServiceRegistry;
use agentd_session::SessionManager;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "agentd",
    about = "agentd — autonomous agent runtime with MCP tool servers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config.toml (default: ~/.agentd/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent runtime and HTTP gateway
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the bind port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration and report session state
    Doctor,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            let port = port.unwrap_or(config.gateway.port);

            if let Err(e) = std::fs::create_dir_all(config.sessions_dir()) {
                error!("cannot create data directory: {e}");
                std::process::exit(1);
            }

            let registry = Arc::new(ServiceRegistry::with_builtins());
            let sessions = SessionManager::new(&config, registry);
            let state = Arc::new(GatewayState { sessions });

            info!(data_dir = %config.data_dir.display(), "agentd starting");
            if let Err(e) = agentd_gateway::serve(state, &host, port).await {
                error!("gateway failed: {e}");
                std::process::exit(2);
            }
        }
        Commands::Doctor => {
            println!("config:   ok");
            println!("data dir: {}", config.data_dir.display());

            let registry = Arc::new(ServiceRegistry::with_builtins());
            let types: Vec<String> =
                registry.types().into_iter().map(|(name, _)| name).collect();
            println!("services: {}", types.join(", "));

            let sessions = SessionManager::new(&config, registry);
            let stats = sessions.stats().await;
            println!(
                "sessions: {} on disk, {} live",
                stats.total_sessions, stats.live_sessions
            );
        }
    }
}
