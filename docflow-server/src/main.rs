//! # Docflow Server Binary
//!
//! Entry point for the orchestrator. Loads configuration, wires the
//! application, serves HTTP with graceful shutdown, and runs the staged
//! drain on termination.
//!
//! ```bash
//! # Default configuration (config.toml if present)
//! docflow-server
//!
//! # Custom configuration file and bind address
//! docflow-server --config docflow.toml --host 0.0.0.0 --port 8080
//!
//! # Debug logging
//! docflow-server --log-level debug
//! ```
//!
//! Exit code is 0 on clean shutdown and nonzero on unrecoverable startup
//! failure (invalid configuration, broker unreachable under strict
//! startup, bind failure).

use std::net::SocketAddr;
use std::path::Path;

use clap::Parser;

use docflow_sdk::plugin::PluginSet;
use docflow_server::config::Config;
use docflow_server::server::bootstrap;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override the configured bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Logging filter (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // The config file is optional: a missing file falls back to defaults
    // plus environment overrides, matching containerized deployments that
    // configure everything through the environment.
    let mut config = if Path::new(&args.config).exists() {
        Config::load(&args.config)?
    } else {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config
    };

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    tracing_subscriber::fmt()
        .with_env_filter(config.logging.level.clone())
        .init();

    config.validate()?;

    // Plugins register here at compile time. The core ships none; concrete
    // processing plugins are linked in by the deployment crate.
    let plugins = PluginSet::new();

    let app = bootstrap(config.clone(), plugins).await?;
    let state = app.state;

    state.shutdown.clone().install_signal_handlers();

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!(%addr, "starting docflow server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = state.shutdown.clone();
    axum::serve(listener, app.router)
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await?;

    // The listener has stopped; run the staged drain.
    state.shutdown.run_drain(&state).await;

    Ok(())
}
