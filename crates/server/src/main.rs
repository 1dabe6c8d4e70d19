//! Satchel server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use satchel_core::config::AppConfig;
use satchel_server::{AppState, create_router, sweeper};
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Satchel - file sharing with expiring download links
#[derive(Parser, Debug)]
#[command(name = "satcheld")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SATCHEL_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

const ENV_PREFIX: &str = "SATCHEL_";

/// Load configuration from an optional TOML file overlaid with `SATCHEL_` env vars.
fn load_config(config_path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %config_path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::debug!("No config file found at {}", config_path.display());
    }

    // SATCHEL_CONFIG is only the path, not configuration
    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with(ENV_PREFIX) && key != "SATCHEL_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: satcheld --config /path/to/config.toml\n  \
             2. Environment variables: SATCHEL_SERVER__BIND=0.0.0.0:8080 \
             SATCHEL_LINKS__SECRET=YOUR_32_BYTE_SECRET satcheld\n\n\
             Set SATCHEL_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Satchel v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(Path::new(&args.config))?;

    satchel_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = satchel_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Refuse to start when the backend is unreachable
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    let metadata = satchel_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let state = AppState::new(config.clone(), storage, metadata)
        .context("failed to build application state")?;
    tracing::info!(users = config.auth.users.len(), "Credential directory loaded");

    if config.sweeper.enabled {
        sweeper::spawn_periodic(state.sweeper.clone(), config.sweeper.interval());
    } else {
        tracing::info!("Scheduled sweeping disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
