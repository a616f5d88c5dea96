//! Cat Care Tracker Server
//!
//! Main entry point: loads configuration, sets up stored entries and serves
//! the HTTP API until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use cct_config::{TrackerConfig, CONFIG_FILE};
use cct_helpers::{ClientCredential, Hass};
use cct_tracker::{TrackerOptions, DOMAIN};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_DIR_ENV: &str = "CCT_CONFIG_DIR";
const DEFAULT_CONFIG_DIR: &str = "config";

/// First CLI argument, then the environment, then `./config`
fn resolve_config_dir(arg: Option<String>, env: Option<String>) -> PathBuf {
    arg.or(env)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR))
}

fn load_config(config_dir: &Path) -> Result<TrackerConfig> {
    if !config_dir.join(CONFIG_FILE).exists() {
        return Ok(TrackerConfig::default());
    }
    TrackerConfig::load(config_dir)
        .with_context(|| format!("loading {}", config_dir.join(CONFIG_FILE).display()))
}

/// `RUST_LOG` wins over the `logger:` section
fn init_tracing(config: &TrackerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logger.filter_directives()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn internal_url(config: &TrackerConfig) -> String {
    config
        .homeassistant
        .internal_url
        .clone()
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.http.server_port))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = resolve_config_dir(
        std::env::args().nth(1),
        std::env::var(CONFIG_DIR_ENV).ok(),
    );
    let config = load_config(&config_dir)?;
    init_tracing(&config);

    info!(
        name = %config.homeassistant.name,
        config_dir = %config_dir.display(),
        "Starting Cat Care Tracker"
    );

    let hass = Arc::new(Hass::new(&config_dir, internal_url(&config)));
    match &config.cat_care_tracker {
        Some(credentials) => hass.import_client_credential(
            DOMAIN,
            ClientCredential {
                client_id: credentials.client_id.clone(),
                client_secret: credentials.client_secret.clone(),
            },
        ),
        None => warn!("No cat_care_tracker credentials in configuration, new entries cannot be added"),
    }

    hass.config_entries
        .load()
        .await
        .context("loading config entries")?;
    let _tracker = cct_tracker::async_setup(&hass, TrackerOptions::default()).await;

    for (entry_id, result) in hass.config_entries.setup_all().await {
        match result {
            Ok(state) => info!(entry_id = %entry_id, state = ?state, "Config entry set up"),
            Err(e) => error!(entry_id = %entry_id, "Config entry setup failed: {}", e),
        }
    }

    let router = cct_api::create_router(hass.clone());
    cct_api::start_server(router, &config.http.bind_address(), shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Shutting down...");
    hass.config_entries.unload_all().await;
    Ok(())
}
