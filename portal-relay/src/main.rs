//! portal-relay binary entry point.
//!
//! Usage:
//! ```bash
//! portal-relay --config relay.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use portalsync_relay::config::Config;
use portalsync_relay::http::{build_router, RelayState};
use portalsync_relay::sweep::spawn_sweep_task;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path).context("loading configuration")?
    } else {
        tracing::info!("No config file at {:?}, using defaults", config_path);
        Config::default()
    };

    // Without an operator-supplied seed, generate one and log it so it can
    // be copied to clients; endpoints derived from it are worthless to
    // anyone who does not have it.
    let seed = match &config.server.seed {
        Some(seed) => seed.clone(),
        None => {
            let seed = portal_crypto::generate_seed();
            tracing::warn!("No seed configured; generated seed: {}", seed);
            seed
        }
    };

    let state = Arc::new(RelayState::from_config(&config, &seed).context("initializing relay")?);
    let _sweep = spawn_sweep_task(state.clone(), config.sweep.clone(), config.storage.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;
    tracing::info!(
        "portal-relay v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        config.server.bind_address
    );

    axum::serve(listener, build_router(state))
        .await
        .context("serving HTTP")?;
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}
