//! Logging setup.
//!
//! Log output goes to stdout through `tracing_subscriber::fmt`. Verbosity is controlled by
//! `RUST_LOG` (default `info`), e.g. `RUST_LOG=tryon=debug,tower_http=debug`.

use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. Fails if one is already installed.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Telemetry initialized");
    Ok(())
}
