//! Currency converter entry point.
//!
//! Usage: `wsbridge-converter [CONFIG]` (defaults to `wsbridge.toml`).

mod app;
mod config;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "wsbridge.toml";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting wsbridge converter"
    );

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = config::Config::load(&path)?;
    tracing::info!(
        path = %path.display(),
        incoming = config.messaging.incoming.len(),
        outgoing = config.messaging.outgoing.len(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("converter shut down cleanly");
    Ok(())
}
