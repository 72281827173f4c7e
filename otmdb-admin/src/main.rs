//! otmdb-admin - moderator console for the OTMDB catalogue

use anyhow::Result;
use clap::Parser;
use otmdb_admin::{logging, run, Cli};
use otmdb_common::config::{load_toml_config, TomlConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging is not up yet; report a bad config file once it is
    let (config, config_error) = match load_toml_config() {
        Ok(config) => (config, None),
        Err(e) => (TomlConfig::default(), Some(e)),
    };

    logging::init(&config.logging)?;
    info!("Starting otmdb-admin v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = config_error {
        warn!(error = %e, "Config file unreadable, using defaults");
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(&cli, &config, &mut out).await
}
