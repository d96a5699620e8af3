//! ipsecd binary

use anyhow::Context;
use ipsecd::{Config, IpsecServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // An explicit path wins over the search paths
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from_file(&path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let level = config.logging.level.as_deref().unwrap_or("info");
    if config.logging.is_json() {
        common::logging::init_json(level);
    } else {
        common::logging::init(level);
    }

    tracing::info!(
        vici = %config.vici.socket_path,
        state = %config.state.path,
        "ipsecd starting"
    );

    IpsecServer::new(config).run().await?;
    Ok(())
}
