use std::env;

use anyhow::{Context, Result};
use gameday::runtime::loader;
use gameday::Runner;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    gameday::init_tracing(gameday::DEFAULT_LOG_DIRECTIVE);

    let config_path = read_env_or_default("GAMEDAY_CONFIG", DEFAULT_CONFIG_PATH);
    let config = loader::load(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;
    tracing::info!(
        config = %config_path,
        total_orders = config.total_orders(),
        batch_size = config.batch_size(),
        parallel_batches = config.parallel_batches(),
        service = config.service_url(),
        "starting gameday simulation"
    );

    let runner = Runner::new(config)?;
    let summary = runner.run_until_ctrl_c().await?;

    if summary.failed_orders > 0 || summary.interrupted_orders > 0 {
        tracing::warn!(
            failed = summary.failed_orders,
            interrupted = summary.interrupted_orders,
            "simulation completed with unsuccessful orders"
        );
    }
    Ok(())
}

fn read_env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}
