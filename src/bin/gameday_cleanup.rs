use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use gameday::runtime::loader;
use gameday::runtime::operations::DEFAULT_OPERATIONS_DIR;
use gameday::service::TokenManager;
use gameday::{Cleaner, HttpOrderService};
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Usage: `gameday-cleanup <HH-MM-SS>` (or `GAMEDAY_CLEANUP_TIMESTAMP`).
#[tokio::main]
async fn main() -> Result<()> {
    gameday::init_tracing(gameday::DEFAULT_LOG_DIRECTIVE);

    let timestamp = match env::args().nth(1) {
        Some(arg) => arg,
        None => match env::var("GAMEDAY_CLEANUP_TIMESTAMP") {
            Ok(value) if !value.trim().is_empty() => value,
            _ => bail!("missing operations timestamp (HH-MM-SS) argument"),
        },
    };

    let config_path = match env::var("GAMEDAY_CONFIG") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => DEFAULT_CONFIG_PATH.to_string(),
    };
    let config = loader::load(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    let mut service = HttpOrderService::new(config.service_url(), config.service_options().clone())?;
    if let Some(settings) = config.oauth() {
        let auth = Arc::new(TokenManager::new(
            settings.clone(),
            service.http_client().clone(),
        ));
        auth.token()
            .await
            .context("failed to obtain access token")?;
        service = service.with_auth(auth);
    }

    let operations_dir = config
        .operations_dir()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OPERATIONS_DIR));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received; stopping cleanup after the current order");
            signal_token.cancel();
        }
    });

    let cleaner = Cleaner::new(Arc::new(service), operations_dir).with_cancellation_token(shutdown);
    let summary = cleaner.cleanup_by_timestamp(timestamp.trim()).await?;
    println!(
        "cleanup finished: {} total, {} succeeded, {} failed, {} skipped",
        summary.total, summary.succeeded, summary.failed, summary.skipped
    );
    Ok(())
}
