// Initialization utilities
//
// Logging/tracing setup and the count engine built from configuration

use std::sync::Arc;

use anyhow::{Context, Result};
use relboard_batch::{CountEngine, EngineConfig, MsearchClient, Strategy, BUTTONS, TABS};
use relboard_config::{LogConfig, LogFormat, RelboardConfig, StrategyConfig};
use tracing::info;

/// Initialize tracing/logging from the log section
pub fn init_tracing(config: &LogConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Parse log level from config
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
}

fn strategy(name: &str, config: &StrategyConfig) -> Strategy {
    let strategy = Strategy::new(name)
        .with_batch_size(config.batch_size)
        .with_parallel_requests(config.parallel_requests)
        .with_retry_on_error(config.retry_on_error);
    match config.retry_backoff() {
        Some(backoff) => strategy.with_retry_backoff(backoff),
        None => strategy,
    }
}

/// Build the count engine with the `tabs` and `buttons` strategies.
pub fn init_engine(config: &RelboardConfig, client: Arc<dyn MsearchClient>) -> Result<CountEngine> {
    let counts = &config.counts;
    info!(
        debounce_ms = counts.debounce_ms,
        cache_ttl_secs = counts.cache_ttl_secs,
        tabs_batch = counts.tabs.batch_size,
        buttons_batch = counts.buttons.batch_size,
        "Initializing count engine"
    );

    CountEngine::new(
        client,
        vec![
            strategy(TABS, &counts.tabs),
            strategy(BUTTONS, &counts.buttons),
        ],
        EngineConfig {
            debounce: counts.debounce(),
            cache_ttl: counts.cache_ttl(),
            cache_capacity: counts.cache_capacity,
        },
    )
    .context("Failed to build count engine")
}
