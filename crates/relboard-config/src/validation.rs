// Configuration validation
//
// Rejects values the count engine cannot run with and warns about extreme ones

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RelboardConfig) -> Result<()> {
    validate_counts_config(&config.counts)?;
    validate_backend_config(&config.backend)?;
    validate_log_config(&config.log)?;
    Ok(())
}

fn validate_counts_config(config: &CountsConfig) -> Result<()> {
    validate_strategy_config("counts.tabs", &config.tabs)?;
    validate_strategy_config("counts.buttons", &config.buttons)?;

    if config.cache_capacity == 0 && config.cache_ttl_secs > 0 {
        bail!("counts.cache_capacity must be greater than 0 when caching is enabled");
    }

    if config.debounce_ms > 10_000 {
        warn!(
            debounce_ms = config.debounce_ms,
            "counts.debounce_ms is very large; counts will feel unresponsive"
        );
    }

    Ok(())
}

fn validate_strategy_config(section: &str, config: &StrategyConfig) -> Result<()> {
    if config.batch_size == 0 {
        bail!("{}.batch_size must be greater than 0", section);
    }

    if config.parallel_requests == 0 {
        bail!("{}.parallel_requests must be greater than 0", section);
    }

    if config.batch_size > 100 {
        warn!(
            section,
            batch_size = config.batch_size,
            "batch_size is very large; a single slow query delays the whole batch"
        );
    }

    if config.retry_on_error > 10 {
        warn!(
            section,
            retry_on_error = config.retry_on_error,
            "retry_on_error is very large; failing backends will be hammered"
        );
    }

    Ok(())
}

fn validate_backend_config(config: &BackendConfig) -> Result<()> {
    if config.url.trim().is_empty() {
        bail!("backend.url must not be empty");
    }

    if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
        bail!("backend.url must start with http:// or https://");
    }

    if config.timeout_secs == 0 {
        bail!("backend.timeout_secs must be greater than 0");
    }

    Ok(())
}

fn validate_log_config(config: &LogConfig) -> Result<()> {
    if config.level.trim().is_empty() {
        bail!("log.level must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_strategy_config() {
        assert!(validate_strategy_config("counts.tabs", &StrategyConfig::default()).is_ok());

        let zero_batch = StrategyConfig {
            batch_size: 0,
            ..StrategyConfig::default()
        };
        let err = validate_strategy_config("counts.tabs", &zero_batch).unwrap_err();
        assert!(err.to_string().contains("counts.tabs.batch_size"));

        let zero_parallel = StrategyConfig {
            parallel_requests: 0,
            ..StrategyConfig::default()
        };
        assert!(validate_strategy_config("counts.buttons", &zero_parallel).is_err());
    }

    #[test]
    fn test_validate_backend_config() {
        assert!(validate_backend_config(&BackendConfig::default()).is_ok());

        let empty = BackendConfig {
            url: String::new(),
            ..BackendConfig::default()
        };
        assert!(validate_backend_config(&empty).is_err());

        let no_scheme = BackendConfig {
            url: "localhost:9200".to_string(),
            ..BackendConfig::default()
        };
        assert!(validate_backend_config(&no_scheme).is_err());
    }

    #[test]
    fn test_zero_capacity_only_allowed_without_cache() {
        let mut counts = CountsConfig {
            cache_capacity: 0,
            ..CountsConfig::default()
        };
        assert!(validate_counts_config(&counts).is_err());
        counts.cache_ttl_secs = 0;
        assert!(validate_counts_config(&counts).is_ok());
    }
}
