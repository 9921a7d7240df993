use super::{LogFormat, RelboardConfig, StrategyConfig};
use anyhow::{anyhow, Context, Result};

pub const ENV_PREFIX: &str = "RELBOARD_";

/// Abstraction over environment-variable lookups so tests and embedders can
/// supply their own source of overrides.
pub trait EnvSource {
    /// Get a variable by its name without the RELBOARD_ prefix.
    fn get(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RelboardConfig, env: &E) -> Result<()> {
    // Backend
    if let Some(url) = get_env_string(env, "BACKEND_URL") {
        config.backend.url = url;
    }
    if let Some(val) = get_env_parsed::<u64, E>(env, "BACKEND_TIMEOUT_SECS")? {
        config.backend.timeout_secs = val;
    }

    // Logging
    if let Some(level) = get_env_string(env, "LOG_LEVEL") {
        config.log.level = level;
    }
    if let Some(format) = get_env_string(env, "LOG_FORMAT") {
        config.log.format = format
            .parse::<LogFormat>()
            .context("Invalid RELBOARD_LOG_FORMAT value")?;
    }

    // Count engine
    if let Some(val) = get_env_parsed(env, "COUNTS_DEBOUNCE_MS")? {
        config.counts.debounce_ms = val;
    }
    if let Some(val) = get_env_parsed(env, "COUNTS_CACHE_TTL_SECS")? {
        config.counts.cache_ttl_secs = val;
    }
    if let Some(val) = get_env_parsed(env, "COUNTS_CACHE_CAPACITY")? {
        config.counts.cache_capacity = val;
    }

    apply_strategy_overrides(&mut config.counts.tabs, env, "TABS")?;
    apply_strategy_overrides(&mut config.counts.buttons, env, "BUTTONS")?;

    Ok(())
}

fn apply_strategy_overrides<E: EnvSource>(
    strategy: &mut StrategyConfig,
    env: &E,
    name: &str,
) -> Result<()> {
    if let Some(val) = get_env_parsed(env, &format!("{}_BATCH_SIZE", name))? {
        strategy.batch_size = val;
    }
    if let Some(val) = get_env_parsed(env, &format!("{}_PARALLEL_REQUESTS", name))? {
        strategy.parallel_requests = val;
    }
    if let Some(val) = get_env_parsed(env, &format!("{}_RETRY_ON_ERROR", name))? {
        strategy.retry_on_error = val;
    }
    if let Some(val) = get_env_parsed::<u64, E>(env, &format!("{}_RETRY_BACKOFF_MS", name))? {
        // 0 turns the backoff off
        strategy.retry_backoff_ms = (val > 0).then_some(val);
    }
    Ok(())
}

fn get_env_string<E: EnvSource>(env: &E, key: &str) -> Option<String> {
    env.get(key).filter(|val| !val.trim().is_empty())
}

fn get_env_parsed<T, E>(env: &E, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    E: EnvSource,
{
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = val
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
