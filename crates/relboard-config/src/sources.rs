// Configuration source loading.
//
// Priority order:
// 1. Environment variables (RELBOARD_* prefix)
// 2. Config file path from RELBOARD_CONFIG
// 3. Inline config content from RELBOARD_CONFIG_CONTENT
// 4. Default config file (./relboard.toml)
// 5. Built-in defaults

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::RelboardConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "./relboard.toml";

/// Load configuration using the process environment and working directory.
pub fn load_config() -> Result<RelboardConfig> {
    load_with_source(&StdEnvSource, Path::new(DEFAULT_CONFIG_PATH))
}

pub(crate) fn load_with_source<E: EnvSource>(
    env: &E,
    default_path: &Path,
) -> Result<RelboardConfig> {
    let mut config = match load_from_file(env, default_path)? {
        Some(file_config) => file_config,
        None => RelboardConfig::default(),
    };

    env_overrides::apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

fn load_from_file<E: EnvSource>(env: &E, default_path: &Path) -> Result<Option<RelboardConfig>> {
    if let Some(path) = env.get("CONFIG") {
        return read_file(Path::new(&path)).map(Some);
    }

    if let Some(content) = env.get("CONFIG_CONTENT") {
        let config: RelboardConfig = toml::from_str(&content)
            .context("Failed to parse inline config from RELBOARD_CONFIG_CONTENT")?;
        info!("Loaded config from RELBOARD_CONFIG_CONTENT");
        return Ok(Some(config));
    }

    if default_path.exists() {
        return read_file(default_path).map(Some);
    }

    Ok(None)
}

fn read_file(path: &Path) -> Result<RelboardConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: RelboardConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    info!(path = %path.display(), "Loaded config file");
    Ok(config)
}

/// Load configuration from a specific file path (for the CLI --config flag).
/// Returns an error if the file doesn't exist or can't be parsed.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<RelboardConfig> {
    let mut config = read_file(path.as_ref())?;
    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    config.validate()?;
    Ok(config)
}

struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogFormat;
    use std::collections::HashMap;
    use std::io::Write;

    #[derive(Default)]
    struct MapEnv(HashMap<String, String>);

    impl MapEnv {
        fn with(mut self, key: &str, value: &str) -> Self {
            self.0.insert(key.to_string(), value.to_string());
            self
        }
    }

    impl EnvSource for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    fn write_config(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn defaults_when_nothing_is_configured() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_with_source(&MapEnv::default(), &dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, RelboardConfig::default());
    }

    #[test]
    fn default_file_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "relboard.toml", "[backend]\nurl = \"http://es:9200\"\n");
        let config = load_with_source(&MapEnv::default(), &path).unwrap();
        assert_eq!(config.backend.url, "http://es:9200");
    }

    #[test]
    fn explicit_path_beats_inline_content_and_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let default = write_config(&dir, "relboard.toml", "[log]\nlevel = \"warn\"\n");
        let explicit = write_config(&dir, "other.toml", "[log]\nlevel = \"trace\"\n");
        let env = MapEnv::default()
            .with("CONFIG", explicit.to_str().unwrap())
            .with("CONFIG_CONTENT", "[log]\nlevel = \"debug\"\n");
        let config = load_with_source(&env, &default).unwrap();
        assert_eq!(config.log.level, "trace");
    }

    #[test]
    fn inline_content_beats_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let default = write_config(&dir, "relboard.toml", "[log]\nlevel = \"warn\"\n");
        let env = MapEnv::default().with("CONFIG_CONTENT", "[log]\nformat = \"json\"\n");
        let config = load_with_source(&env, &default).unwrap();
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn env_vars_beat_files() {
        let dir = tempfile::tempdir().unwrap();
        let default = write_config(&dir, "relboard.toml", "[counts]\ndebounce_ms = 900\n");
        let env = MapEnv::default().with("COUNTS_DEBOUNCE_MS", "50");
        let config = load_with_source(&env, &default).unwrap();
        assert_eq!(config.counts.debounce_ms, 50);
    }

    #[test]
    fn invalid_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let broken = write_config(&dir, "relboard.toml", "[counts\n");
        let err = load_with_source(&MapEnv::default(), &broken).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));

        let missing = MapEnv::default().with("CONFIG", "/nonexistent/relboard.toml");
        assert!(load_with_source(&missing, &broken).is_err());
    }

    #[test]
    fn loaded_config_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let zero = write_config(&dir, "relboard.toml", "[counts.tabs]\nbatch_size = 0\n");
        assert!(load_with_source(&MapEnv::default(), &zero).is_err());
    }
}
