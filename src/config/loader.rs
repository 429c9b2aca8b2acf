//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles config directory
//! discovery, environment detection and the merge of YAML files with
//! `JACS__*` environment variables.

use ::config::{Config, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::JacsConfig;

/// Base configuration file name inside the config directory
pub const BASE_CONFIG_FILE: &str = "jacs-services.yaml";

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "JACS";

/// Loaded, validated configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: JacsConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_sources(config_dir, environment, None)
    }

    /// Load configuration with an explicit set of `JACS__*` variables instead
    /// of the process environment
    pub fn load_from_sources(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_vars: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        if !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment, env_vars)?;
        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = environment,
            processing_slots = config.engine.processing_slots,
            store = if config.uses_database() { "postgres" } else { "in-memory" },
            "⚙️ Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already built configuration
    pub fn from_config(config: JacsConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &JacsConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with connection strings masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// `JACS_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        env::var("JACS_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
        env_vars: Option<HashMap<String, String>>,
    ) -> ConfigResult<JacsConfig> {
        let base = config_directory.join(BASE_CONFIG_FILE);
        let overrides = config_directory
            .join("environments")
            .join(format!("{environment}.yaml"));

        if !base.exists() {
            debug!("No {} found, starting from defaults", base.display());
        }
        if overrides.exists() {
            debug!("Applying environment overrides from {}", overrides.display());
        }

        let mut env_source = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);
        if env_vars.is_some() {
            env_source = env_source.source(env_vars);
        }

        let merged = Config::builder()
            .add_source(File::from(base).required(false))
            .add_source(File::from(overrides).required(false))
            .add_source(env_source)
            .build()?;

        Ok(merged.try_deserialize::<JacsConfig>()?)
    }

    /// Walk up from the working directory looking for `config/jacs-services.yaml`
    fn default_config_directory() -> PathBuf {
        if let Ok(mut current_dir) = env::current_dir() {
            loop {
                let candidate = current_dir.join("config");
                if candidate.join(BASE_CONFIG_FILE).exists() {
                    debug!("Found config directory: {}", candidate.display());
                    return candidate;
                }
                match current_dir.parent() {
                    Some(parent) => current_dir = parent.to_path_buf(),
                    None => break,
                }
            }
        }
        PathBuf::from("config")
    }

    fn sanitize_config_for_logging(config: &JacsConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "token", "url"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive && val.is_string() {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(BASE_CONFIG_FILE),
            "engine:\n  processing_slots: 5\nqueue:\n  max_ready_size: 40\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("environments")).unwrap();
        fs::write(
            dir.path().join("environments").join("test.yaml"),
            "engine:\n  processing_slots: 2\ncomputation:\n  poll_interval_ms: 10\n  max_poll_interval_ms: 100\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = write_config_dir();
        let manager = ConfigManager::load_from_sources(
            Some(dir.path().to_path_buf()),
            "test",
            Some(HashMap::new()),
        )
        .unwrap();

        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().engine.processing_slots, 2);
        assert_eq!(manager.config().queue.max_ready_size, 40);
        assert_eq!(manager.config().computation.poll_interval_ms, 10);
        // untouched sections keep their defaults
        assert_eq!(manager.config().service.result_retries, 60);
    }

    #[test]
    fn test_unknown_environment_uses_base_only() {
        let dir = write_config_dir();
        let manager = ConfigManager::load_from_sources(
            Some(dir.path().to_path_buf()),
            "staging",
            Some(HashMap::new()),
        )
        .unwrap();
        assert_eq!(manager.config().engine.processing_slots, 5);
    }

    #[test]
    fn test_env_vars_win_over_files() {
        let dir = write_config_dir();
        let vars = HashMap::from([(
            "JACS__ENGINE__PROCESSING_SLOTS".to_string(),
            "9".to_string(),
        )]);
        let manager =
            ConfigManager::load_from_sources(Some(dir.path().to_path_buf()), "test", Some(vars))
                .unwrap();
        assert_eq!(manager.config().engine.processing_slots, 9);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(BASE_CONFIG_FILE),
            "computation:\n  main_pool_size: 0\n",
        )
        .unwrap();
        let result = ConfigManager::load_from_sources(
            Some(dir.path().to_path_buf()),
            "test",
            Some(HashMap::new()),
        );
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_missing_directory() {
        let result = ConfigManager::load_from_directory_with_env(
            Some(PathBuf::from("/definitely/not/here")),
            "test",
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::DirectoryNotFound { .. })
        ));
    }

    #[test]
    fn test_debug_config_masks_database_url() {
        let mut config = JacsConfig::default();
        config.database = Some(crate::config::DatabaseConfig {
            url: "postgresql://user:secret@db/jacs".to_string(),
            ..Default::default()
        });
        let manager = ConfigManager::from_config(config, "test").unwrap();
        let json = manager.debug_config();
        assert_eq!(json["database"]["url"], "[MASKED]");
        assert_eq!(json["database"]["max_connections"], 10);
    }
}
