//! # JACS Services Configuration System
//!
//! Layered configuration for the service engine, loaded with the `config`
//! crate.
//!
//! ## Architecture
//!
//! - **Base file**: `config/jacs-services.yaml`
//! - **Environment overrides**: `config/environments/<env>.yaml`
//! - **Process environment**: `JACS__<SECTION>__<FIELD>` variables win over files
//! - **Explicit Validation**: pool sizes, queue capacity and polling bounds are
//!   checked before anything is started
//!
//! Every section has defaults, so a missing base file yields a working
//! in-memory engine.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jacs_services::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let slots = manager.config().engine.processing_slots;
//! let poll = manager.config().computation.poll_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring jacs-services.yaml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JacsConfig {
    /// Admission control and dispatch cadence
    pub engine: EngineConfig,

    /// Ready queue capacity and refresh
    pub queue: QueueConfig,

    /// Main and suspend lane sizing
    pub computation: ComputationConfig,

    /// Processor defaults
    pub service: ServiceConfig,

    /// Postgres store; absent means the in-memory store
    pub database: Option<DatabaseConfig>,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub processing_slots: usize,
    pub dispatch_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            processing_slots: 20,
            dispatch_interval_ms: 500,
        }
    }
}

impl EngineConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }
}

/// Ready queue configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Most candidates held in memory at once
    pub max_ready_size: usize,
    /// Records fetched from the store per refresh
    pub refresh_page_size: usize,
    pub refresh_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_ready_size: 200,
            refresh_page_size: 50,
            refresh_interval_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Computation lane configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ComputationConfig {
    pub main_pool_size: usize,
    pub suspend_pool_size: usize,
    /// First delay before a pending check runs again
    pub poll_interval_ms: u64,
    /// Cap for the doubling delay between checks
    pub max_poll_interval_ms: u64,
}

impl Default for ComputationConfig {
    fn default() -> Self {
        Self {
            main_pool_size: 16,
            suspend_pool_size: 8,
            poll_interval_ms: 1000,
            max_poll_interval_ms: 10_000,
        }
    }
}

impl ComputationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }
}

/// Defaults applied by service processors
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Parent of per-service working directories when a service names no workspace
    pub default_working_dir: Option<PathBuf>,
    /// Base directory for the executables external scripts call
    pub executables_base_dir: Option<PathBuf>,
    /// Extra entries prepended to `LD_LIBRARY_PATH` for external processes
    pub library_path: Vec<String>,
    pub result_retries: u32,
    pub result_retry_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_working_dir: None,
            executables_base_dir: None,
            library_path: Vec::new(),
            result_retries: 60,
            result_retry_interval_ms: 1000,
        }
    }
}

impl ServiceConfig {
    pub fn result_retry_interval(&self) -> Duration {
        Duration::from_millis(self.result_retry_interval_ms)
    }
}

/// PostgreSQL connection configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL; `${DATABASE_URL}` is expanded from the environment
    pub url: String,
    pub max_connections: u32,
    /// Create the service tables on startup
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "${DATABASE_URL}".to_string(),
            max_connections: 10,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    /// Build the connection URL, expanding `${DATABASE_URL}`
    pub fn database_url(&self) -> ConfigResult<String> {
        if self.url.trim() == "${DATABASE_URL}" {
            return std::env::var("DATABASE_URL").map_err(|e| {
                ConfigurationError::environment_variable_error("DATABASE_URL", e.to_string())
            });
        }
        Ok(self.url.clone())
    }
}

impl JacsConfig {
    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.computation.main_pool_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "computation.main_pool_size",
                "0",
                "pool size must be greater than 0",
            ));
        }

        if self.computation.suspend_pool_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "computation.suspend_pool_size",
                "0",
                "pool size must be greater than 0",
            ));
        }

        if self.computation.max_poll_interval_ms < self.computation.poll_interval_ms {
            return Err(ConfigurationError::invalid_value(
                "computation.max_poll_interval_ms",
                self.computation.max_poll_interval_ms.to_string(),
                "must not be below computation.poll_interval_ms",
            ));
        }

        if self.queue.max_ready_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue.max_ready_size",
                "0",
                "queue capacity must be greater than 0",
            ));
        }

        if self.queue.refresh_page_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue.refresh_page_size",
                "0",
                "page size must be greater than 0",
            ));
        }

        if let Some(database) = &self.database {
            if database.url.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "database.url",
                    "database configuration",
                ));
            }
            if database.max_connections == 0 {
                return Err(ConfigurationError::invalid_value(
                    "database.max_connections",
                    "0",
                    "connection pool size must be greater than 0",
                ));
            }
        }

        Ok(())
    }

    pub fn uses_database(&self) -> bool {
        self.database.is_some()
    }
}
