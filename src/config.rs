//! Engine Configuration
//!
//! Loads and validates the engine configuration from YAML files:
//!
//! ```yaml
//! scheduler:
//!   worker_threads: 4
//!   thread_name: corunner-worker
//!   max_blocking_threads: 64
//! record_timeline: true
//! ```
//!
//! Every field is optional and falls back to its default.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::execution::SchedulerConfig;

/// Complete configuration of a coroutine engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool executing the asynchronous steps
    pub scheduler: SchedulerConfig,

    /// Record a timeline of step events for every run
    pub record_timeline: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            record_timeline: true,
        }
    }
}

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    NoWorkerThreads,
    NoBlockingThreads,
    EmptyThreadName,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoWorkerThreads => write!(f, "scheduler.worker_threads must be at least 1"),
            Self::NoBlockingThreads => {
                write!(f, "scheduler.max_blocking_threads must be at least 1")
            }
            Self::EmptyThreadName => write!(f, "scheduler.thread_name must not be empty"),
        }
    }
}

/// Errors of loading or saving a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration:\n{}", format_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Checks the configuration and returns every problem found.
pub fn validate_config(config: &EngineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.scheduler.worker_threads == 0 {
        errors.push(ValidationError::NoWorkerThreads);
    }
    if config.scheduler.max_blocking_threads == 0 {
        errors.push(ValidationError::NoBlockingThreads);
    }
    if config.scheduler.thread_name.trim().is_empty() {
        errors.push(ValidationError::EmptyThreadName);
    }

    errors
}

/// Loads an engine configuration from a YAML file.
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Example
///
/// ```rust,no_run
/// use corunner::config::load_config;
///
/// let config = load_config("corunner.yaml").unwrap();
/// println!("{} worker threads", config.scheduler.worker_threads);
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Config content loaded ({} bytes)", content.len());

    let config: EngineConfig = if content.trim().is_empty() {
        EngineConfig::default()
    } else {
        serde_yaml::from_str(&content)?
    };

    let errors = validate_config(&config);
    if !errors.is_empty() {
        return Err(ConfigError::Invalid(errors));
    }

    Ok(config)
}

/// Writes an engine configuration as YAML.
pub fn save_config(config: &EngineConfig, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let yaml = serde_yaml::to_string(config)?;

    fs::write(path, yaml).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!("Configuration saved to: {}", path.display());
    Ok(())
}
