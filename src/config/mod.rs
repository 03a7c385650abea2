//! Engine settings: retry policy defaults and logging, loadable from a
//! YAML file with sensible defaults when no file is present.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::exec::RetryConfig;

/// Settings for the workflow engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineSettings {
    /// Retry policy applied to transient step failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logger settings
    #[serde(default)]
    pub logger: LoggerSettings,
}

/// Logger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Log level filter, e.g. `"info"` or `"workflow_engine=debug"`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Include target paths in log lines
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: default_with_target(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

/// Load settings from a YAML file
pub fn load_settings<P: AsRef<Path>>(path: P) -> EngineResult<EngineSettings> {
    let mut file = File::open(path)
        .map_err(|e| EngineError::Config(format!("Failed to open config file: {}", e)))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

    let settings: EngineSettings = serde_yaml::from_str(&contents)
        .map_err(|e| EngineError::Config(format!("Failed to parse config file: {}", e)))?;

    Ok(settings)
}

/// Get settings, optionally from a specific file.
///
/// Without an explicit path, looks in the conventional locations and
/// falls back to defaults when no file is found.
pub fn get_settings(config_path: Option<&str>) -> EngineResult<EngineSettings> {
    match config_path {
        Some(path) => load_settings(path),
        None => {
            let default_paths = vec![
                "workflow_engine.config.yaml",
                "config/workflow_engine.config.yaml",
                "../workflow_engine.config.yaml",
            ];

            for path in default_paths {
                if Path::new(path).exists() {
                    return load_settings(path);
                }
            }

            Ok(EngineSettings::default())
        }
    }
}

/// Initialize the tracing subscriber from logger settings.
///
/// `RUST_LOG` wins over the configured level when set. Call once at
/// startup; later calls fail once a global subscriber exists.
pub fn init_tracing(logger: &LoggerSettings) -> EngineResult<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logger.level.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(logger.with_target)
        .try_init()
        .map_err(|e| EngineError::Config(format!("Failed to initialize tracing: {}", e)))
}
