use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RunnerError, RunnerResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunnerConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub consul: ConsulConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

/// Per-target connection limits applied by every backend client.
///
/// Pools are sized from the playbook (the widest step), so only timeouts are
/// configured here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound for a single script; long analytic loads are expected.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    #[serde(default = "default_consul_timeout")]
    pub request_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    8 * 60 * 60
}

fn default_consul_timeout() -> u64 {
    10
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_consul_timeout(),
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl ConsulConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RunnerConfig {
    pub fn load() -> RunnerResult<Self> {
        Self::load_from_paths(get_config_paths())
    }

    /// Loads the default search paths followed by an explicit file, which
    /// must exist.
    pub fn load_with_file(path: &Path) -> RunnerResult<Self> {
        if !path.exists() {
            return Err(RunnerError::InvalidConfigValue {
                key: "config".to_string(),
                message: format!("{} does not exist", path.display()),
            });
        }
        let mut paths = get_config_paths();
        paths.push(path.to_path_buf());
        Self::load_from_paths(paths)
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> RunnerResult<Self> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SQL_RUNNER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut runner_config: RunnerConfig = config.try_deserialize()?;

        if let Ok(level) = std::env::var("SQL_RUNNER_LOG_LEVEL") {
            runner_config.logging.level = level;
        }

        runner_config.validate()?;

        Ok(runner_config)
    }

    pub fn validate(&self) -> RunnerResult<()> {
        if self.connection.connect_timeout_secs == 0 {
            return Err(RunnerError::InvalidConfigValue {
                key: "connection.connect_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.connection.read_timeout_secs == 0 {
            return Err(RunnerError::InvalidConfigValue {
                key: "connection.read_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.consul.request_timeout_secs == 0 {
            return Err(RunnerError::InvalidConfigValue {
                key: "consul.request_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(RunnerError::InvalidConfigValue {
                key: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("sql-runner.toml"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    for path in get_dotenv_paths() {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

fn get_dotenv_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join(".env"));
    }

    paths
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sql-runner"))
}
