//! Configuration for the placemarkd server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "placemarkd")]
#[command(version = "0.1.0")]
#[command(about = "A social-bookmarking server with a pipe-delimited text protocol", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:5500)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Storage backend: sqlite or memory
    #[arg(short = 'b', long)]
    pub backend: Option<String>,

    /// Path to the sqlite database file
    #[arg(short = 'd', long)]
    pub db_path: Option<PathBuf>,

    /// Maximum command line length in bytes
    #[arg(long)]
    pub max_line: Option<usize>,

    /// Idle timeout in seconds (0 disables)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Memory,
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Backend::Sqlite),
            "memory" => Ok(Backend::Memory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum command line length in bytes
    #[serde(default = "default_max_line")]
    pub max_line: usize,
    /// Idle timeout in seconds (0 disables)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_line: default_max_line(),
            idle_timeout: default_idle_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Storage backend
    #[serde(default = "default_backend")]
    pub backend: Backend,
    /// Path to the sqlite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: default_db_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:5500".to_string()
}

fn default_max_line() -> usize {
    8 * 1024
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_max_connections() -> usize {
    1024
}

fn default_backend() -> Backend {
    Backend::Sqlite
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/placemark.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub backend: Backend,
    pub db_path: PathBuf,
    pub max_line: usize,
    pub idle_timeout: u64,
    pub max_connections: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();
        Self::resolve(cli)
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let backend = match cli.backend {
            Some(ref s) => s.parse()?,
            None => toml_config.storage.backend,
        };

        // Merge CLI args with TOML config (CLI takes precedence)
        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            backend,
            db_path: cli.db_path.unwrap_or(toml_config.storage.db_path),
            max_line: cli.max_line.unwrap_or(toml_config.server.max_line),
            idle_timeout: cli
                .idle_timeout
                .unwrap_or(toml_config.server.idle_timeout),
            max_connections: toml_config.server.max_connections,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    #[cfg(test)]
    pub fn for_tests(listen: &str) -> Self {
        Config {
            listen: listen.to_string(),
            backend: Backend::Memory,
            db_path: default_db_path(),
            max_line: default_max_line(),
            idle_timeout: 0,
            max_connections: 16,
            log_level: "debug".to_string(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("failed to parse config file '{0}': {1}")]
    TomlParse(PathBuf, toml::de::Error),

    #[error("unknown storage backend '{0}' (expected sqlite or memory)")]
    UnknownBackend(String),
}
