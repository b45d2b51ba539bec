//! Configuration module for the memcc command-line tool.
//!
//! Supports command-line arguments, environment variables and a TOML
//! configuration file. Precedence, lowest first: built-in defaults, TOML
//! file, `MEMCACHED_HOST`/`MEMCACHED_PORT`, `--server`, `--host`/`--port`.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::{ConnectOptions, DEFAULT_CONNECT_TIMEOUT};

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "memcc")]
#[command(author = "memcc authors")]
#[command(version)]
#[command(about = "A memcached command-line client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Memcached server host
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Memcached server port
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// Server address as host:port
    #[arg(short, long)]
    pub server: Option<String>,

    /// Connect timeout in seconds
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Read timeout in seconds (0 = none)
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Write timeout in seconds (0 = none)
    #[arg(long)]
    pub write_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Action,
}

/// Operation to run against the server
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Action {
    /// List keys matching pattern
    Keys {
        /// `*` for all keys, otherwise a substring (`*` characters ignored)
        pattern: String,
    },
    /// Get value for a key
    Get { key: String },
    /// Set a key-value pair
    Set {
        key: String,
        value: String,
        /// Expiry in seconds (0 = never)
        #[arg(default_value_t = 0)]
        expiry: i64,
    },
    /// Delete a key
    #[command(aliases = ["del", "rm"])]
    Delete { key: String },
    /// Show server statistics
    Stats {
        /// Statistics group, e.g. items or slabs
        kind: Option<String>,
    },
    /// Dump cache from slab
    #[command(alias = "dump")]
    Cachedump {
        slab_id: String,
        /// Maximum items (0 = server default)
        #[arg(default_value_t = 0)]
        limit: u32,
    },
    /// List all slab IDs
    Slabs,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Read timeout in seconds (0 = none)
    #[serde(default)]
    pub read_timeout: u64,
    /// Write timeout in seconds (0 = none)
    #[serde(default)]
    pub write_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout: default_connect_timeout(),
            read_timeout: 0,
            write_timeout: 0,
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

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    11211
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Resolve configuration from parsed CLI args, the optional TOML file
    /// and the process environment.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config, |name| std::env::var(name).ok())
    }

    /// Merge sources. `env` looks up an environment variable by name.
    pub fn resolve<F>(cli: &CliArgs, toml_config: TomlConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = toml_config.server;
        let mut host = server.host;
        let mut port = server.port;

        if let Some(env_host) = env("MEMCACHED_HOST").filter(|h| !h.is_empty()) {
            host = env_host;
        }
        // An unparsable port in the environment is ignored.
        if let Some(env_port) = env("MEMCACHED_PORT").and_then(|p| p.parse().ok()) {
            port = env_port;
        }

        if let Some(ref server_addr) = cli.server {
            let (server_host, server_port) = split_host_port(server_addr)?;
            host = server_host;
            port = server_port;
        }

        if let Some(ref cli_host) = cli.host {
            host = cli_host.clone();
        }
        if let Some(cli_port) = cli.port {
            port = cli_port;
        }

        let connect_secs = cli.connect_timeout.unwrap_or(server.connect_timeout);
        if connect_secs == 0 {
            return Err(ConfigError::Invalid(
                "connect timeout must be at least 1 second".to_string(),
            ));
        }

        Ok(Config {
            host,
            port,
            connect_timeout: Duration::from_secs(connect_secs),
            read_timeout: optional_secs(cli.read_timeout.unwrap_or(server.read_timeout)),
            write_timeout: optional_secs(cli.write_timeout.unwrap_or(server.write_timeout)),
            log_level: cli
                .log_level
                .clone()
                .unwrap_or(toml_config.logging.level),
        })
    }

    /// Socket options for [`Client::connect_with`](crate::Client::connect_with).
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }
}

fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Split `host:port`, accepting `[v6addr]:port`.
fn split_host_port(addr: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::InvalidServer(addr.to_string());
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid server address: {0}")]
    InvalidServer(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
