//! Configuration module for the delim-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

use crate::protocols::delimited::DEFAULT_DELIMITER;

/// Which I/O runtime serves connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// One tokio task per connection.
    Tokio,
    /// mio event loop per worker thread (epoll/kqueue).
    Mio,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "delim-echo")]
#[command(author = "delim-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A delimiter-framed command/echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// I/O runtime
    #[arg(short, long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Number of worker threads (0 = number of CPU cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Frame delimiter: a single ASCII character or a hex byte such as 0x3B
    #[arg(short, long)]
    pub delimiter: Option<String>,

    /// Maximum size in bytes of an unterminated frame (0 = unlimited)
    #[arg(long)]
    pub max_buffer_size: Option<usize>,

    /// Bytes requested per socket read
    #[arg(long)]
    pub read_buffer_size: Option<usize>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
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
    #[serde(default = "default_runtime")]
    pub runtime: RuntimeType,
    /// Number of worker threads
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            runtime: default_runtime(),
            workers: 0,
            max_connections: default_max_connections(),
        }
    }
}

/// Framing-related configuration
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Maximum unterminated frame size in bytes
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Idle timeout in seconds
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            max_buffer_size: default_max_buffer_size(),
            read_buffer_size: default_read_buffer_size(),
            idle_timeout: 0,
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
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1234
}

fn default_runtime() -> RuntimeType {
    RuntimeType::Tokio
}

fn default_max_connections() -> usize {
    10000
}

fn default_delimiter() -> String {
    (DEFAULT_DELIMITER as char).to_string()
}

fn default_max_buffer_size() -> usize {
    1024 * 1024 // 1 MB
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub runtime: RuntimeType,
    pub workers: usize,
    pub max_connections: usize,
    pub delimiter: u8,
    pub max_buffer_size: usize,
    pub read_buffer_size: usize,
    pub idle_timeout: u64,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let delimiter = cli
            .delimiter
            .as_deref()
            .unwrap_or(toml_config.protocol.delimiter.as_str());
        let delimiter = parse_delimiter(delimiter)?;

        let read_buffer_size = cli
            .read_buffer_size
            .unwrap_or(toml_config.protocol.read_buffer_size);
        if read_buffer_size == 0 {
            return Err(ConfigError::InvalidValue(
                "read_buffer_size must be greater than 0",
            ));
        }

        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "max_connections must be greater than 0",
            ));
        }

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            runtime: cli.runtime.unwrap_or(toml_config.server.runtime),
            workers: cli.workers.unwrap_or(toml_config.server.workers),
            max_connections,
            delimiter,
            max_buffer_size: cli
                .max_buffer_size
                .unwrap_or(toml_config.protocol.max_buffer_size),
            read_buffer_size,
            idle_timeout: cli
                .idle_timeout
                .unwrap_or(toml_config.protocol.idle_timeout),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// `host:port` as given.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse a delimiter written as one ASCII character or `0xNN`.
fn parse_delimiter(s: &str) -> Result<u8, ConfigError> {
    if let [byte] = s.as_bytes() {
        if byte.is_ascii() {
            return Ok(*byte);
        }
    }

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if let Ok(byte) = u8::from_str_radix(hex, 16) {
            return Ok(byte);
        }
    }

    Err(ConfigError::InvalidDelimiter(s.to_string()))
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid delimiter '{0}': expected one ASCII character or a hex byte like 0x3B")]
    InvalidDelimiter(String),
    #[error("Invalid configuration: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 1234);
        assert_eq!(config.server.runtime, RuntimeType::Tokio);
        assert_eq!(config.protocol.delimiter, ";");
        assert_eq!(config.protocol.max_buffer_size, 1024 * 1024);
        assert_eq!(config.protocol.read_buffer_size, 1024);
        assert_eq!(config.protocol.idle_timeout, 0);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 4000
            runtime = "mio"
            workers = 4

            [protocol]
            delimiter = "0x0A"
            max_buffer_size = 0
            idle_timeout = 30

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.runtime, RuntimeType::Mio);
        assert_eq!(config.server.workers, 4);
        assert_eq!(config.server.max_connections, 10000);
        assert_eq!(config.protocol.delimiter, "0x0A");
        assert_eq!(config.protocol.max_buffer_size, 0);
        assert_eq!(config.protocol.read_buffer_size, 1024);
        assert_eq!(config.protocol.idle_timeout, 30);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_resolve_defaults() {
        let config = Config::resolve(CliArgs::parse_from(["delim-echo"])).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:1234");
        assert_eq!(config.delimiter, b';');
        assert_eq!(config.runtime, RuntimeType::Tokio);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_overrides() {
        let cli = CliArgs::parse_from([
            "delim-echo",
            "--host",
            "127.0.0.1",
            "-p",
            "9000",
            "-r",
            "mio",
            "-d",
            "|",
            "--idle-timeout",
            "5",
            "--log-level",
            "trace",
        ]);
        let config = Config::resolve(cli).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
        assert_eq!(config.runtime, RuntimeType::Mio);
        assert_eq!(config.delimiter, b'|');
        assert_eq!(config.idle_timeout, 5);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert_eq!(parse_delimiter("0x3B").unwrap(), b';');
        assert_eq!(parse_delimiter("0x00").unwrap(), 0);
        assert!(matches!(
            parse_delimiter(";;"),
            Err(ConfigError::InvalidDelimiter(_))
        ));
        assert!(matches!(
            parse_delimiter(""),
            Err(ConfigError::InvalidDelimiter(_))
        ));
        assert!(matches!(
            parse_delimiter("é"),
            Err(ConfigError::InvalidDelimiter(_))
        ));
        assert!(matches!(
            parse_delimiter("0xZZ"),
            Err(ConfigError::InvalidDelimiter(_))
        ));
    }

    #[test]
    fn test_zero_read_buffer_rejected() {
        let cli = CliArgs::parse_from(["delim-echo", "--read-buffer-size", "0"]);
        assert!(matches!(
            Config::resolve(cli),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
