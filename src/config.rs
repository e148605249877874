//! Configuration module for cmdrelay.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use path_clean::PathClean;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which side of the connection this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instance {
    Server,
    Client,
}

/// Network protocol used for listening and dialing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "cmdrelay")]
#[command(author = "cmdrelay authors")]
#[command(version = "0.1.0")]
#[command(about = "Line-oriented command server with chat relay", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Boot up either a server or a client
    #[arg(short, long, value_enum)]
    pub instance: Option<Instance>,

    /// Network protocol
    #[arg(short, long, value_enum)]
    pub network: Option<Network>,

    /// Address to listen on (server) or connect to (client)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Port to listen on or connect to; may be repeated
    #[arg(short, long = "port")]
    pub ports: Vec<u16>,

    /// Initial working directory handed to every peer
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Delay between the phases of the :echo command, in milliseconds
    #[arg(long)]
    pub echo_delay_ms: Option<u64>,

    /// Maximum number of concurrent peers
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub instance: Option<Instance>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_network")]
    pub network: Network,
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    pub root: Option<PathBuf>,
    #[serde(default = "default_echo_delay_ms")]
    pub echo_delay_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            address: default_address(),
            ports: default_ports(),
            root: None,
            echo_delay_ms: default_echo_delay_ms(),
            max_connections: default_max_connections(),
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

fn default_network() -> Network {
    Network::Tcp
}

fn default_address() -> String {
    "localhost".to_string()
}

fn default_ports() -> Vec<u16> {
    vec![8080]
}

fn default_echo_delay_ms() -> u64 {
    2000
}

fn default_max_connections() -> usize {
    10000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub instance: Instance,
    pub network: Network,
    pub address: String,
    pub ports: Vec<u16>,
    pub root: PathBuf,
    pub echo_delay: Duration,
    pub max_connections: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    /// Merge already-parsed CLI args with the TOML file they point at.
    /// CLI arguments take precedence over TOML file values.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let ports = if cli.ports.is_empty() {
            toml_config.server.ports
        } else {
            cli.ports
        };
        if ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }

        // Peers report their directory as an absolute path.
        let root = match cli.root.or(toml_config.server.root) {
            Some(root) if root.is_absolute() => root.clean(),
            Some(root) => std::env::current_dir()
                .map_err(ConfigError::WorkingDir)?
                .join(root)
                .clean(),
            None => std::env::current_dir().map_err(ConfigError::WorkingDir)?,
        };

        Ok(Config {
            instance: cli
                .instance
                .or(toml_config.instance)
                .unwrap_or(Instance::Server),
            network: cli.network.unwrap_or(toml_config.server.network),
            address: cli.address.unwrap_or(toml_config.server.address),
            ports,
            root,
            echo_delay: Duration::from_millis(
                cli.echo_delay_ms
                    .unwrap_or(toml_config.server.echo_delay_ms),
            ),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// `address:port` strings for every configured port.
    pub fn endpoints(&self) -> Vec<String> {
        self.ports
            .iter()
            .map(|port| format!("{}:{}", self.address, port))
            .collect()
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    WorkingDir(std::io::Error),
    NoPorts,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::WorkingDir(e) => {
                write!(f, "Failed to determine working directory: {}", e)
            }
            ConfigError::NoPorts => write!(f, "No port configured"),
        }
    }
}

impl std::error::Error for ConfigError {}
