use std::io::ErrorKind;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use thiserror::Error;

use crate::catalog::{EnumDescriptor, TypeDescriptor};

#[derive(Parser, Debug)]
#[command(name = "tally", about = "Tally - schema tooling for temporal record stores")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "tally.toml")]
    pub config: String,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Database URL or SQLite path (overrides config file)
    #[arg(short, long)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Lists the differences between the configured types and the live schema
    Validate,
    /// Applies corrective statements, then validates again
    Update,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub enums: Vec<EnumDescriptor>,

    #[serde(default)]
    pub types: Vec<TypeDescriptor>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: Backend,

    /// SQLite file path or `:memory:`, or a PostgreSQL connection string.
    #[serde(default = "default_database_url")]
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            backend: Backend::default(),
            url: default_database_url(),
        }
    }
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
    }
}

fn default_database_url() -> String {
    "tally.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig::default(),
            logging: default_logging(),
            enums: Vec::new(),
            types: Vec::new(),
        }
    }
}

impl Config {
    /// Reads the config file named on the command line. A missing file yields the defaults.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => Self::parse(&cli.config, &contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Config::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: cli.config.clone(),
                    source,
                })
            }
        };

        // CLI overrides
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref url) = cli.database_url {
            config.database.url = url.clone();
        }

        Ok(config)
    }

    pub fn parse(path: &str, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}
