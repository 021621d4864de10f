//! Configuration model for fwkeeper
//!
//! The configuration file is TOML with two keys: a `logs` table and a list
//! of `[[forwards]]` entries. Loading validates the document far enough
//! that the supervisor can assume well-formed names and port literals and
//! exclusive local ports.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PortPair, ResourceRef};

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("config file not found: {0:?}")]
    NotFound(PathBuf),

    /// Config file could not be read
    #[error("cannot read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The document parsed but the content is invalid
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// One of "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// Human-readable multi-line output instead of compact lines
    pub pretty: bool,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            pretty: false,
        }
    }
}

impl LogsConfig {
    /// The configured level if it is a known level name, "info" otherwise
    pub fn effective_level(&self) -> &str {
        match self.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => &self.level,
            _ => "info",
        }
    }
}

/// One declared forward, as decoded from the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Unique name of the forward
    pub name: String,
    /// Namespace of the target workload
    pub namespace: String,
    /// `pod-name` or `kind/name` resource reference
    pub resource: String,
    /// Declared port mappings (`"P"` or `"L:R"`)
    pub ports: Vec<String>,
}

/// The whole configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logs: LogsConfig,
    pub forwards: Vec<ForwardConfig>,
}

/// Load and validate a configuration file
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Validate a decoded configuration.
///
/// Checks: non-empty unique names, non-empty port lists, well-formed port
/// literals, parseable resource references, and no local port claimed by
/// more than one forward.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut names: HashSet<&str> = HashSet::new();
    let mut local_ports: HashSet<u16> = HashSet::new();

    for fwd in &config.forwards {
        if fwd.name.is_empty() {
            return Err(ConfigError::Invalid(
                "each forward must have a name".to_string(),
            ));
        }
        if !names.insert(&fwd.name) {
            return Err(ConfigError::Invalid(format!(
                "duplicate forward name: {}",
                fwd.name
            )));
        }

        fwd.resource.parse::<ResourceRef>().map_err(|err| {
            ConfigError::Invalid(format!("forward {}: {err}", fwd.name))
        })?;

        if fwd.ports.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "forward {} declares no ports",
                fwd.name
            )));
        }

        for port in &fwd.ports {
            let pair = PortPair::parse(port).map_err(|_| {
                ConfigError::Invalid(format!(
                    "invalid port specification in forward {}: {}",
                    fwd.name, port
                ))
            })?;
            if !local_ports.insert(pair.local) {
                return Err(ConfigError::Invalid(format!(
                    "local port {} is declared more than once (forward {})",
                    pair.local, fwd.name
                )));
            }
        }
    }

    Ok(())
}
