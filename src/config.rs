//! Server configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Optional TOML file (`--config`)
//! 3. `BUILD_PROXY_*` environment variables
//! 4. CLI flags (applied by the binary)

use serde::Deserialize;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default bound for each of the three waits.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Upper bound accepted for any configured timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);

pub const ENV_BIND: &str = "BUILD_PROXY_BIND";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "BUILD_PROXY_CONNECT_TIMEOUT_MS";
pub const ENV_PARAMETERS_TIMEOUT_MS: &str = "BUILD_PROXY_PARAMETERS_TIMEOUT_MS";
pub const ENV_ACK_TIMEOUT_MS: &str = "BUILD_PROXY_ACK_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("{name} of {} ms exceeds the maximum of {} ms", value.as_millis(), MAX_TIMEOUT.as_millis())]
    TimeoutTooLong { name: &'static str, value: Duration },
}

/// Effective server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    /// `0` binds an ephemeral port.
    pub port: u16,
    pub connect_timeout: Duration,
    pub parameters_timeout: Duration,
    pub ack_timeout: Duration,
    /// Defaults to the current working directory.
    pub project_dir: Option<PathBuf>,
    /// Build tool executable to run instead of the discovered one.
    pub gradle_command: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            connect_timeout: DEFAULT_TIMEOUT,
            parameters_timeout: DEFAULT_TIMEOUT,
            ack_timeout: DEFAULT_TIMEOUT,
            project_dir: None,
            gradle_command: None,
        }
    }
}

/// Contents of a TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub bind_address: Option<IpAddr>,
    pub port: Option<u16>,
    pub connect_timeout_ms: Option<u64>,
    pub parameters_timeout_ms: Option<u64>,
    pub ack_timeout_ms: Option<u64>,
    pub project_dir: Option<PathBuf>,
    pub gradle_command: Option<PathBuf>,
}

impl ConfigFile {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ServerConfig {
    /// Overlay the keys present in `file`.
    pub fn apply_file(&mut self, file: ConfigFile) {
        if let Some(bind_address) = file.bind_address {
            self.bind_address = bind_address;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(ms) = file.connect_timeout_ms {
            self.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.parameters_timeout_ms {
            self.parameters_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.ack_timeout_ms {
            self.ack_timeout = Duration::from_millis(ms);
        }
        if file.project_dir.is_some() {
            self.project_dir = file.project_dir;
        }
        if file.gradle_command.is_some() {
            self.gradle_command = file.gradle_command;
        }
    }

    /// Overlay `BUILD_PROXY_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_BIND) {
            self.bind_address = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_BIND,
                value,
            })?;
        }
        if let Some(timeout) = env_millis(&lookup, ENV_CONNECT_TIMEOUT_MS)? {
            self.connect_timeout = timeout;
        }
        if let Some(timeout) = env_millis(&lookup, ENV_PARAMETERS_TIMEOUT_MS)? {
            self.parameters_timeout = timeout;
        }
        if let Some(timeout) = env_millis(&lookup, ENV_ACK_TIMEOUT_MS)? {
            self.ack_timeout = timeout;
        }
        Ok(())
    }

    /// Overlay the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("parameters_timeout", self.parameters_timeout),
            ("ack_timeout", self.ack_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroTimeout(name));
            }
            if value > MAX_TIMEOUT {
                return Err(ConfigError::TimeoutTooLong { name, value });
            }
        }
        Ok(())
    }

    /// The project directory as an absolute, canonical path.
    pub fn resolve_project_dir(&self) -> io::Result<PathBuf> {
        match &self.project_dir {
            Some(dir) => fs::canonicalize(dir),
            None => fs::canonicalize(std::env::current_dir()?),
        }
    }
}

fn env_millis<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
    }
}
