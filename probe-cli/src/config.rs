//! Configuration loading for vmprobe.
//!
//! Configuration is loaded from a TOML file (default: `vmprobe.toml` in the
//! working directory, if present). Every section and field is optional.

use probe_core::{Arch, MachineConfig, PlatformId, PoolConfig, RunnerOptions, SshConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "vmprobe.toml";

/// Root configuration for vmprobe.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Run selection and scheduling.
    #[serde(default)]
    pub run: RunConfig,
    /// Per-machine command and reboot limits.
    #[serde(default)]
    pub machine: MachineConfig,
    /// SSH settings for pool hosts.
    #[serde(default)]
    pub ssh: SshConfig,
    /// Static host pool.
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Tests executed at once (default: 1).
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    /// Target platform (default: `qemu-unpriv`).
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Target architecture (default: the host's).
    #[serde(default = "default_arch")]
    pub arch: String,
    /// Timeout for tests that do not declare one, in seconds (default: 1800).
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Extra attempts for tests ending in an infrastructure error (default: 0).
    #[serde(default)]
    pub infra_retries: u32,
}

fn default_parallel() -> usize {
    1
}

fn default_platform() -> String {
    PlatformId::QEMU_UNPRIV.to_string()
}

fn default_arch() -> String {
    Arch::host().as_str().to_string()
}

fn default_timeout_secs() -> u64 {
    probe_core::DEFAULT_TEST_TIMEOUT.as_secs()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            platform: default_platform(),
            arch: default_arch(),
            default_timeout_secs: default_timeout_secs(),
            infra_retries: 0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load `path` if given, else `vmprobe.toml` if it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Target platform.
    pub fn platform(&self) -> PlatformId {
        PlatformId::new(self.run.platform.clone())
    }

    /// Target architecture.
    pub fn arch(&self) -> Arch {
        Arch::new(self.run.arch.clone())
    }

    /// Runner settings derived from `[run]` and `[machine]`.
    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            parallel: self.run.parallel.max(1),
            default_timeout: Duration::from_secs(self.run.default_timeout_secs),
            platform: self.platform(),
            machine: self.machine.clone(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
