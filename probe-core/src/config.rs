//! Configuration sections consumed by probe-core.
//!
//! These are deserialized from the `[machine]`, `[ssh]` and `[pool]`
//! sections of the vmprobe TOML file. Every field has a default.

use crate::channel::DEFAULT_REBOOT_COMMAND;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Per-machine command and reboot limits.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    /// Upper bound for one remote command in seconds (default: 300).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Upper bound for a whole reboot, from issuing it until the new boot
    /// answers, in seconds (default: 600). Also bounds the first readiness wait.
    #[serde(default = "default_reboot_timeout_secs")]
    pub reboot_timeout_secs: u64,
    /// First delay between reboot polls in milliseconds (default: 500).
    #[serde(default = "default_reboot_poll_initial_ms")]
    pub reboot_poll_initial_ms: u64,
    /// Cap for the doubling delay between reboot polls in milliseconds (default: 10000).
    #[serde(default = "default_reboot_poll_max_ms")]
    pub reboot_poll_max_ms: u64,
    /// Command that triggers a reboot (default: `sudo systemctl reboot`).
    #[serde(default = "default_reboot_command")]
    pub reboot_command: String,
}

impl MachineConfig {
    /// Upper bound for one remote command.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Upper bound for a whole reboot.
    pub fn reboot_timeout(&self) -> Duration {
        Duration::from_secs(self.reboot_timeout_secs)
    }

    /// First delay between reboot polls.
    pub fn reboot_poll_initial(&self) -> Duration {
        Duration::from_millis(self.reboot_poll_initial_ms)
    }

    /// Cap for the delay between reboot polls.
    pub fn reboot_poll_max(&self) -> Duration {
        Duration::from_millis(self.reboot_poll_max_ms.max(self.reboot_poll_initial_ms))
    }
}

/// SSH connection settings shared by all SSH-reached machines.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Login user (default: `core`).
    #[serde(default = "default_ssh_user")]
    pub user: String,
    /// Port (default: 22).
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Private key passed with `-i` (optional, ssh defaults otherwise).
    pub identity_file: Option<PathBuf>,
    /// `ConnectTimeout` in seconds (default: 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Pre-existing hosts leased by the static pool backend.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Platform id the pool answers for (default: `qemu-unpriv`).
    #[serde(default = "default_pool_platform")]
    pub platform: String,
    /// Hosts in the pool.
    #[serde(default)]
    pub hosts: Vec<PoolHost>,
}

/// One host in the static pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolHost {
    /// Host name or IP address.
    pub host: String,
    /// Overrides `[ssh] user`.
    pub user: Option<String>,
    /// Overrides `[ssh] port`.
    pub port: Option<u16>,
    /// The host boots from a multipath-capable disk.
    #[serde(default)]
    pub multipath_disk: bool,
}

// Default value functions
fn default_command_timeout_secs() -> u64 {
    300
}

fn default_reboot_timeout_secs() -> u64 {
    600
}

fn default_reboot_poll_initial_ms() -> u64 {
    500
}

fn default_reboot_poll_max_ms() -> u64 {
    10_000
}

fn default_reboot_command() -> String {
    DEFAULT_REBOOT_COMMAND.to_string()
}

fn default_ssh_user() -> String {
    "core".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_pool_platform() -> String {
    probe_types::PlatformId::QEMU_UNPRIV.to_string()
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            reboot_timeout_secs: default_reboot_timeout_secs(),
            reboot_poll_initial_ms: default_reboot_poll_initial_ms(),
            reboot_poll_max_ms: default_reboot_poll_max_ms(),
            reboot_command: default_reboot_command(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            platform: default_pool_platform(),
            hosts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_defaults() {
        let config = MachineConfig::default();
        assert_eq!(config.command_timeout(), Duration::from_secs(300));
        assert_eq!(config.reboot_timeout(), Duration::from_secs(600));
        assert_eq!(config.reboot_poll_initial(), Duration::from_millis(500));
        assert_eq!(config.reboot_command, "sudo systemctl reboot");
    }

    #[test]
    fn poll_max_never_below_initial() {
        let config = MachineConfig {
            reboot_poll_initial_ms: 2000,
            reboot_poll_max_ms: 100,
            ..MachineConfig::default()
        };
        assert_eq!(config.reboot_poll_max(), Duration::from_millis(2000));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: MachineConfig = toml::from_str("reboot_timeout_secs = 60").unwrap();
        assert_eq!(config.reboot_timeout_secs, 60);
        assert_eq!(config.command_timeout_secs, 300);

        let ssh: SshConfig = toml::from_str("").unwrap();
        assert_eq!(ssh.user, "core");
        assert_eq!(ssh.port, 22);
    }

    #[test]
    fn pool_from_toml() {
        let toml = r#"
platform = "metal"

[[hosts]]
host = "10.0.0.1"
multipath_disk = true

[[hosts]]
host = "10.0.0.2"
user = "admin"
port = 2222
"#;
        let pool: PoolConfig = toml::from_str(toml).unwrap();
        assert_eq!(pool.platform, "metal");
        assert_eq!(pool.hosts.len(), 2);
        assert!(pool.hosts[0].multipath_disk);
        assert_eq!(pool.hosts[1].user.as_deref(), Some("admin"));
        assert_eq!(pool.hosts[1].port, Some(2222));
        assert!(!pool.hosts[1].multipath_disk);
    }
}
