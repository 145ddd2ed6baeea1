//! SSH command channel.
//!
//! Uses `tokio::process::Command` to shell out to `ssh`. Host keys are not
//! checked: machines are ephemeral and get new keys on every provision.
//! Authentication is key based (`BatchMode=yes`), no password prompts.

use super::{ChannelError, CommandChannel, CommandOutput};
use crate::config::SshConfig;
use async_trait::async_trait;
use std::path::PathBuf;

/// `ssh` exits with 255 when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Remote end of an SSH channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Host name or IP address.
    pub host: String,
    /// SSH username.
    pub user: String,
    /// SSH port.
    pub port: u16,
}

impl SshTarget {
    /// Create a target.
    pub fn new(host: impl Into<String>, user: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port,
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Command channel backed by the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshChannel {
    target: SshTarget,
    identity_file: Option<PathBuf>,
    connect_timeout_secs: u64,
}

impl SshChannel {
    /// Create a channel to `target` using the connection settings in `config`.
    pub fn new(target: SshTarget, config: &SshConfig) -> Self {
        Self {
            target,
            identity_file: config.identity_file.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }

    /// The remote end.
    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    /// Arguments passed to `ssh` for `command`.
    fn args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.target.port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args.push(self.target.destination());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl CommandChannel for SshChannel {
    async fn run(&self, command: &str) -> Result<CommandOutput, ChannelError> {
        tracing::trace!(target = %self.target.destination(), command, "ssh exec");

        // kill_on_drop: a caller-side timeout drops this future and must not
        // leave the ssh process behind.
        let output = tokio::process::Command::new("ssh")
            .args(self.args(command))
            .kill_on_drop(true)
            .output()
            .await?;

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == SSH_CONNECTION_FAILURE {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ChannelError::ConnectionLost(format!(
                "{}: {}",
                self.target.destination(),
                stderr
            )));
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
        })
    }

    fn address(&self) -> String {
        format!("{}:{}", self.target.destination(), self.target.port)
    }
}
