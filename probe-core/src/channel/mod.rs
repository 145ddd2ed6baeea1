//! Remote command channel abstraction.
//!
//! A channel runs one shell command on a remote machine and returns its
//! output. Implementations hide the transport:
//! - [`SshChannel`] shells out to the system `ssh` client
//! - [`MockChannel`] simulates a machine in-process, including reboots
//!
//! Channels are stateless from the caller's point of view: every `run()`
//! establishes whatever connection it needs, so a channel keeps working
//! across reboots of the remote machine.

mod mock;
mod ssh;

pub use mock::{MockChannel, MockReply};
pub use ssh::{SshChannel, SshTarget};

use async_trait::async_trait;
use thiserror::Error;

/// Reads the kernel's per-boot random identifier.
pub const BOOT_ID_COMMAND: &str = "cat /proc/sys/kernel/random/boot_id";

/// Reboot command issued when none is configured.
pub const DEFAULT_REBOOT_COMMAND: &str = "sudo systemctl reboot";

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The connection could not be established or dropped mid-command.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The local transport process could not be started.
    #[error("failed to spawn transport: {0}")]
    Spawn(#[from] std::io::Error),

    /// The transport gave up waiting.
    #[error("channel timeout")]
    Timeout,
}

/// Output of a command that ran to completion on the remote side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: Vec<u8>,
    /// Standard error.
    pub stderr: Vec<u8>,
    /// Exit code (0 = success).
    pub exit_code: i32,
}

impl CommandOutput {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard error decoded lossily, trimmed.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Runs shell commands on one remote machine.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Run `command` and wait for it to finish.
    ///
    /// A non-zero exit status is not an error at this level: it is reported
    /// in [`CommandOutput::exit_code`].
    async fn run(&self, command: &str) -> Result<CommandOutput, ChannelError>;

    /// Human-readable address of the remote end, for logs.
    fn address(&self) -> String;
}
