//! Mock command channel for testing.
//!
//! Simulates one machine: scripted command replies, a boot identifier that
//! changes on every completed reboot, and replies staged to take effect
//! only after the next boot. Reboots go through three phases, each with a
//! configurable length counted in commands:
//!
//! 1. shutting down: the old boot still answers (`stale_polls`)
//! 2. down: every command fails with `ConnectionLost` (`offline_polls`)
//! 3. up: the boot id changes and staged replies are applied

use super::{ChannelError, CommandChannel, CommandOutput, BOOT_ID_COMMAND, DEFAULT_REBOOT_COMMAND};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A scripted reply to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Exit 0 with this standard output.
    Stdout(String),
    /// Exit with a non-zero code.
    Exit {
        /// Exit code.
        code: i32,
        /// Standard error.
        stderr: String,
    },
}

impl MockReply {
    fn to_output(&self) -> CommandOutput {
        match self {
            Self::Stdout(stdout) => CommandOutput {
                stdout: stdout.clone().into_bytes(),
                stderr: Vec::new(),
                exit_code: 0,
            },
            Self::Exit { code, stderr } => CommandOutput {
                stdout: Vec::new(),
                stderr: stderr.clone().into_bytes(),
                exit_code: *code,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Up,
    ShuttingDown { stale_left: u32 },
    Down { offline_left: u32 },
}

/// Mock channel for testing.
///
/// Cloning shares the simulated machine.
#[derive(Debug, Clone)]
pub struct MockChannel {
    inner: Arc<Mutex<MockChannelInner>>,
}

#[derive(Debug)]
struct MockChannelInner {
    address: String,
    boot: u64,
    reboots: u32,
    phase: Phase,
    reboot_command: String,
    stale_polls: u32,
    offline_polls: u32,
    stuck_after_reboot: bool,
    unreachable: bool,
    hang: bool,
    fail_next: Option<String>,
    replies: HashMap<String, MockReply>,
    after_reboot: HashMap<String, MockReply>,
    history: Vec<String>,
}

impl MockChannelInner {
    fn complete_boot(&mut self) {
        self.boot += 1;
        self.phase = Phase::Up;
        let staged: Vec<_> = self.after_reboot.drain().collect();
        self.replies.extend(staged);
    }

    fn answer(&mut self, command: &str) -> Result<CommandOutput, ChannelError> {
        if command == self.reboot_command {
            self.reboots += 1;
            self.phase = Phase::ShuttingDown {
                stale_left: self.stale_polls,
            };
            return Err(ChannelError::ConnectionLost(format!(
                "connection to {} closed by remote host",
                self.address
            )));
        }

        if command == BOOT_ID_COMMAND {
            return Ok(MockReply::Stdout(format!("mock-boot-{}\n", self.boot)).to_output());
        }

        Ok(self
            .replies
            .get(command)
            .cloned()
            .unwrap_or_else(|| MockReply::Exit {
                code: 127,
                stderr: format!("mock: no reply scripted for {command:?}"),
            })
            .to_output())
    }
}

impl MockChannel {
    /// Create a new mock channel with a machine that is up.
    pub fn new() -> Self {
        Self::with_address("mock")
    }

    /// Create a new mock channel reporting `address` in logs.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockChannelInner {
                address: address.into(),
                boot: 0,
                reboots: 0,
                phase: Phase::Up,
                reboot_command: DEFAULT_REBOOT_COMMAND.to_string(),
                stale_polls: 0,
                offline_polls: 1,
                stuck_after_reboot: false,
                unreachable: false,
                hang: false,
                fail_next: None,
                replies: HashMap::new(),
                after_reboot: HashMap::new(),
                history: Vec::new(),
            })),
        }
    }

    /// Reply to `command` with exit 0 and `stdout`.
    pub fn respond(&self, command: &str, stdout: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .replies
            .insert(command.to_string(), MockReply::Stdout(stdout.to_string()));
    }

    /// Reply to `command` with a non-zero exit.
    pub fn respond_exit(&self, command: &str, code: i32, stderr: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.replies.insert(
            command.to_string(),
            MockReply::Exit {
                code,
                stderr: stderr.to_string(),
            },
        );
    }

    /// Reply to `command` with `stdout`, but only once the next reboot completes.
    pub fn respond_after_reboot(&self, command: &str, stdout: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .after_reboot
            .insert(command.to_string(), MockReply::Stdout(stdout.to_string()));
    }

    /// Command treated as a reboot request.
    pub fn set_reboot_command(&self, command: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.reboot_command = command.to_string();
    }

    /// Commands still answered by the old boot after a reboot request.
    pub fn set_stale_polls(&self, polls: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.stale_polls = polls;
    }

    /// Commands refused while the machine is down during a reboot.
    pub fn set_offline_polls(&self, polls: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.offline_polls = polls;
    }

    /// Never come back after the next reboot.
    pub fn stick_after_reboot(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stuck_after_reboot = true;
    }

    /// Refuse every connection until set back to false.
    pub fn set_unreachable(&self, unreachable: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.unreachable = unreachable;
    }

    /// Make every subsequent command hang forever.
    pub fn hang_commands(&self, hang: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.hang = hang;
    }

    /// Cause the next command to fail with `ConnectionLost`.
    pub fn fail_next(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next = Some(error.to_string());
    }

    /// Number of completed boots after the initial one.
    pub fn boot_count(&self) -> u64 {
        self.inner.lock().unwrap().boot
    }

    /// Number of reboot requests received.
    pub fn reboot_requests(&self) -> u32 {
        self.inner.lock().unwrap().reboots
    }

    /// Every command received, in order.
    pub fn history(&self) -> Vec<String> {
        self.inner.lock().unwrap().history.clone()
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandChannel for MockChannel {
    async fn run(&self, command: &str) -> Result<CommandOutput, ChannelError> {
        let hang = {
            let mut inner = self.inner.lock().unwrap();
            inner.history.push(command.to_string());

            if let Some(error) = inner.fail_next.take() {
                return Err(ChannelError::ConnectionLost(error));
            }
            if inner.unreachable {
                return Err(ChannelError::ConnectionLost(format!(
                    "connect to {}: connection timed out",
                    inner.address
                )));
            }
            inner.hang
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut inner = self.inner.lock().unwrap();

        if inner.phase == (Phase::ShuttingDown { stale_left: 0 }) {
            inner.phase = Phase::Down {
                offline_left: inner.offline_polls,
            };
        }

        match inner.phase {
            Phase::Up => {}
            Phase::ShuttingDown { stale_left } => {
                inner.phase = Phase::ShuttingDown {
                    stale_left: stale_left - 1,
                };
            }
            Phase::Down { .. } if inner.stuck_after_reboot => {
                return Err(ChannelError::ConnectionLost(format!(
                    "connect to {}: no route to host",
                    inner.address
                )));
            }
            Phase::Down { offline_left } if offline_left > 0 => {
                inner.phase = Phase::Down {
                    offline_left: offline_left - 1,
                };
                return Err(ChannelError::ConnectionLost(format!(
                    "connect to {}: connection refused",
                    inner.address
                )));
            }
            Phase::Down { .. } => inner.complete_boot(),
        }

        inner.answer(command)
    }

    fn address(&self) -> String {
        self.inner.lock().unwrap().address.clone()
    }
}
