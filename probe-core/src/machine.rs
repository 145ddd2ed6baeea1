//! Handle to one provisioned machine.
//!
//! A [`Machine`] wraps a command channel with the harness's rules:
//! - every command is bounded by `command_timeout`
//! - no command is issued once the machine is terminated, and commands
//!   in flight when it is terminated resolve with `ConnectionLost`
//! - `reboot()` returns only once the machine answers from a new boot

use crate::channel::{ChannelError, CommandChannel, BOOT_ID_COMMAND};
use crate::config::MachineConfig;
use crate::provision::{DiskSpec, ProvisionedMachine};
use probe_types::{MachineId, MachineState, PlatformId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Errors from running commands on a machine.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// The channel dropped, could not connect, or the machine was terminated.
    #[error("connection to machine {machine} lost: {detail}")]
    ConnectionLost {
        /// Target machine.
        machine: MachineId,
        /// Transport detail.
        detail: String,
    },

    /// The command ran and exited non-zero.
    #[error("command {command:?} on machine {machine} exited with status {code}: {stderr}")]
    NonZeroExit {
        /// Target machine.
        machine: MachineId,
        /// The command as issued.
        command: String,
        /// Exit code.
        code: i32,
        /// Standard error, trimmed.
        stderr: String,
    },

    /// The operation did not finish in time.
    #[error("{operation} on machine {machine} timed out after {after:?}")]
    Timeout {
        /// Target machine.
        machine: MachineId,
        /// What was being waited for.
        operation: String,
        /// The bound that was exceeded.
        after: Duration,
    },
}

impl CommandError {
    /// True for failures of the environment rather than of the command.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, Self::NonZeroExit { .. })
    }
}

/// One provisioned machine, exclusively owned by its cluster.
pub struct Machine {
    id: MachineId,
    platform: PlatformId,
    disks: DiskSpec,
    channel: Arc<dyn CommandChannel>,
    config: MachineConfig,
    state: watch::Sender<MachineState>,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.id)
            .field("platform", &self.platform)
            .field("address", &self.channel.address())
            .field("state", &self.state())
            .finish()
    }
}

impl Machine {
    /// Wrap a machine returned by a provisioner. Starts in `Provisioning`.
    pub fn new(provisioned: ProvisionedMachine, config: MachineConfig) -> Self {
        let (state, _) = watch::channel(MachineState::Provisioning);
        Self {
            id: provisioned.id,
            platform: provisioned.platform,
            disks: provisioned.disks,
            channel: provisioned.channel,
            config,
            state,
        }
    }

    /// Machine identifier.
    pub fn id(&self) -> MachineId {
        self.id
    }

    /// Backend the machine came from.
    pub fn platform(&self) -> &PlatformId {
        &self.platform
    }

    /// Extra disks attached at provisioning time.
    pub fn disks(&self) -> DiskSpec {
        self.disks
    }

    /// Address of the remote end, for logs.
    pub fn address(&self) -> String {
        self.channel.address()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MachineState {
        *self.state.borrow()
    }

    /// Move to `next` unless the machine is already terminated.
    fn set_state(&self, next: MachineState) {
        let id = self.id;
        self.state.send_if_modified(|state| {
            if state.is_terminated() || *state == next {
                return false;
            }
            tracing::debug!(machine = %id, from = %state, to = %next, "machine state");
            *state = next;
            true
        });
    }

    /// Mark the machine terminated. Returns false if it already was.
    ///
    /// Commands in flight resolve with `ConnectionLost`; later commands are
    /// refused without touching the channel.
    pub(crate) fn terminate(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminated() {
                return false;
            }
            *state = MachineState::Terminated;
            true
        })
    }

    fn terminated_error(&self) -> CommandError {
        CommandError::ConnectionLost {
            machine: self.id,
            detail: "machine terminated".to_string(),
        }
    }

    /// Run `command` and return its standard output.
    ///
    /// Non-zero exit is [`CommandError::NonZeroExit`]; a channel failure is
    /// [`CommandError::ConnectionLost`]; exceeding the command timeout is
    /// [`CommandError::Timeout`].
    pub async fn run_command(&self, command: &str) -> Result<Vec<u8>, CommandError> {
        let mut state = self.state.subscribe();
        if state.borrow().is_terminated() {
            return Err(self.terminated_error());
        }

        let limit = self.config.command_timeout();
        tracing::debug!(machine = %self.id, command, "run command");

        let result = tokio::select! {
            result = tokio::time::timeout(limit, self.channel.run(command)) => result,
            _ = state.wait_for(|s| s.is_terminated()) => return Err(self.terminated_error()),
        };

        match result {
            Err(_) | Ok(Err(ChannelError::Timeout)) => Err(CommandError::Timeout {
                machine: self.id,
                operation: format!("command {command:?}"),
                after: limit,
            }),
            Ok(Err(e)) => Err(CommandError::ConnectionLost {
                machine: self.id,
                detail: e.to_string(),
            }),
            Ok(Ok(output)) if output.success() => Ok(output.stdout),
            Ok(Ok(output)) => Err(CommandError::NonZeroExit {
                machine: self.id,
                command: command.to_string(),
                code: output.exit_code,
                stderr: output.stderr_lossy(),
            }),
        }
    }

    /// Run `command` and return its standard output as trimmed text.
    pub async fn run_command_str(&self, command: &str) -> Result<String, CommandError> {
        let stdout = self.run_command(command).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// The kernel's boot identifier. Changes on every boot.
    pub async fn boot_id(&self) -> Result<String, CommandError> {
        self.run_command_str(BOOT_ID_COMMAND).await
    }

    /// Wait until the machine answers over its channel, then mark it ready.
    ///
    /// Called once by the cluster after provisioning.
    pub(crate) async fn wait_until_ready(&self) -> Result<(), CommandError> {
        let deadline = Instant::now() + self.config.reboot_timeout();
        self.wait_for_boot(None, deadline, "wait for machine to come up").await?;
        self.set_state(MachineState::Ready);
        Ok(())
    }

    /// Reboot and block until the machine answers from the new boot.
    ///
    /// The current boot id is recorded first; the call returns once a
    /// different one is read back, so any command issued afterwards runs
    /// against the new boot. Polling backs off exponentially from
    /// `reboot_poll_initial` to `reboot_poll_max`. Reading the old boot id,
    /// issuing the reboot command and polling all share one deadline:
    /// [`CommandError::Timeout`] is returned once `reboot_timeout` has
    /// elapsed since the call.
    pub async fn reboot(&self) -> Result<(), CommandError> {
        let deadline = Instant::now() + self.config.reboot_timeout();
        let previous = match tokio::time::timeout_at(deadline, self.boot_id()).await {
            Ok(boot_id) => boot_id?,
            Err(_) => return Err(self.timeout_error("reboot")),
        };
        tracing::info!(machine = %self.id, boot_id = %previous, "rebooting machine");
        self.set_state(MachineState::Rebooting);

        // The connection normally drops while the reboot command runs.
        let issued =
            tokio::time::timeout_at(deadline, self.run_command(&self.config.reboot_command)).await;
        match issued {
            Err(_) | Ok(Ok(_)) | Ok(Err(CommandError::Timeout { .. })) => {}
            Ok(Err(CommandError::ConnectionLost { .. })) if !self.state().is_terminated() => {}
            Ok(Err(e)) => {
                self.set_state(MachineState::Ready);
                return Err(e);
            }
        }

        self.wait_for_boot(Some(&previous), deadline, "reboot").await?;
        self.set_state(MachineState::Ready);
        tracing::info!(machine = %self.id, "machine back after reboot");
        Ok(())
    }

    fn timeout_error(&self, operation: &str) -> CommandError {
        CommandError::Timeout {
            machine: self.id,
            operation: operation.to_string(),
            after: self.config.reboot_timeout(),
        }
    }

    /// Poll the boot id until it reads back and differs from `previous`,
    /// giving up at `deadline`.
    async fn wait_for_boot(
        &self,
        previous: Option<&str>,
        deadline: Instant,
        operation: &str,
    ) -> Result<(), CommandError> {
        let max_delay = self.config.reboot_poll_max();
        let mut delay = self.config.reboot_poll_initial();

        loop {
            match tokio::time::timeout_at(deadline, self.boot_id()).await {
                Ok(Ok(boot_id)) if previous != Some(boot_id.as_str()) => {
                    tracing::debug!(machine = %self.id, %boot_id, "machine answering");
                    return Ok(());
                }
                Ok(Ok(_)) => {
                    tracing::debug!(machine = %self.id, "previous boot still answering");
                }
                Ok(Err(e)) if self.state().is_terminated() => return Err(e),
                Ok(Err(e)) => {
                    tracing::debug!(machine = %self.id, error = %e, "machine not reachable yet");
                }
                Err(_) => break,
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(max_delay);
        }

        Err(self.timeout_error(operation))
    }
}
