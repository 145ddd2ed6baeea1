//! Lifecycle state machines for machines and test executions.
//!
//! Both are pure: they take events and produce a new state. The I/O is done
//! by probe-core, which drives these transitions and logs them.

use crate::outcome::TestOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one provisioned machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    /// Requested from the backend, not yet reachable.
    Provisioning,
    /// Reachable over the command channel.
    Ready,
    /// A reboot was issued and the new boot has not been confirmed yet.
    Rebooting,
    /// Destroyed. No further commands are issued.
    Terminated,
}

impl MachineState {
    /// Check if the machine has been terminated.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Rebooting => "rebooting",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one test execution.
///
/// `Pending -> Allocating -> Running -> Finished -> TornDown`. Allocation
/// failure goes from `Allocating` straight to `Finished` with an
/// infrastructure error. `TornDown` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    /// Selected, not started.
    Pending,
    /// Machines are being requested from the backend.
    Allocating,
    /// The routine is executing against its cluster.
    Running,
    /// An outcome was determined; teardown has not completed.
    Finished {
        /// The recorded outcome.
        outcome: TestOutcome,
    },
    /// The cluster was torn down.
    TornDown {
        /// The recorded outcome, unchanged by teardown.
        outcome: TestOutcome,
    },
}

/// Events driving an [`ExecutionState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    /// Allocation was requested.
    AllocationStarted,
    /// All machines are ready.
    Allocated,
    /// The backend could not satisfy the request.
    AllocationFailed {
        /// Error detail.
        reason: String,
    },
    /// The routine ended (returned, failed, panicked or timed out).
    RoutineFinished {
        /// The classified outcome.
        outcome: TestOutcome,
    },
    /// Teardown was attempted. Teardown errors do not change the outcome.
    TornDown,
}

impl ExecutionState {
    /// Create a new execution in the Pending state.
    pub fn new() -> Self {
        Self::Pending
    }

    /// Process an event and return the new state.
    ///
    /// Invalid transitions leave the state unchanged.
    pub fn on_event(self, event: ExecutionEvent) -> Self {
        match (self, event) {
            (Self::Pending, ExecutionEvent::AllocationStarted) => Self::Allocating,

            (Self::Allocating, ExecutionEvent::Allocated) => Self::Running,
            (Self::Allocating, ExecutionEvent::AllocationFailed { reason }) => Self::Finished {
                outcome: TestOutcome::InfrastructureError(reason),
            },

            (Self::Running, ExecutionEvent::RoutineFinished { outcome }) => {
                Self::Finished { outcome }
            }

            (Self::Finished { outcome }, ExecutionEvent::TornDown) => Self::TornDown { outcome },

            (state, _) => state,
        }
    }

    /// The outcome, once one has been determined.
    pub fn outcome(&self) -> Option<&TestOutcome> {
        match self {
            Self::Finished { outcome } | Self::TornDown { outcome } => Some(outcome),
            _ => None,
        }
    }

    /// Check if the execution reached its terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TornDown { .. })
    }

    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Allocating => "allocating",
            Self::Running => "running",
            Self::Finished { outcome } => match outcome {
                TestOutcome::Passed => "passed",
                TestOutcome::Failed(_) => "failed",
                TestOutcome::InfrastructureError(_) => "infrastructure_error",
            },
            Self::TornDown { .. } => "torn_down",
        }
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_pending() {
        assert_eq!(ExecutionState::new(), ExecutionState::Pending);
    }

    #[test]
    fn happy_path_reaches_torn_down() {
        let state = ExecutionState::new()
            .on_event(ExecutionEvent::AllocationStarted)
            .on_event(ExecutionEvent::Allocated)
            .on_event(ExecutionEvent::RoutineFinished {
                outcome: TestOutcome::Passed,
            });
        assert_eq!(state.name(), "passed");

        let state = state.on_event(ExecutionEvent::TornDown);
        assert!(state.is_terminal());
        assert_eq!(state.outcome(), Some(&TestOutcome::Passed));
    }

    #[test]
    fn allocation_failure_is_infrastructure_error() {
        let state = ExecutionState::Allocating.on_event(ExecutionEvent::AllocationFailed {
            reason: "no multipath-capable host".into(),
        });
        assert_eq!(
            state.outcome(),
            Some(&TestOutcome::InfrastructureError(
                "no multipath-capable host".into()
            ))
        );
        assert_eq!(state.name(), "infrastructure_error");
    }

    #[test]
    fn teardown_does_not_overwrite_outcome() {
        let state = ExecutionState::Finished {
            outcome: TestOutcome::Failed("boom".into()),
        }
        .on_event(ExecutionEvent::TornDown);
        assert_eq!(
            state,
            ExecutionState::TornDown {
                outcome: TestOutcome::Failed("boom".into())
            }
        );
    }

    #[test]
    fn torn_down_is_terminal() {
        let state = ExecutionState::TornDown {
            outcome: TestOutcome::Passed,
        };
        let next = state.clone().on_event(ExecutionEvent::AllocationStarted);
        assert_eq!(next, state);
    }

    #[test]
    fn invalid_transition_keeps_state() {
        let state = ExecutionState::Pending.on_event(ExecutionEvent::Allocated);
        assert_eq!(state, ExecutionState::Pending);
    }

    #[test]
    fn machine_state_display() {
        assert_eq!(MachineState::Rebooting.to_string(), "rebooting");
        assert!(MachineState::Terminated.is_terminated());
        assert!(!MachineState::Ready.is_terminated());
    }
}
