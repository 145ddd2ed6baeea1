//! # probe-core
//!
//! Machines, clusters, the test registry and the execution loop for vmprobe.
//!
//! ## Features
//!
//! - **Command channels**: run shell commands over `ssh` or against an
//!   in-process mock machine
//! - **Provisioning backends**: pluggable [`Provisioner`] trait (static host
//!   pool, mock)
//! - **Reboot-aware machines**: `reboot()` returns only once the machine
//!   answers from a new boot
//! - **Isolated execution**: every routine runs in its own task; failures,
//!   panics and timeouts become outcomes and teardown always runs
//!
//! ## Example
//!
//! ```ignore
//! use vmprobe_core::{MockProvisioner, Runner, RunnerOptions, Selection, Test, TestRegistry};
//!
//! let mut registry = TestRegistry::new();
//! registry.register(Test::new("reboot.boot-id", reboot_changes_boot_id))?;
//!
//! let runner = Runner::new(Arc::new(MockProvisioner::new()), RunnerOptions::default());
//! let records = runner.run(&registry, &Selection::all()).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod cluster;
pub mod config;
pub mod descriptor;
pub mod machine;
pub mod provision;
pub mod registry;
pub mod runner;

pub use channel::{ChannelError, CommandChannel, CommandOutput, MockChannel, SshChannel};
pub use cluster::{AllocationError, Cluster, TestCluster};
pub use config::{MachineConfig, PoolConfig, PoolHost, SshConfig};
pub use descriptor::{RunFn, Test, TestError, TestResult};
pub use machine::{CommandError, Machine};
pub use provision::{
    DiskSpec, MachineRequest, MockProvisioner, ProvisionError, ProvisionedMachine, Provisioner,
    StaticPoolProvisioner,
};
pub use registry::{Selection, TestRegistry};
pub use runner::{Runner, RunnerOptions, DEFAULT_TEST_TIMEOUT};

pub use probe_types::{
    Arch, ConfigurationError, MachineId, MachineState, PlatformId, RecordStatus, TestOutcome,
    TestRecord,
};
