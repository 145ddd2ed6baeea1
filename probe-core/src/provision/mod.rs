//! Provisioning backends.
//!
//! The harness core only ever talks to a backend through the
//! [`Provisioner`] trait. One implementation exists per backend; this crate
//! ships two:
//! - [`StaticPoolProvisioner`] leases pre-existing hosts reached over SSH
//! - [`MockProvisioner`] creates in-process [`MockChannel`] machines
//!
//! [`MockChannel`]: crate::channel::MockChannel

mod mock;
mod static_pool;

pub use mock::MockProvisioner;
pub use static_pool::StaticPoolProvisioner;

use crate::channel::CommandChannel;
use async_trait::async_trait;
use probe_types::{MachineId, PlatformId};
use std::sync::Arc;
use thiserror::Error;

/// Provisioning errors. All of them classify as infrastructure failures.
#[derive(Debug, Clone, Error)]
pub enum ProvisionError {
    /// The backend does not serve this platform.
    #[error("backend {backend} does not support platform {platform}")]
    UnsupportedPlatform {
        /// Backend name.
        backend: String,
        /// Requested platform.
        platform: PlatformId,
    },

    /// No machine of the backend can take the requested shape.
    #[error("backend {backend} cannot satisfy machine shape: {detail}")]
    UnsatisfiableShape {
        /// Backend name.
        backend: String,
        /// What is missing.
        detail: String,
    },

    /// Not enough free machines right now.
    #[error("backend {backend} has {available} free machines, {requested} requested")]
    InsufficientCapacity {
        /// Backend name.
        backend: String,
        /// Machines requested.
        requested: usize,
        /// Machines free.
        available: usize,
    },

    /// The backend API failed.
    #[error("backend {backend} error: {detail}")]
    Backend {
        /// Backend name.
        backend: String,
        /// Error detail.
        detail: String,
    },
}

/// Per-machine disk requirements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DiskSpec {
    /// Attach the boot disk over multiple paths so the guest can assemble it
    /// with device-mapper multipath.
    pub multipath: bool,
}

impl DiskSpec {
    /// No extra disks.
    pub fn none() -> Self {
        Self::default()
    }

    /// A multipath-capable boot disk.
    pub fn multipath() -> Self {
        Self { multipath: true }
    }

    /// Check if this spec is satisfied by a machine offering `offered`.
    pub fn satisfied_by(&self, offered: &DiskSpec) -> bool {
        !self.multipath || offered.multipath
    }
}

/// A request for `count` machines of one shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRequest {
    /// Number of machines.
    pub count: usize,
    /// Platform to provision on.
    pub platform: PlatformId,
    /// Disks attached to every machine.
    pub disks: DiskSpec,
    /// Name of the test the machines are for; backends use it for labels.
    pub test_name: String,
}

/// A machine as returned by a backend.
pub struct ProvisionedMachine {
    /// Machine identifier, unique across backends.
    pub id: MachineId,
    /// Platform the machine runs on.
    pub platform: PlatformId,
    /// Disks actually attached.
    pub disks: DiskSpec,
    /// Channel to run commands on the machine.
    pub channel: Arc<dyn CommandChannel>,
}

/// Capability interface implemented once per backend.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Backend name, for logs and errors.
    fn name(&self) -> &str;

    /// Check if the backend can provision on `platform`.
    fn supports_platform(&self, platform: &PlatformId) -> bool;

    /// Create `request.count` machines. Either all machines are returned or
    /// none are left running.
    async fn create_machines(
        &self,
        request: &MachineRequest,
    ) -> Result<Vec<ProvisionedMachine>, ProvisionError>;

    /// Destroy machines. Unknown or already destroyed ids are ignored.
    async fn destroy_machines(&self, machines: &[MachineId]) -> Result<(), ProvisionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_spec_satisfaction() {
        assert!(DiskSpec::none().satisfied_by(&DiskSpec::none()));
        assert!(DiskSpec::none().satisfied_by(&DiskSpec::multipath()));
        assert!(DiskSpec::multipath().satisfied_by(&DiskSpec::multipath()));
        assert!(!DiskSpec::multipath().satisfied_by(&DiskSpec::none()));
    }

    #[test]
    fn error_display() {
        let err = ProvisionError::InsufficientCapacity {
            backend: "pool".into(),
            requested: 3,
            available: 1,
        };
        assert_eq!(err.to_string(), "backend pool has 1 free machines, 3 requested");
    }
}
