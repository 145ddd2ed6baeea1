//! Clusters: the machines allocated for one test.
//!
//! [`Cluster`] owns allocation and teardown and is held by the runner.
//! [`TestCluster`] is the cheap handle passed into test routines.

use crate::config::MachineConfig;
use crate::descriptor::{Test, TestError};
use crate::machine::{CommandError, Machine};
use crate::provision::{MachineRequest, ProvisionError, Provisioner};
use probe_types::{MachineId, PlatformId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors allocating a cluster. All of them classify as infrastructure failures.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// The backend refused or failed the request.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// The backend returned a different number of machines than requested.
    #[error("backend returned {actual} machines, {expected} requested")]
    MachineCount {
        /// Requested count.
        expected: usize,
        /// Returned count.
        actual: usize,
    },

    /// A machine never became reachable.
    #[error("machine not ready: {0}")]
    NotReady(#[from] CommandError),
}

/// The machines provisioned for one test, in index order.
pub struct Cluster {
    test_name: Arc<str>,
    platform: PlatformId,
    machines: Arc<[Arc<Machine>]>,
    provisioner: Arc<dyn Provisioner>,
    /// Machines the backend has not confirmed destroyed yet.
    pending_destroy: Mutex<Vec<MachineId>>,
}

impl Cluster {
    /// Provision `test.cluster_size()` machines of the test's shape on `platform`
    /// and wait until every one answers.
    ///
    /// On any failure, machines already created are destroyed before the
    /// error is returned. A test asking for zero machines is rejected
    /// without contacting the backend.
    pub async fn allocate(
        test: &Test,
        platform: &PlatformId,
        provisioner: Arc<dyn Provisioner>,
        config: &MachineConfig,
    ) -> Result<Self, AllocationError> {
        if test.cluster_size() == 0 {
            return Err(ProvisionError::UnsatisfiableShape {
                backend: provisioner.name().to_string(),
                detail: format!("test {} requests an empty cluster", test.name()),
            }
            .into());
        }

        let request = MachineRequest {
            count: test.cluster_size(),
            platform: platform.clone(),
            disks: test.disk_spec(),
            test_name: test.name().to_string(),
        };
        tracing::info!(
            test = test.name(),
            backend = provisioner.name(),
            count = request.count,
            disks = ?request.disks,
            "allocating cluster"
        );

        let provisioned = provisioner.create_machines(&request).await?;
        let machines: Vec<Arc<Machine>> = provisioned
            .into_iter()
            .map(|p| Arc::new(Machine::new(p, config.clone())))
            .collect();

        let cluster = Self {
            test_name: Arc::from(test.name()),
            platform: platform.clone(),
            pending_destroy: Mutex::new(machines.iter().map(|m| m.id()).collect()),
            machines: machines.into(),
            provisioner,
        };

        if let Err(e) = cluster.check_shape(&request) {
            cluster.release_after_failed_allocation().await;
            return Err(e);
        }

        let ready = futures_util::future::try_join_all(
            cluster.machines.iter().map(|m| m.wait_until_ready()),
        )
        .await;
        if let Err(e) = ready {
            cluster.release_after_failed_allocation().await;
            return Err(e.into());
        }

        tracing::info!(test = test.name(), "cluster ready");
        Ok(cluster)
    }

    fn check_shape(&self, request: &MachineRequest) -> Result<(), AllocationError> {
        if self.machines.len() != request.count {
            return Err(AllocationError::MachineCount {
                expected: request.count,
                actual: self.machines.len(),
            });
        }
        if let Some(machine) = self
            .machines
            .iter()
            .find(|m| !request.disks.satisfied_by(&m.disks()))
        {
            return Err(ProvisionError::UnsatisfiableShape {
                backend: self.provisioner.name().to_string(),
                detail: format!("machine {} came up without {:?}", machine.id(), request.disks),
            }
            .into());
        }
        Ok(())
    }

    async fn release_after_failed_allocation(&self) {
        if let Err(e) = self.teardown().await {
            tracing::warn!(test = %self.test_name, error = %e, "release after failed allocation");
        }
    }

    /// Terminate every machine and return them to the backend.
    ///
    /// Idempotent: machines the backend already destroyed are skipped, and
    /// when none are left the backend is not called at all. Machines whose
    /// destroy failed stay pending and are retried by the next call. Safe
    /// to call while a routine still has commands in flight; they resolve
    /// with `ConnectionLost`.
    pub async fn teardown(&self) -> Result<(), ProvisionError> {
        let mut pending = self.pending_destroy.lock().await;
        for machine in self.machines.iter() {
            machine.terminate();
        }
        if pending.is_empty() {
            tracing::debug!(test = %self.test_name, "cluster already torn down");
            return Ok(());
        }

        tracing::info!(test = %self.test_name, count = pending.len(), "tearing down cluster");
        self.provisioner.destroy_machines(&pending).await?;
        pending.clear();
        Ok(())
    }

    /// Machines in index order.
    pub fn machines(&self) -> &[Arc<Machine>] {
        &self.machines
    }

    /// Platform the cluster runs on.
    pub fn platform(&self) -> &PlatformId {
        &self.platform
    }

    /// Handle for the test routine.
    pub fn test_cluster(&self) -> TestCluster {
        TestCluster {
            test_name: Arc::clone(&self.test_name),
            platform: self.platform.clone(),
            machines: Arc::clone(&self.machines),
        }
    }
}

/// What a test routine sees of its cluster.
///
/// Cloning is cheap. Commands on different machines are not serialized by
/// the harness: a routine that needs ordering across machines awaits one
/// before issuing the next.
#[derive(Clone)]
pub struct TestCluster {
    test_name: Arc<str>,
    platform: PlatformId,
    machines: Arc<[Arc<Machine>]>,
}

impl TestCluster {
    /// Name of the running test.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Platform the cluster runs on.
    pub fn platform(&self) -> &PlatformId {
        &self.platform
    }

    /// Machines in index order.
    pub fn machines(&self) -> &[Arc<Machine>] {
        &self.machines
    }

    /// Machine at `index`; a test failure if the cluster is smaller.
    pub fn machine(&self, index: usize) -> Result<&Machine, TestError> {
        self.machines.get(index).map(|m| m.as_ref()).ok_or_else(|| {
            TestError::failed(format!(
                "machine {index} requested but cluster has {} machines",
                self.machines.len()
            ))
        })
    }

    /// Run `command` on `machine` and return trimmed standard output.
    pub async fn ssh(&self, machine: &Machine, command: &str) -> Result<String, TestError> {
        Ok(machine.run_command_str(command).await?)
    }

    /// Build a test failure to return from the routine.
    pub fn fatal(&self, reason: impl Into<String>) -> TestError {
        let reason = reason.into();
        tracing::debug!(test = %self.test_name, %reason, "test failed");
        TestError::Failed(reason)
    }
}
