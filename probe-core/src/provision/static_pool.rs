//! Static host pool backend.
//!
//! Machines are pre-existing hosts listed in the `[pool]` config section.
//! "Creating" a machine leases a free host, "destroying" it returns the
//! lease. Hosts are reached with [`SshChannel`].

use super::{DiskSpec, MachineRequest, ProvisionError, ProvisionedMachine, Provisioner};
use crate::channel::{SshChannel, SshTarget};
use crate::config::{PoolConfig, PoolHost, SshConfig};
use async_trait::async_trait;
use probe_types::{MachineId, PlatformId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const BACKEND: &str = "static-pool";

/// Leases hosts from a fixed pool.
#[derive(Debug)]
pub struct StaticPoolProvisioner {
    platform: PlatformId,
    hosts: Vec<PoolHost>,
    ssh: SshConfig,
    /// Machine id -> index into `hosts`.
    leases: Mutex<HashMap<MachineId, usize>>,
}

impl StaticPoolProvisioner {
    /// Create a pool from config.
    pub fn new(pool: &PoolConfig, ssh: &SshConfig) -> Self {
        Self {
            platform: PlatformId::new(pool.platform.clone()),
            hosts: pool.hosts.clone(),
            ssh: ssh.clone(),
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Number of hosts currently leased.
    pub fn leased_count(&self) -> usize {
        self.leases.lock().unwrap().len()
    }

    fn target(&self, host: &PoolHost) -> SshTarget {
        SshTarget::new(
            host.host.clone(),
            host.user.clone().unwrap_or_else(|| self.ssh.user.clone()),
            host.port.unwrap_or(self.ssh.port),
        )
    }
}

#[async_trait]
impl Provisioner for StaticPoolProvisioner {
    fn name(&self) -> &str {
        BACKEND
    }

    fn supports_platform(&self, platform: &PlatformId) -> bool {
        *platform == self.platform
    }

    async fn create_machines(
        &self,
        request: &MachineRequest,
    ) -> Result<Vec<ProvisionedMachine>, ProvisionError> {
        if !self.supports_platform(&request.platform) {
            return Err(ProvisionError::UnsupportedPlatform {
                backend: BACKEND.into(),
                platform: request.platform.clone(),
            });
        }

        let mut leases = self.leases.lock().unwrap();

        let capable: Vec<usize> = self
            .hosts
            .iter()
            .enumerate()
            .filter(|(_, host)| {
                request.disks.satisfied_by(&DiskSpec {
                    multipath: host.multipath_disk,
                })
            })
            .map(|(index, _)| index)
            .collect();
        if capable.is_empty() {
            return Err(ProvisionError::UnsatisfiableShape {
                backend: BACKEND.into(),
                detail: format!("no host in the pool offers {:?}", request.disks),
            });
        }

        let free: Vec<usize> = capable
            .into_iter()
            .filter(|index| !leases.values().any(|leased| leased == index))
            .collect();
        if free.len() < request.count {
            return Err(ProvisionError::InsufficientCapacity {
                backend: BACKEND.into(),
                requested: request.count,
                available: free.len(),
            });
        }

        let mut machines = Vec::with_capacity(request.count);
        for index in free.into_iter().take(request.count) {
            let host = &self.hosts[index];
            let id = MachineId::new();
            leases.insert(id, index);
            tracing::info!(
                test = %request.test_name,
                machine = %id,
                host = %host.host,
                "host leased"
            );
            machines.push(ProvisionedMachine {
                id,
                platform: self.platform.clone(),
                disks: DiskSpec {
                    multipath: host.multipath_disk,
                },
                channel: Arc::new(SshChannel::new(self.target(host), &self.ssh)),
            });
        }
        Ok(machines)
    }

    async fn destroy_machines(&self, machines: &[MachineId]) -> Result<(), ProvisionError> {
        let mut leases = self.leases.lock().unwrap();
        for id in machines {
            match leases.remove(id) {
                Some(index) => {
                    tracing::info!(machine = %id, host = %self.hosts[index].host, "host released");
                }
                None => tracing::debug!(machine = %id, "release of unknown lease ignored"),
            }
        }
        Ok(())
    }
}
