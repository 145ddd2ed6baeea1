//! Mock provisioner for testing.
//!
//! Creates [`MockChannel`] machines in-process and records every create and
//! destroy for verification.

use super::{DiskSpec, MachineRequest, ProvisionError, ProvisionedMachine, Provisioner};
use crate::channel::MockChannel;
use async_trait::async_trait;
use probe_types::{MachineId, PlatformId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type SetupFn = Arc<dyn Fn(&MockChannel) + Send + Sync>;

/// Mock provisioner for testing.
///
/// Cloning shares the recorded state.
#[derive(Clone)]
pub struct MockProvisioner {
    inner: Arc<Mutex<MockProvisionerInner>>,
}

#[derive(Default)]
struct MockProvisionerInner {
    platforms: Vec<PlatformId>,
    multipath_capable: bool,
    capacity: Option<usize>,
    short_by: usize,
    live: HashMap<MachineId, MockChannel>,
    all: Vec<(MachineId, MockChannel)>,
    destroyed: Vec<MachineId>,
    destroy_calls: usize,
    requests: Vec<MachineRequest>,
    fail_next_create: Option<String>,
    fail_next_destroy: Option<String>,
    setup: Option<SetupFn>,
}

impl MockProvisioner {
    /// Create a mock provisioner supporting every platform, with multipath disks.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockProvisionerInner {
                multipath_capable: true,
                ..Default::default()
            })),
        }
    }

    /// Restrict the platforms this backend answers for.
    pub fn supporting(self, platforms: &[&str]) -> Self {
        self.inner.lock().unwrap().platforms =
            platforms.iter().map(|p| PlatformId::from(*p)).collect();
        self
    }

    /// Whether multipath disks can be attached.
    pub fn with_multipath(self, capable: bool) -> Self {
        self.inner.lock().unwrap().multipath_capable = capable;
        self
    }

    /// Maximum number of machines alive at once.
    pub fn with_capacity(self, capacity: usize) -> Self {
        self.inner.lock().unwrap().capacity = Some(capacity);
        self
    }

    /// Script every machine created from now on.
    pub fn on_create<F>(self, setup: F) -> Self
    where
        F: Fn(&MockChannel) + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().setup = Some(Arc::new(setup));
        self
    }

    /// Misbehave by returning `missing` fewer machines than requested.
    pub fn return_short(&self, missing: usize) {
        self.inner.lock().unwrap().short_by = missing;
    }

    /// Cause the next create to fail with a backend error.
    pub fn fail_next_create(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_create = Some(error.to_string());
    }

    /// Cause the next destroy to fail with a backend error.
    pub fn fail_next_destroy(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_destroy = Some(error.to_string());
    }

    /// Every machine ever created with its channel, in creation order.
    pub fn machines(&self) -> Vec<(MachineId, MockChannel)> {
        self.inner.lock().unwrap().all.clone()
    }

    /// Number of machines created and not yet destroyed.
    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }

    /// Machines destroyed, in order.
    pub fn destroyed(&self) -> Vec<MachineId> {
        self.inner.lock().unwrap().destroyed.clone()
    }

    /// Number of `destroy_machines` calls received.
    pub fn destroy_calls(&self) -> usize {
        self.inner.lock().unwrap().destroy_calls
    }

    /// Every create request received, in order.
    pub fn requests(&self) -> Vec<MachineRequest> {
        self.inner.lock().unwrap().requests.clone()
    }
}

impl Default for MockProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_platform(&self, platform: &PlatformId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.platforms.is_empty() || inner.platforms.contains(platform)
    }

    async fn create_machines(
        &self,
        request: &MachineRequest,
    ) -> Result<Vec<ProvisionedMachine>, ProvisionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(request.clone());

        if let Some(detail) = inner.fail_next_create.take() {
            return Err(ProvisionError::Backend {
                backend: "mock".into(),
                detail,
            });
        }

        if request.disks.multipath && !inner.multipath_capable {
            return Err(ProvisionError::UnsatisfiableShape {
                backend: "mock".into(),
                detail: "multipath disks are not available".into(),
            });
        }

        if let Some(capacity) = inner.capacity {
            let available = capacity.saturating_sub(inner.live.len());
            if request.count > available {
                return Err(ProvisionError::InsufficientCapacity {
                    backend: "mock".into(),
                    requested: request.count,
                    available,
                });
            }
        }

        let count = request.count.saturating_sub(inner.short_by);
        let disks = DiskSpec {
            multipath: request.disks.multipath,
        };
        let mut machines = Vec::with_capacity(count);
        for _ in 0..count {
            let id = MachineId::new();
            let channel = MockChannel::with_address(format!("mock-{}", id.short()));
            if let Some(setup) = &inner.setup {
                setup(&channel);
            }
            inner.live.insert(id, channel.clone());
            inner.all.push((id, channel.clone()));
            machines.push(ProvisionedMachine {
                id,
                platform: request.platform.clone(),
                disks,
                channel: Arc::new(channel),
            });
        }

        tracing::debug!(test = %request.test_name, count, "mock machines created");
        Ok(machines)
    }

    async fn destroy_machines(&self, machines: &[MachineId]) -> Result<(), ProvisionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.destroy_calls += 1;

        if let Some(detail) = inner.fail_next_destroy.take() {
            return Err(ProvisionError::Backend {
                backend: "mock".into(),
                detail,
            });
        }

        for id in machines {
            if inner.live.remove(id).is_some() {
                inner.destroyed.push(*id);
            } else {
                tracing::debug!(machine = %id, "destroy of unknown mock machine ignored");
            }
        }
        Ok(())
    }
}
