//! Test descriptors and the error type routines return.

use crate::cluster::TestCluster;
use crate::machine::CommandError;
use crate::provision::DiskSpec;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use probe_types::{Arch, PlatformId, TestOutcome};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors a test routine returns to end itself early.
#[derive(Debug, Error)]
pub enum TestError {
    /// Test logic detected wrong behavior.
    #[error("{0}")]
    Failed(String),

    /// A remote command failed. Non-zero exit counts as a test failure,
    /// anything else as an infrastructure error.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The environment failed in a way the routine detected itself.
    #[error("{0}")]
    Infrastructure(String),
}

impl TestError {
    /// Assertion-style failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Classify into a terminal outcome.
    pub fn into_outcome(self) -> TestOutcome {
        match self {
            Self::Failed(reason) => TestOutcome::Failed(reason),
            Self::Command(e) if !e.is_infrastructure() => TestOutcome::Failed(e.to_string()),
            Self::Command(e) => TestOutcome::InfrastructureError(e.to_string()),
            Self::Infrastructure(reason) => TestOutcome::InfrastructureError(reason),
        }
    }
}

/// What a test routine returns.
pub type TestResult = Result<(), TestError>;

/// A test routine: receives its cluster, returns when done.
pub type RunFn = Arc<dyn Fn(TestCluster) -> BoxFuture<'static, TestResult> + Send + Sync>;

/// Return [`TestError::Failed`] from the enclosing routine unless `cond` holds.
///
/// ```ignore
/// probe_ensure!(src.starts_with("/dev/mapper/mpath"), "mount {path} has non-multipath source {src}");
/// ```
#[macro_export]
macro_rules! probe_ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::TestError::Failed(format!($($arg)+)));
        }
    };
}

/// Return [`TestError::Failed`] naming both values unless `actual == expected`.
#[macro_export]
macro_rules! probe_ensure_eq {
    ($actual:expr, $expected:expr, $what:expr) => {
        match (&$actual, &$expected) {
            (actual, expected) => {
                if actual != expected {
                    return Err($crate::TestError::Failed(format!(
                        "{}: expected {:?}, got {:?}",
                        $what, expected, actual
                    )));
                }
            }
        }
    };
}

/// Declarative metadata plus the routine defining one integration test.
#[derive(Clone)]
pub struct Test {
    name: String,
    description: String,
    run: RunFn,
    cluster_size: usize,
    platforms: Vec<PlatformId>,
    exclude_platforms: Vec<PlatformId>,
    architectures: Vec<Arch>,
    exclude_architectures: Vec<Arch>,
    multipath_disk: bool,
    timeout: Option<Duration>,
    tags: Vec<String>,
}

impl Test {
    /// Declare a test with a single-machine cluster that runs everywhere.
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(TestCluster) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TestResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            run: Arc::new(move |cluster| run(cluster).boxed()),
            cluster_size: 1,
            platforms: Vec::new(),
            exclude_platforms: Vec::new(),
            architectures: Vec::new(),
            exclude_architectures: Vec::new(),
            multipath_disk: false,
            timeout: None,
            tags: Vec::new(),
        }
    }

    /// One-line description shown by `list`.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Number of machines the test needs. Validated at registration.
    pub fn with_cluster_size(mut self, size: usize) -> Self {
        self.cluster_size = size;
        self
    }

    /// Platforms the test runs on. Empty means all.
    pub fn with_platforms(mut self, platforms: &[&str]) -> Self {
        self.platforms = platforms.iter().map(|p| PlatformId::from(*p)).collect();
        self
    }

    /// Platforms the test never runs on.
    pub fn with_exclude_platforms(mut self, platforms: &[&str]) -> Self {
        self.exclude_platforms = platforms.iter().map(|p| PlatformId::from(*p)).collect();
        self
    }

    /// Architectures the test runs on. Empty means all.
    pub fn with_architectures(mut self, arches: &[&str]) -> Self {
        self.architectures = arches.iter().map(|a| Arch::from(*a)).collect();
        self
    }

    /// Architectures the test never runs on.
    pub fn with_exclude_architectures(mut self, arches: &[&str]) -> Self {
        self.exclude_architectures = arches.iter().map(|a| Arch::from(*a)).collect();
        self
    }

    /// Request a multipath-capable boot disk on every machine.
    pub fn with_multipath_disk(mut self, multipath: bool) -> Self {
        self.multipath_disk = multipath;
        self
    }

    /// Override the runner's default timeout for this test.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Free-form tags.
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Test name, unique within a registry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-line description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Number of machines.
    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    /// Declared platforms (empty = all).
    pub fn platforms(&self) -> &[PlatformId] {
        &self.platforms
    }

    /// Declared architectures (empty = all).
    pub fn architectures(&self) -> &[Arch] {
        &self.architectures
    }

    /// Per-test timeout, if set.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Tags.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Disks every machine must carry.
    pub fn disk_spec(&self) -> DiskSpec {
        DiskSpec {
            multipath: self.multipath_disk,
        }
    }

    /// The routine.
    pub fn routine(&self) -> RunFn {
        Arc::clone(&self.run)
    }

    /// Check if the test runs on `platform`.
    pub fn runs_on_platform(&self, platform: &PlatformId) -> bool {
        (self.platforms.is_empty() || self.platforms.contains(platform))
            && !self.exclude_platforms.contains(platform)
    }

    /// Check if the test runs on `arch`.
    pub fn runs_on_arch(&self, arch: &Arch) -> bool {
        (self.architectures.is_empty() || self.architectures.contains(arch))
            && !self.exclude_architectures.contains(arch)
    }
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Test")
            .field("name", &self.name)
            .field("cluster_size", &self.cluster_size)
            .field("platforms", &self.platforms)
            .field("architectures", &self.architectures)
            .field("multipath_disk", &self.multipath_disk)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
