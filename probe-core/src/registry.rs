//! The test registry and test selection.
//!
//! One registry is built at process start, filled explicitly by the test
//! catalogue, then shared read-only with the runner.

use crate::descriptor::Test;
use globset::{Glob, GlobSet, GlobSetBuilder};
use probe_types::{Arch, ConfigurationError, PlatformId};
use std::collections::HashMap;

/// Ordered collection of test descriptors with unique names.
#[derive(Debug, Default)]
pub struct TestRegistry {
    tests: Vec<Test>,
    by_name: HashMap<String, usize>,
}

impl TestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a test.
    ///
    /// Fails on an empty name, a cluster size of zero, or a name that is
    /// already registered. The registry is unchanged on failure.
    pub fn register(&mut self, test: Test) -> Result<(), ConfigurationError> {
        if test.name().is_empty() {
            return Err(ConfigurationError::EmptyName);
        }
        if test.cluster_size() == 0 {
            return Err(ConfigurationError::InvalidClusterSize {
                name: test.name().to_string(),
                size: test.cluster_size(),
            });
        }
        if self.by_name.contains_key(test.name()) {
            return Err(ConfigurationError::DuplicateName {
                name: test.name().to_string(),
            });
        }

        tracing::debug!(test = test.name(), "registered test");
        self.by_name.insert(test.name().to_string(), self.tests.len());
        self.tests.push(test);
        Ok(())
    }

    /// Look up a test by exact name.
    pub fn get(&self, name: &str) -> Option<&Test> {
        self.by_name.get(name).map(|&index| &self.tests[index])
    }

    /// Number of registered tests.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Check if no test is registered.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// All tests in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Test> {
        self.tests.iter()
    }

    /// Tests runnable on `platform` and `arch`, in registration order.
    /// `None` leaves that dimension unfiltered.
    pub fn list(&self, platform: Option<&PlatformId>, arch: Option<&Arch>) -> Vec<&Test> {
        self.tests
            .iter()
            .filter(|t| platform.map_or(true, |p| t.runs_on_platform(p)))
            .filter(|t| arch.map_or(true, |a| t.runs_on_arch(a)))
            .collect()
    }

    /// Tests matching `selection`, in registration order.
    pub fn select(&self, selection: &Selection) -> Vec<&Test> {
        self.list(selection.platform.as_ref(), selection.arch.as_ref())
            .into_iter()
            .filter(|t| selection.matches_name(t.name()))
            .collect()
    }
}

/// A filter over registered tests.
///
/// Name patterns use glob syntax (`*`, `?`, `[...]`); a test is selected if
/// any pattern matches. No patterns selects every name.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    patterns: Vec<String>,
    names: Option<GlobSet>,
    /// Only tests runnable on this platform.
    pub platform: Option<PlatformId>,
    /// Only tests runnable on this architecture.
    pub arch: Option<Arch>,
}

impl Selection {
    /// Select everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to names matching any of `patterns`.
    pub fn with_patterns<S: AsRef<str>>(
        mut self,
        patterns: &[S],
    ) -> Result<Self, ConfigurationError> {
        if patterns.is_empty() {
            self.patterns.clear();
            self.names = None;
            return Ok(self);
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).map_err(|e| ConfigurationError::InvalidPattern {
                pattern: pattern.to_string(),
                detail: e.kind().to_string(),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| ConfigurationError::InvalidPattern {
            pattern: patterns
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>()
                .join(" "),
            detail: e.to_string(),
        })?;

        self.patterns = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self.names = Some(set);
        Ok(self)
    }

    /// Restrict to tests runnable on `platform`.
    pub fn on_platform(mut self, platform: PlatformId) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Restrict to tests runnable on `arch`.
    pub fn on_arch(mut self, arch: Arch) -> Self {
        self.arch = Some(arch);
        self
    }

    /// The name patterns as given.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Check if `name` passes the name filter.
    pub fn matches_name(&self, name: &str) -> bool {
        self.names.as_ref().map_or(true, |set| set.is_match(name))
    }
}
