//! Error types shared across vmprobe crates.

use thiserror::Error;

/// Load-time errors raised while building the test registry.
///
/// These are fatal: the run is aborted before any test executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A test with the same name was already registered.
    #[error("test {name} already registered")]
    DuplicateName {
        /// The conflicting test name.
        name: String,
    },

    /// A test declared a cluster size of zero.
    #[error("test {name} has invalid cluster size {size} (must be at least 1)")]
    InvalidClusterSize {
        /// The offending test name.
        name: String,
        /// The declared size.
        size: usize,
    },

    /// A test was declared with an empty name.
    #[error("test name must not be empty")]
    EmptyName,

    /// A test selection pattern could not be compiled.
    #[error("invalid test pattern {pattern}: {detail}")]
    InvalidPattern {
        /// The pattern as given.
        pattern: String,
        /// Parser error detail.
        detail: String,
    },
}
