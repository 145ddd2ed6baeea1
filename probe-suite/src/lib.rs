//! # probe-suite
//!
//! The built-in vmprobe test catalogue.
//!
//! Tests are plain descriptors. Nothing registers itself: the binary calls
//! [`register_all`] once on a fresh registry.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod demo;
pub mod misc;
pub mod reboot;

use probe_core::{ConfigurationError, TestRegistry};

/// Register every built-in test.
pub fn register_all(registry: &mut TestRegistry) -> Result<(), ConfigurationError> {
    registry.register(misc::multipath::test())?;
    registry.register(reboot::boot_id())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_built_in_tests() {
        let mut registry = TestRegistry::new();
        register_all(&mut registry).unwrap();
        let names: Vec<&str> = registry.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["multipath", "reboot.boot-id"]);
    }

    #[test]
    fn registering_twice_is_rejected() {
        let mut registry = TestRegistry::new();
        register_all(&mut registry).unwrap();
        assert!(matches!(
            register_all(&mut registry),
            Err(ConfigurationError::DuplicateName { .. })
        ));
    }
}
