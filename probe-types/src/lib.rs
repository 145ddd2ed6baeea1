//! # probe-types
//!
//! Shared types for the vmprobe integration-test harness.
//!
//! This crate provides the foundational types used across all vmprobe crates:
//! - [`MachineId`], [`PlatformId`], [`Arch`] - Identity types
//! - [`TestOutcome`], [`TestRecord`] - Classification of a finished test
//! - [`MachineState`], [`ExecutionState`] - Lifecycle state machines
//! - [`ConfigurationError`] - Load-time registry errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod outcome;
mod state;

pub use error::ConfigurationError;
pub use ids::{Arch, MachineId, PlatformId};
pub use outcome::{RecordStatus, TestOutcome, TestRecord};
pub use state::{ExecutionEvent, ExecutionState, MachineState};
