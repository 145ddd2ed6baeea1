//! Run summary and JSON report.

use anyhow::{Context, Result};
use probe_core::{RecordStatus, TestOutcome, TestRecord};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

/// Counts per outcome.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Tests that passed.
    pub passed: usize,
    /// Tests that failed.
    pub failed: usize,
    /// Tests that ended in an infrastructure error.
    pub infrastructure_errors: usize,
    /// Tests that were not executed.
    pub skipped: usize,
}

impl Summary {
    /// Count `records`.
    pub fn from_records(records: &[TestRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            match record.outcome() {
                None => summary.skipped += 1,
                Some(TestOutcome::Passed) => summary.passed += 1,
                Some(TestOutcome::Failed(_)) => summary.failed += 1,
                Some(TestOutcome::InfrastructureError(_)) => summary.infrastructure_errors += 1,
            }
        }
        summary
    }

    /// True when every executed test passed. Skipped tests do not count.
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.infrastructure_errors == 0
    }
}

/// The JSON report written by `run --json-report`.
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    /// Target platform.
    pub platform: &'a str,
    /// Target architecture.
    pub arch: &'a str,
    /// Provisioning backend.
    pub backend: &'a str,
    /// Counts per outcome.
    pub summary: Summary,
    /// One record per selected test, in selection order.
    pub tests: &'a [TestRecord],
}

impl RunReport<'_> {
    /// Write the report as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }
}

/// Human-readable result table.
pub fn render(records: &[TestRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let _ = match &record.status {
            RecordStatus::Skipped { reason } => {
                writeln!(out, "  SKIP   {}: {}", record.name, reason)
            }
            RecordStatus::Completed { outcome } => {
                let seconds = record.duration_ms as f64 / 1000.0;
                let attempts = if record.attempts > 1 {
                    format!(", {} attempts", record.attempts)
                } else {
                    String::new()
                };
                match outcome.reason() {
                    None => writeln!(
                        out,
                        "  {:<6} {} ({seconds:.2}s{attempts})",
                        outcome.label(),
                        record.name
                    ),
                    Some(reason) => writeln!(
                        out,
                        "  {:<6} {} ({seconds:.2}s{attempts}): {reason}",
                        outcome.label(),
                        record.name
                    ),
                }
            }
        };
    }

    let summary = Summary::from_records(records);
    let _ = write!(
        out,
        "\npassed: {}, failed: {}, errors: {}, skipped: {}",
        summary.passed, summary.failed, summary.infrastructure_errors, summary.skipped
    );
    out
}
