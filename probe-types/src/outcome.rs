//! Test outcomes and per-test run records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Terminal classification of one test execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum TestOutcome {
    /// The routine returned without signalling a failure.
    Passed,
    /// Test logic detected wrong behavior.
    Failed(String),
    /// The environment failed: provisioning, lost connection, timeout.
    InfrastructureError(String),
}

impl TestOutcome {
    /// Returns true for [`TestOutcome::Passed`].
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Returns true for [`TestOutcome::InfrastructureError`].
    pub fn is_infrastructure_error(&self) -> bool {
        matches!(self, Self::InfrastructureError(_))
    }

    /// Human-readable detail, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Passed => None,
            Self::Failed(reason) | Self::InfrastructureError(reason) => Some(reason),
        }
    }

    /// Short status label: `PASS`, `FAIL` or `ERROR`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed(_) => "FAIL",
            Self::InfrastructureError(_) => "ERROR",
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}: {}", self.label(), reason),
            None => f.write_str(self.label()),
        }
    }
}

/// What happened to a selected test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    /// The test was not executed, e.g. the backend does not support its platform.
    Skipped {
        /// Why the test was skipped.
        reason: String,
    },
    /// The test ran to a terminal outcome and its cluster was torn down.
    Completed {
        /// The classified outcome.
        outcome: TestOutcome,
    },
}

/// Record of one selected test, as emitted by the execution loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    /// Test name.
    pub name: String,
    /// Skip or terminal outcome.
    #[serde(flatten)]
    pub status: RecordStatus,
    /// Wall-clock time from allocation start to teardown end, in milliseconds.
    pub duration_ms: u64,
    /// How many times the test was executed (greater than 1 only under a retry policy).
    pub attempts: u32,
}

impl TestRecord {
    /// Build a record for a completed execution.
    pub fn completed(name: impl Into<String>, outcome: TestOutcome, duration: Duration) -> Self {
        Self {
            name: name.into(),
            status: RecordStatus::Completed { outcome },
            duration_ms: duration.as_millis() as u64,
            attempts: 1,
        }
    }

    /// Build a record for a skipped test.
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: RecordStatus::Skipped {
                reason: reason.into(),
            },
            duration_ms: 0,
            attempts: 0,
        }
    }

    /// The outcome, if the test ran.
    pub fn outcome(&self) -> Option<&TestOutcome> {
        match &self.status {
            RecordStatus::Completed { outcome } => Some(outcome),
            RecordStatus::Skipped { .. } => None,
        }
    }

    /// Returns true if the test was skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self.status, RecordStatus::Skipped { .. })
    }

    /// Returns true if the test ran and did not pass.
    pub fn is_failure(&self) -> bool {
        self.outcome().is_some_and(|o| !o.is_passed())
    }

    /// Returns true if the test ran and ended in an infrastructure error.
    pub fn is_infrastructure_error(&self) -> bool {
        self.outcome().is_some_and(TestOutcome::is_infrastructure_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(TestOutcome::Passed.label(), "PASS");
        assert_eq!(TestOutcome::Failed("x".into()).label(), "FAIL");
        assert_eq!(TestOutcome::InfrastructureError("x".into()).label(), "ERROR");
    }

    #[test]
    fn outcome_display_includes_reason() {
        let outcome = TestOutcome::Failed("expected 1, got 2".into());
        assert_eq!(outcome.to_string(), "FAIL: expected 1, got 2");
        assert_eq!(TestOutcome::Passed.to_string(), "PASS");
    }

    #[test]
    fn skipped_record_is_not_a_failure() {
        let record = TestRecord::skipped("multipath", "platform aws not supported");
        assert!(record.is_skipped());
        assert!(!record.is_failure());
        assert!(!record.is_infrastructure_error());
        assert!(record.outcome().is_none());
    }

    #[test]
    fn infrastructure_error_counts_as_failure() {
        let record = TestRecord::completed(
            "multipath",
            TestOutcome::InfrastructureError("connection lost".into()),
            Duration::from_millis(1500),
        );
        assert!(record.is_failure());
        assert!(record.is_infrastructure_error());
        assert_eq!(record.duration_ms, 1500);
        assert_eq!(record.attempts, 1);
    }

    #[test]
    fn record_json_shape() {
        let record = TestRecord::completed(
            "multipath",
            TestOutcome::Failed("mount /boot has non-multipath source /dev/vda3".into()),
            Duration::from_millis(10),
        );
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "multipath");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["outcome"]["result"], "failed");
        assert_eq!(
            json["outcome"]["reason"],
            "mount /boot has non-multipath source /dev/vda3"
        );
    }
}
