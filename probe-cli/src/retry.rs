//! Re-running tests that ended in an infrastructure error.
//!
//! The core never retries. This layer re-runs only tests whose outcome is
//! `InfrastructureError`, up to `infra_retries` extra rounds. Failed tests
//! are never retried.

use probe_core::{Runner, Test, TestRecord};

/// Run `tests` and retry infrastructure errors up to `retries` times.
///
/// Records come back in input order; `attempts` counts every execution and
/// `duration_ms` sums them.
pub async fn run_with_retries(runner: &Runner, tests: Vec<Test>, retries: u32) -> Vec<TestRecord> {
    let mut records = runner.run_tests(tests.clone()).await;

    for round in 1..=retries {
        let pending: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.is_infrastructure_error())
            .map(|(index, _)| index)
            .collect();
        if pending.is_empty() {
            break;
        }

        tracing::warn!(round, tests = pending.len(), "retrying infrastructure errors");
        let again = runner
            .run_tests(pending.iter().map(|&index| tests[index].clone()).collect())
            .await;

        for (index, mut record) in pending.into_iter().zip(again) {
            record.attempts += records[index].attempts;
            record.duration_ms += records[index].duration_ms;
            records[index] = record;
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_core::{
        MockProvisioner, RunnerOptions, TestCluster, TestError, TestOutcome, TestResult,
    };
    use std::sync::Arc;

    async fn noop(_: TestCluster) -> TestResult {
        Ok(())
    }

    async fn broken(_: TestCluster) -> TestResult {
        Err(TestError::failed("assertion"))
    }

    fn runner(provisioner: &MockProvisioner) -> Runner {
        Runner::new(Arc::new(provisioner.clone()), RunnerOptions::default())
    }

    #[tokio::test]
    async fn infrastructure_error_is_retried() {
        let provisioner = MockProvisioner::new();
        provisioner.fail_next_create("capacity blip");

        let records =
            run_with_retries(&runner(&provisioner), vec![Test::new("basic", noop)], 1).await;
        assert_eq!(records[0].outcome(), Some(&TestOutcome::Passed));
        assert_eq!(records[0].attempts, 2);
        assert_eq!(provisioner.requests().len(), 2);
    }

    #[tokio::test]
    async fn no_retry_by_default() {
        let provisioner = MockProvisioner::new();
        provisioner.fail_next_create("capacity blip");

        let records =
            run_with_retries(&runner(&provisioner), vec![Test::new("basic", noop)], 0).await;
        assert!(records[0].outcome().unwrap().is_infrastructure_error());
        assert_eq!(records[0].attempts, 1);
    }

    #[tokio::test]
    async fn failures_are_not_retried() {
        let provisioner = MockProvisioner::new();
        let records = run_with_retries(
            &runner(&provisioner),
            vec![Test::new("broken", broken), Test::new("basic", noop)],
            3,
        )
        .await;

        assert!(matches!(records[0].outcome(), Some(TestOutcome::Failed(_))));
        assert_eq!(records[0].attempts, 1);
        assert_eq!(records[1].outcome(), Some(&TestOutcome::Passed));
        assert_eq!(provisioner.requests().len(), 2);
    }

    #[tokio::test]
    async fn retries_stop_after_limit() {
        let provisioner = MockProvisioner::new().with_multipath(false);
        let test = Test::new("multipath", noop).with_multipath_disk(true);

        let records = run_with_retries(&runner(&provisioner), vec![test], 2).await;
        assert!(records[0].outcome().unwrap().is_infrastructure_error());
        assert_eq!(records[0].attempts, 3);
    }
}
