//! The execution loop.
//!
//! For every selected test the runner checks that the backend serves the
//! target platform, allocates a cluster, runs the routine in its own tokio
//! task and tears the cluster down, whatever happened. Each execution is
//! driven through an [`ExecutionState`] and ends in exactly one
//! [`TestRecord`].

use crate::cluster::Cluster;
use crate::config::MachineConfig;
use crate::descriptor::Test;
use crate::provision::Provisioner;
use crate::registry::{Selection, TestRegistry};
use probe_types::{ExecutionEvent, ExecutionState, PlatformId, TestOutcome, TestRecord};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default per-test timeout (30 minutes).
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Runner settings.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Maximum executions in flight.
    pub parallel: usize,
    /// Timeout for tests that do not declare their own.
    pub default_timeout: Duration,
    /// Platform every test is provisioned on.
    pub platform: PlatformId,
    /// Limits applied to every machine.
    pub machine: MachineConfig,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            parallel: 1,
            default_timeout: DEFAULT_TEST_TIMEOUT,
            platform: PlatformId::from(PlatformId::QEMU_UNPRIV),
            machine: MachineConfig::default(),
        }
    }
}

/// Runs tests against one provisioning backend.
///
/// Cloning is cheap; clones share the backend.
#[derive(Clone)]
pub struct Runner {
    provisioner: Arc<dyn Provisioner>,
    options: Arc<RunnerOptions>,
}

impl Runner {
    /// Create a runner.
    pub fn new(provisioner: Arc<dyn Provisioner>, options: RunnerOptions) -> Self {
        Self {
            provisioner,
            options: Arc::new(options),
        }
    }

    /// Runner settings.
    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Run every test in `registry` matching `selection`.
    ///
    /// Records come back in registration order.
    pub async fn run(&self, registry: &TestRegistry, selection: &Selection) -> Vec<TestRecord> {
        let tests: Vec<Test> = registry.select(selection).into_iter().cloned().collect();
        self.run_tests(tests).await
    }

    /// Run `tests`, up to `parallel` at a time, and return one record per
    /// test in input order.
    pub async fn run_tests(&self, tests: Vec<Test>) -> Vec<TestRecord> {
        let parallel = self.options.parallel.max(1);
        tracing::info!(
            tests = tests.len(),
            parallel,
            platform = %self.options.platform,
            backend = self.provisioner.name(),
            "starting run"
        );

        let semaphore = Arc::new(Semaphore::new(parallel));
        let mut set = JoinSet::new();
        for (index, test) in tests.iter().cloned().enumerate() {
            let runner = self.clone();
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, runner.run_one(&test).await)
            });
        }

        let mut records: Vec<Option<TestRecord>> = tests.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, record)) => records[index] = Some(record),
                Err(e) => tracing::error!(error = %e, "execution task failed"),
            }
        }

        records
            .into_iter()
            .zip(&tests)
            .map(|(record, test)| {
                record.unwrap_or_else(|| {
                    TestRecord::completed(
                        test.name(),
                        TestOutcome::InfrastructureError("execution task did not complete".into()),
                        Duration::ZERO,
                    )
                })
            })
            .collect()
    }

    /// Execute one test from allocation to teardown.
    pub async fn run_one(&self, test: &Test) -> TestRecord {
        let platform = &self.options.platform;
        if !test.runs_on_platform(platform) {
            let reason = format!("test does not run on platform {platform}");
            tracing::info!(test = test.name(), %reason, "skipped");
            return TestRecord::skipped(test.name(), reason);
        }
        if !self.provisioner.supports_platform(platform) {
            let reason = format!(
                "backend {} does not support platform {platform}",
                self.provisioner.name()
            );
            tracing::info!(test = test.name(), %reason, "skipped");
            return TestRecord::skipped(test.name(), reason);
        }

        let started = Instant::now();
        let mut state = advance(
            test,
            ExecutionState::new(),
            ExecutionEvent::AllocationStarted,
        );

        match Cluster::allocate(
            test,
            platform,
            Arc::clone(&self.provisioner),
            &self.options.machine,
        )
        .await
        {
            Ok(cluster) => {
                state = advance(test, state, ExecutionEvent::Allocated);
                let outcome = self.execute(test, &cluster).await;
                state = advance(test, state, ExecutionEvent::RoutineFinished { outcome });
                if let Err(e) = cluster.teardown().await {
                    tracing::warn!(test = test.name(), error = %e, "teardown failed");
                }
            }
            Err(e) => {
                state = advance(
                    test,
                    state,
                    ExecutionEvent::AllocationFailed {
                        reason: e.to_string(),
                    },
                );
            }
        }
        state = advance(test, state, ExecutionEvent::TornDown);

        let outcome = state.outcome().cloned().unwrap_or_else(|| {
            TestOutcome::InfrastructureError("execution ended without an outcome".into())
        });
        let duration = started.elapsed();
        match &outcome {
            TestOutcome::Passed => {
                tracing::info!(test = test.name(), ?duration, "passed");
            }
            other => {
                tracing::warn!(test = test.name(), ?duration, outcome = %other, "did not pass");
            }
        }
        TestRecord::completed(test.name(), outcome, duration)
    }

    /// Run the routine in its own task, bounded by the test's timeout.
    async fn execute(&self, test: &Test, cluster: &Cluster) -> TestOutcome {
        let limit = test.timeout().unwrap_or(self.options.default_timeout);
        let routine = test.routine();
        let handle = cluster.test_cluster();
        let mut task = tokio::spawn(async move { routine(handle).await });

        match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(Ok(()))) => TestOutcome::Passed,
            Ok(Ok(Err(e))) => e.into_outcome(),
            Ok(Err(e)) if e.is_panic() => TestOutcome::Failed(format!(
                "routine panicked: {}",
                panic_message(e.into_panic())
            )),
            Ok(Err(e)) => TestOutcome::InfrastructureError(format!("routine task failed: {e}")),
            Err(_) => {
                task.abort();
                TestOutcome::Failed(format!("timed out after {limit:?}"))
            }
        }
    }
}

fn advance(test: &Test, state: ExecutionState, event: ExecutionEvent) -> ExecutionState {
    let from = state.name();
    let next = state.on_event(event);
    tracing::debug!(test = test.name(), from, to = next.name(), "execution state");
    next
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::TestCluster;
    use crate::provision::MockProvisioner;
    use crate::{probe_ensure_eq, TestError, TestResult};
    use probe_types::RecordStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options() -> RunnerOptions {
        RunnerOptions {
            parallel: 1,
            default_timeout: Duration::from_secs(10),
            platform: PlatformId::from(PlatformId::QEMU_UNPRIV),
            machine: MachineConfig {
                command_timeout_secs: 5,
                reboot_timeout_secs: 1,
                reboot_poll_initial_ms: 1,
                reboot_poll_max_ms: 10,
                ..MachineConfig::default()
            },
        }
    }

    fn runner(provisioner: &MockProvisioner) -> Runner {
        Runner::new(Arc::new(provisioner.clone()), options())
    }

    async fn noop(_: TestCluster) -> TestResult {
        Ok(())
    }

    fn outcome(record: &TestRecord) -> TestOutcome {
        record.outcome().cloned().expect("completed record")
    }

    #[tokio::test]
    async fn passing_test_is_torn_down() {
        let provisioner = MockProvisioner::new();
        let record = runner(&provisioner).run_one(&Test::new("basic", noop)).await;

        assert_eq!(outcome(&record), TestOutcome::Passed);
        assert_eq!(record.attempts, 1);
        assert_eq!(provisioner.live_count(), 0);
        assert_eq!(provisioner.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn test_not_declared_for_platform_is_skipped() {
        let provisioner = MockProvisioner::new();
        let test = Test::new("aws-only", noop).with_platforms(&["aws"]);
        let record = runner(&provisioner).run_one(&test).await;

        assert!(record.is_skipped());
        assert!(provisioner.requests().is_empty());
    }

    #[tokio::test]
    async fn unsupported_backend_platform_is_skipped() {
        let provisioner = MockProvisioner::new().supporting(&["aws"]);
        let test = Test::new("multipath", noop)
            .with_platforms(&["qemu-unpriv"])
            .with_multipath_disk(true);
        let record = runner(&provisioner).run_one(&test).await;

        match &record.status {
            RecordStatus::Skipped { reason } => assert!(reason.contains("qemu-unpriv")),
            other => panic!("expected skip, got {other:?}"),
        }
        assert!(provisioner.requests().is_empty());
    }

    #[tokio::test]
    async fn allocation_failure_is_infrastructure_error() {
        let provisioner = MockProvisioner::new();
        provisioner.fail_next_create("quota exceeded");
        let ran = Arc::new(AtomicUsize::new(0));
        let test = {
            let ran = Arc::clone(&ran);
            Test::new("basic", move |_| {
                let ran = Arc::clone(&ran);
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    TestResult::Ok(())
                }
            })
        };

        let record = runner(&provisioner).run_one(&test).await;
        let outcome = outcome(&record);
        assert!(outcome.is_infrastructure_error());
        assert!(outcome.reason().unwrap().contains("quota exceeded"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsatisfiable_shape_is_infrastructure_error() {
        let provisioner = MockProvisioner::new().with_multipath(false);
        let test = Test::new("multipath", noop).with_multipath_disk(true);
        let record = runner(&provisioner).run_one(&test).await;
        assert!(outcome(&record).is_infrastructure_error());
    }

    #[tokio::test]
    async fn unregistered_empty_cluster_is_not_passed() {
        let provisioner = MockProvisioner::new();
        let test = Test::new("empty", noop).with_cluster_size(0);
        let records = runner(&provisioner).run_tests(vec![test]).await;

        assert!(outcome(&records[0]).is_infrastructure_error());
        assert!(provisioner.requests().is_empty());
    }

    #[tokio::test]
    async fn assertion_failure_names_expected_and_actual() {
        let provisioner = MockProvisioner::new().on_create(|channel| {
            channel.respond("findmnt -nvr /boot -o SOURCE", "/dev/vda3\n");
        });
        async fn check(cluster: TestCluster) -> TestResult {
            let machine = cluster.machine(0)?;
            let source = cluster.ssh(machine, "findmnt -nvr /boot -o SOURCE").await?;
            probe_ensure_eq!(source.as_str(), "/dev/mapper/mpatha3", "source of /boot");
            Ok(())
        }
        let test = Test::new("check", check);

        let record = runner(&provisioner).run_one(&test).await;
        match outcome(&record) {
            TestOutcome::Failed(reason) => {
                assert!(reason.contains("/dev/mapper/mpatha3"));
                assert!(reason.contains("/dev/vda3"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(provisioner.live_count(), 0);
    }

    #[tokio::test]
    async fn non_zero_exit_is_failed() {
        let provisioner = MockProvisioner::new();
        async fn missing_binary(cluster: TestCluster) -> TestResult {
            cluster.ssh(cluster.machine(0)?, "frobnicate").await?;
            Ok(())
        }
        let test = Test::new("missing-binary", missing_binary);
        let record = runner(&provisioner).run_one(&test).await;
        assert!(matches!(outcome(&record), TestOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn panic_is_contained_as_failure() {
        let provisioner = MockProvisioner::new();
        let test = Test::new("panics", |_: TestCluster| async move {
            assert_eq!(1 + 1, 3, "arithmetic is broken");
            TestResult::Ok(())
        });

        let record = runner(&provisioner).run_one(&test).await;
        match outcome(&record) {
            TestOutcome::Failed(reason) => {
                assert!(reason.starts_with("routine panicked"));
                assert!(reason.contains("arithmetic is broken"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(provisioner.live_count(), 0);
    }

    #[tokio::test]
    async fn connection_drop_is_infrastructure_error() {
        let provisioner = MockProvisioner::new().on_create(|channel| {
            channel.respond("true", "");
        });
        async fn drop_then_run(provisioner: MockProvisioner, cluster: TestCluster) -> TestResult {
            let (_, channel) = provisioner.machines()[0].clone();
            channel.fail_next("connection reset by peer");
            cluster.ssh(cluster.machine(0)?, "true").await?;
            Ok(())
        }
        let test = {
            let provisioner = provisioner.clone();
            Test::new("drop", move |cluster| {
                drop_then_run(provisioner.clone(), cluster)
            })
        };

        let record = runner(&provisioner).run_one(&test).await;
        assert!(outcome(&record).is_infrastructure_error());
    }

    #[tokio::test]
    async fn reboot_timeout_is_infrastructure_error() {
        let provisioner = MockProvisioner::new().on_create(|channel| channel.stick_after_reboot());
        async fn reboot(cluster: TestCluster) -> TestResult {
            cluster.machine(0)?.reboot().await?;
            Ok(())
        }
        let test = Test::new("reboot", reboot);

        let record = runner(&provisioner).run_one(&test).await;
        let outcome = outcome(&record);
        assert!(outcome.is_infrastructure_error());
        assert!(outcome.reason().unwrap().contains("reboot"));
        assert_eq!(provisioner.live_count(), 0);
    }

    #[tokio::test]
    async fn routine_infrastructure_error_is_kept() {
        let provisioner = MockProvisioner::new();
        async fn infra(_: TestCluster) -> TestResult {
            Err(TestError::Infrastructure("image missing".into()))
        }
        let test = Test::new("infra", infra);
        let record = runner(&provisioner).run_one(&test).await;
        assert_eq!(
            outcome(&record),
            TestOutcome::InfrastructureError("image missing".into())
        );
    }

    #[tokio::test]
    async fn timeout_fails_and_tears_down() {
        let provisioner = MockProvisioner::new();
        let test = Test::new("slow", |_: TestCluster| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            TestResult::Ok(())
        })
        .with_timeout(Duration::from_millis(50));

        let record = runner(&provisioner).run_one(&test).await;
        match outcome(&record) {
            TestOutcome::Failed(reason) => assert!(reason.starts_with("timed out after")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(provisioner.live_count(), 0);
    }

    #[tokio::test]
    async fn teardown_error_does_not_overwrite_outcome() {
        let provisioner = MockProvisioner::new();
        provisioner.fail_next_destroy("api unavailable");
        let record = runner(&provisioner).run_one(&Test::new("basic", noop)).await;

        assert_eq!(outcome(&record), TestOutcome::Passed);
        assert_eq!(provisioner.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn failed_test_does_not_stop_the_run() {
        let provisioner = MockProvisioner::new();
        async fn boom(_: TestCluster) -> TestResult {
            Err(TestError::failed("boom"))
        }
        let tests = vec![Test::new("first", boom), Test::new("second", noop)];
        let records = runner(&provisioner).run_tests(tests).await;

        assert_eq!(records.len(), 2);
        assert!(matches!(outcome(&records[0]), TestOutcome::Failed(_)));
        assert_eq!(outcome(&records[1]), TestOutcome::Passed);
    }

    #[tokio::test]
    async fn parallel_runs_keep_input_order_and_bound() {
        let provisioner = MockProvisioner::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tests: Vec<Test> = [40u64, 5, 20, 1, 10]
            .iter()
            .enumerate()
            .map(|(i, &millis)| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                Test::new(format!("t{i}"), move |_: TestCluster| {
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(millis)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        TestResult::Ok(())
                    }
                })
            })
            .collect();

        let runner = Runner::new(
            Arc::new(provisioner.clone()),
            RunnerOptions {
                parallel: 2,
                ..options()
            },
        );
        let records = runner.run_tests(tests).await;

        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["t0", "t1", "t2", "t3", "t4"]);
        assert!(records.iter().all(|r| outcome(r).is_passed()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(provisioner.live_count(), 0);
    }

    #[tokio::test]
    async fn run_uses_registry_selection() {
        let provisioner = MockProvisioner::new();
        let mut registry = TestRegistry::new();
        registry.register(Test::new("reboot.boot-id", noop)).unwrap();
        registry.register(Test::new("multipath", noop)).unwrap();
        registry.register(Test::new("reboot.twice", noop)).unwrap();

        let selection = Selection::all().with_patterns(&["reboot.*"]).unwrap();
        let records = runner(&provisioner).run(&registry, &selection).await;

        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["reboot.boot-id", "reboot.twice"]);
    }

    #[test]
    fn panic_payloads() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }
}
