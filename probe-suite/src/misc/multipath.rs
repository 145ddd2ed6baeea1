//! Boot from a multipath root.
//!
//! The machine gets its boot disk over two paths. The test switches the
//! kernel command line to assemble the root through device-mapper
//! multipath, reboots, and checks that `/sysroot` and `/boot` are mounted
//! from `/dev/mapper/mpath*` devices.

use probe_core::{probe_ensure, Machine, Test, TestCluster, TestResult};

/// Appends the multipath kernel arguments for the next boot.
pub const ENABLE_MULTIPATH_COMMAND: &str = "sudo rpm-ostree kargs --append rd.multipath=default --append root=/dev/disk/by-label/dm-mpath-root";

/// Mounts that must come from a multipath device.
pub const MULTIPATH_MOUNTS: [&str; 2] = ["/sysroot", "/boot"];

/// Prefix of device-mapper multipath device nodes.
pub const MULTIPATH_DEVICE_PREFIX: &str = "/dev/mapper/mpath";

/// Command printing the source device of the mount at `path`.
pub fn mount_source_command(path: &str) -> String {
    format!("findmnt -nvr {path} -o SOURCE")
}

/// The `multipath` test descriptor.
pub fn test() -> Test {
    Test::new("multipath", run)
        .with_description("boot with the root filesystem on a multipath device")
        .with_cluster_size(1)
        .with_platforms(&["qemu-unpriv"])
        .with_multipath_disk(true)
        .with_tags(&["reboot", "storage"])
}

async fn run(cluster: TestCluster) -> TestResult {
    let machine = cluster.machine(0)?;
    cluster.ssh(machine, ENABLE_MULTIPATH_COMMAND).await?;
    machine.reboot().await?;

    for path in MULTIPATH_MOUNTS {
        verify_multipath(&cluster, machine, path).await?;
    }
    Ok(())
}

async fn verify_multipath(cluster: &TestCluster, machine: &Machine, path: &str) -> TestResult {
    let source = cluster.ssh(machine, &mount_source_command(path)).await?;
    tracing::debug!(machine = %machine.id(), path, %source, "mount source");
    probe_ensure!(
        source.starts_with(MULTIPATH_DEVICE_PREFIX),
        "mount {path} has non-multipath source {source}"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use probe_core::{MockChannel, MockProvisioner, PlatformId, Runner, RunnerOptions, TestOutcome};
    use std::sync::Arc;
    use std::time::Duration;

    fn runner(provisioner: &MockProvisioner) -> Runner {
        let mut options = RunnerOptions {
            default_timeout: Duration::from_secs(10),
            ..RunnerOptions::default()
        };
        options.machine.reboot_timeout_secs = 2;
        options.machine.reboot_poll_initial_ms = 1;
        options.machine.reboot_poll_max_ms = 10;
        Runner::new(Arc::new(provisioner.clone()), options)
    }

    async fn outcome(provisioner: &MockProvisioner) -> TestOutcome {
        let record = runner(provisioner).run_one(&test()).await;
        record.outcome().cloned().expect("completed record")
    }

    #[test]
    fn descriptor_shape() {
        let test = test();
        assert_eq!(test.name(), "multipath");
        assert_eq!(test.cluster_size(), 1);
        assert!(test.disk_spec().multipath);
        assert!(test.runs_on_platform(&PlatformId::from("qemu-unpriv")));
        assert!(!test.runs_on_platform(&PlatformId::from("aws")));
    }

    #[tokio::test]
    async fn passes_when_both_mounts_are_multipath() {
        let provisioner = MockProvisioner::new().on_create(demo::script_machine);
        assert_eq!(outcome(&provisioner).await, TestOutcome::Passed);

        let (_, channel) = provisioner.machines()[0].clone();
        assert_eq!(channel.reboot_requests(), 1);
        let history = channel.history();
        let kargs = history
            .iter()
            .position(|c| c == ENABLE_MULTIPATH_COMMAND)
            .unwrap();
        let check = history
            .iter()
            .position(|c| *c == mount_source_command("/sysroot"))
            .unwrap();
        assert!(kargs < check);
        assert_eq!(provisioner.live_count(), 0);
    }

    #[tokio::test]
    async fn fails_naming_path_and_source() {
        let provisioner = MockProvisioner::new().on_create(|channel: &MockChannel| {
            demo::script_machine(channel);
            channel.respond_after_reboot(&mount_source_command("/boot"), "/dev/vda3\n");
        });

        assert_eq!(
            outcome(&provisioner).await,
            TestOutcome::Failed("mount /boot has non-multipath source /dev/vda3".into())
        );
        assert_eq!(provisioner.live_count(), 0);
    }

    #[tokio::test]
    async fn fails_when_reboot_did_not_switch_root() {
        // Kernel arguments accepted but the mounts never change.
        let provisioner = MockProvisioner::new().on_create(|channel: &MockChannel| {
            channel.respond(ENABLE_MULTIPATH_COMMAND, "");
            channel.respond(&mount_source_command("/sysroot"), "/dev/vda4\n");
            channel.respond(&mount_source_command("/boot"), "/dev/vda3\n");
        });

        assert_eq!(
            outcome(&provisioner).await,
            TestOutcome::Failed("mount /sysroot has non-multipath source /dev/vda4".into())
        );
    }

    #[tokio::test]
    async fn kargs_failure_is_failed() {
        let provisioner = MockProvisioner::new().on_create(|channel: &MockChannel| {
            channel.respond_exit(ENABLE_MULTIPATH_COMMAND, 1, "error: rpm-ostree not found");
        });

        match outcome(&provisioner).await {
            TestOutcome::Failed(reason) => assert!(reason.contains("rpm-ostree not found")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn machine_lost_during_reboot_is_infrastructure_error() {
        let provisioner = MockProvisioner::new().on_create(|channel: &MockChannel| {
            demo::script_machine(channel);
            channel.stick_after_reboot();
        });

        assert!(outcome(&provisioner).await.is_infrastructure_error());
        assert_eq!(provisioner.live_count(), 0);
    }

    #[tokio::test]
    async fn skipped_without_supporting_backend() {
        let provisioner = MockProvisioner::new().supporting(&["aws"]);
        let record = runner(&provisioner).run_one(&test()).await;
        assert!(record.is_skipped());
        assert!(provisioner.requests().is_empty());
    }
}
