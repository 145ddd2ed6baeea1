//! Reboot tests.

use probe_core::{probe_ensure, Test, TestCluster, TestResult};

/// The `reboot.boot-id` test descriptor.
pub fn boot_id() -> Test {
    Test::new("reboot.boot-id", run_boot_id)
        .with_description("a reboot comes back with a new boot id")
        .with_tags(&["reboot"])
}

async fn run_boot_id(cluster: TestCluster) -> TestResult {
    let machine = cluster.machine(0)?;
    let before = machine.boot_id().await?;
    machine.reboot().await?;
    let after = machine.boot_id().await?;

    probe_ensure!(before != after, "boot id {before} unchanged after reboot");
    Ok(())
}
