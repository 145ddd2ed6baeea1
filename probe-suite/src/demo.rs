//! Scripted mock machines that pass the built-in suite.
//!
//! Used by `vmprobe --mock` and by the suite's own tests.

use crate::misc::multipath::{self, ENABLE_MULTIPATH_COMMAND};
use probe_core::MockChannel;

/// Script `channel` like a healthy machine: kernel arguments are accepted
/// and, after the next reboot, the root comes up on multipath.
pub fn script_machine(channel: &MockChannel) {
    channel.respond(ENABLE_MULTIPATH_COMMAND, "");
    channel.respond(&multipath::mount_source_command("/sysroot"), "/dev/vda4\n");
    channel.respond(&multipath::mount_source_command("/boot"), "/dev/vda3\n");
    channel.respond_after_reboot(
        &multipath::mount_source_command("/sysroot"),
        "/dev/mapper/mpatha4\n",
    );
    channel.respond_after_reboot(
        &multipath::mount_source_command("/boot"),
        "/dev/mapper/mpatha3\n",
    );
    channel.set_stale_polls(1);
    channel.set_offline_polls(2);
}
