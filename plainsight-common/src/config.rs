//! Construction-time configuration written by the loader before attach.

/// TLS probes only record calls from processes in `TARGET_PIDS`
pub const FLAG_PID_FILTER: u32 = 1 << 0;

/// Report only thread-group leader exits instead of every task exit
pub const FLAG_LEADER_EXITS_ONLY: u32 = 1 << 1;

/// TLS probes only record calls from threads whose comm is in `TARGET_COMMS`
pub const FLAG_COMM_FILTER: u32 = 1 << 2;

/// Stored at index 0 of the `CONFIG` array map
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureConfig {
    pub flags: u32,
    #[allow(clippy::pub_underscore_fields)]
    pub _pad: u32,
}

impl CaptureConfig {
    #[must_use]
    pub const fn new(flags: u32) -> Self {
        Self { flags, _pad: 0 }
    }

    #[must_use]
    pub const fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

/// Byte offsets of the `task_struct` members the lifecycle capturer reads
///
/// Resolved from kernel BTF by userspace and stored at index 0 of the
/// `TASK_LAYOUT` array map. `resolved == 0` means the offsets are unknown and
/// the fields read as 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskLayout {
    /// `struct task_struct *real_parent`
    pub real_parent: u32,
    /// `pid_t tgid`
    pub tgid: u32,
    /// `int exit_code`
    pub exit_code: u32,
    pub resolved: u32,
}

impl TaskLayout {
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolved != 0
    }
}
