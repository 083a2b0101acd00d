//! What a handler can see of the context that triggered it.

use crate::COMM_LEN;

/// Identity and task fields of the currently executing thread
pub trait TaskContext {
    /// `tgid << 32 | tid`
    fn pid_tgid(&self) -> u64;

    /// `gid << 32 | uid`
    fn uid_gid(&self) -> u64;

    /// Monotonic nanoseconds
    fn ktime_ns(&self) -> u64;

    /// Command name of the current thread
    fn comm(&self) -> [u8; COMM_LEN];

    /// `current->real_parent->tgid`, 0 when the task layout is unknown
    fn parent_tgid(&self) -> u32;

    /// `current->exit_code`, 0 when the task layout is unknown
    fn exit_code(&self) -> i32;

    #[allow(clippy::cast_possible_truncation)]
    fn tgid(&self) -> u32 {
        (self.pid_tgid() >> 32) as u32
    }

    #[allow(clippy::cast_possible_truncation)]
    fn tid(&self) -> u32 {
        self.pid_tgid() as u32
    }

    #[allow(clippy::cast_possible_truncation)]
    fn uid(&self) -> u32 {
        self.uid_gid() as u32
    }

    #[allow(clippy::cast_possible_truncation)]
    fn gid(&self) -> u32 {
        (self.uid_gid() >> 32) as u32
    }
}

/// A probe read hit unmapped or inaccessible memory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadFault;

/// Fault-tolerant reads from an address space the handler does not own
pub trait MemoryReader {
    /// Copy exactly `dst.len()` bytes starting at `src`.
    ///
    /// # Errors
    /// [`ReadFault`] if any byte of the range is not readable.
    fn read_bytes(&self, src: u64, dst: &mut [u8]) -> Result<(), ReadFault>;

    /// Copy a NUL-terminated string starting at `src`, truncating to fit and
    /// always terminating within `dst`. Returns the length without the NUL.
    ///
    /// # Errors
    /// [`ReadFault`] if the first byte is not readable.
    fn read_str(&self, src: u64, dst: &mut [u8]) -> Result<usize, ReadFault>;
}

/// Decides whether the current process is a capture target
///
/// A filter may look at the thread-group id, the command name, or both.
pub trait TargetFilter {
    fn wants<T: TaskContext>(&self, task: &T) -> bool;
}

/// Filter that targets every process
#[derive(Clone, Copy, Debug, Default)]
pub struct AllTargets;

impl TargetFilter for AllTargets {
    fn wants<T: TaskContext>(&self, _task: &T) -> bool {
        true
    }
}
