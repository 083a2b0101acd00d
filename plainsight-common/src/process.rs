//! # Process Lifecycle Capturer
//!
//! One handler per `sched` tracepoint. Each invocation reserves a
//! [`ProcessEvent`], fills it from the current task, and commits it. The only
//! failure that loses an event is a full channel (or a faulting filename read
//! on exec), and both are counted rather than reported.

use crate::bounded::{clear_str, copy_str, nul_terminate};
use crate::channel::{EventChannel, ReservedSlot};
use crate::config::{CaptureConfig, FLAG_LEADER_EXITS_ONLY};
use crate::context::{MemoryReader, TaskContext};
use crate::event::{ProcessEvent, ProcessKind, RECORD_PROCESS};
use crate::stats::{Counter, Counters};
use crate::COMM_LEN;

/// Tracepoint arguments for `sched/sched_process_exec`
///
/// Layout from `/sys/kernel/tracing/events/sched/sched_process_exec/format`.
#[repr(C)]
pub struct SchedProcessExecArgs {
    /// Common tracepoint fields
    #[allow(clippy::pub_underscore_fields)]
    pub __unused__: u64,

    /// `__data_loc char[] filename`: low 16 bits are the offset of the string
    /// from the start of the record, high 16 bits its length
    pub filename_loc: u32,

    pub pid: i32,
    pub old_pid: i32,
}

impl SchedProcessExecArgs {
    /// Offset of the filename string from the start of the record
    #[must_use]
    pub const fn filename_offset(&self) -> usize {
        (self.filename_loc & 0xFFFF) as usize
    }
}

/// Tracepoint arguments for `sched/sched_process_fork`
#[repr(C)]
pub struct SchedProcessForkArgs {
    /// Common tracepoint fields
    #[allow(clippy::pub_underscore_fields)]
    pub __unused__: u64,
    pub parent_comm: [u8; COMM_LEN],
    pub parent_pid: i32,
    pub child_comm: [u8; COMM_LEN],
    pub child_pid: i32,
}

pub struct ProcessCapture<'a, C, S> {
    events: &'a C,
    counters: &'a S,
    config: CaptureConfig,
}

impl<'a, C: EventChannel, S: Counters> ProcessCapture<'a, C, S> {
    pub const fn new(events: &'a C, counters: &'a S, config: CaptureConfig) -> Self {
        Self { events, counters, config }
    }

    /// `sched_process_exec`: the current task replaced its image with the
    /// file whose name lives at `filename` in kernel memory.
    pub fn on_exec<T: TaskContext, M: MemoryReader>(&self, task: &T, kernel: &M, filename: u64) {
        let Some(mut slot) = self.events.reserve::<ProcessEvent>() else {
            self.counters.bump(Counter::ChannelFull);
            return;
        };

        let event = slot.record();
        stamp(event, task, ProcessKind::Exec);
        event.ppid = task.parent_tgid();
        event.exit_code = 0;
        event.comm = task.comm();
        nul_terminate(&mut event.comm);
        clear_str(&mut event.args);

        if kernel.read_str(filename, &mut event.exe).is_err() {
            slot.discard();
            self.counters.bump(Counter::ReadFault);
            return;
        }
        nul_terminate(&mut event.exe);

        slot.commit();
        self.counters.bump(Counter::Emitted);
    }

    /// `sched_process_exit`: the current task is terminating.
    ///
    /// Every firing is reported, one per exiting thread. With
    /// [`FLAG_LEADER_EXITS_ONLY`] set, non-leader threads are skipped.
    pub fn on_exit<T: TaskContext>(&self, task: &T) {
        if task.tgid() != task.tid() && self.config.has(FLAG_LEADER_EXITS_ONLY) {
            return;
        }

        let Some(mut slot) = self.events.reserve::<ProcessEvent>() else {
            self.counters.bump(Counter::ChannelFull);
            return;
        };

        let event = slot.record();
        stamp(event, task, ProcessKind::Exit);
        event.ppid = task.parent_tgid();
        event.exit_code = task.exit_code();
        event.comm = task.comm();
        nul_terminate(&mut event.comm);
        clear_str(&mut event.exe);
        clear_str(&mut event.args);

        slot.commit();
        self.counters.bump(Counter::Emitted);
    }

    /// `sched_process_fork`: fires in the parent after the child exists.
    ///
    /// Both `pid` and `ppid` record the parent and `exit_code` carries the
    /// child's pid. The child task is not read.
    pub fn on_fork<T: TaskContext>(&self, task: &T, fork: &SchedProcessForkArgs) {
        let Some(mut slot) = self.events.reserve::<ProcessEvent>() else {
            self.counters.bump(Counter::ChannelFull);
            return;
        };

        let event = slot.record();
        stamp(event, task, ProcessKind::Fork);
        event.ppid = event.pid;
        event.exit_code = fork.child_pid;
        copy_str(&mut event.comm, &fork.parent_comm);
        clear_str(&mut event.exe);
        clear_str(&mut event.args);

        slot.commit();
        self.counters.bump(Counter::Emitted);
    }
}

/// Fields every lifecycle record takes from the current task
#[inline(always)]
fn stamp<T: TaskContext>(event: &mut ProcessEvent, task: &T, kind: ProcessKind) {
    event.tag = RECORD_PROCESS;
    event._pad0 = [0; 4];
    event.timestamp_ns = task.ktime_ns();
    event.pid = task.tgid();
    event.uid = task.uid();
    event.gid = task.gid();
    event.kind = kind as u8;
    event._pad1 = [0; 3];
}
