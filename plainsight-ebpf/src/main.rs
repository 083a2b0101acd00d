//! # eBPF Kernel-Side Instrumentation
//!
//! Binds the capture core in `plainsight-common` to kernel maps and helpers.
//! All decisions (what to record, when to drop) live in the common crate; the
//! programs here only gather arguments and hand them over.
//!
//! ## Programs
//!
//! - **Tracepoints**: `sched_process_exec`, `sched_process_exit`,
//!   `sched_process_fork` - process lifecycle
//! - **Uprobes**: `ssl_read`, `ssl_write` - remember the buffer argument
//! - **Uretprobes**: `ssl_read_ret`, `ssl_write_ret` - copy what moved
//!
//! ## Maps (Shared with Userspace)
//!
//! - `PROCESS_EVENTS`, `TLS_EVENTS` - ring buffers, one per capturer
//! - `SSL_READ_ARGS`, `SSL_WRITE_ARGS` - pending calls keyed by `pid_tgid`
//! - `TARGET_PIDS`, `TARGET_COMMS`, `CONFIG`, `TASK_LAYOUT` - written once
//!   before attach
//! - `CAPTURE_STATS` - per-CPU drop and emit counters
//!
//! Map sizes below are defaults; the loader may resize them.
//!
//! ## Build
//!
//! ```bash
//! cargo xtask build-ebpf --release
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_task,
        bpf_get_current_uid_gid, bpf_ktime_get_ns, bpf_probe_read_kernel,
        bpf_probe_read_kernel_buf, bpf_probe_read_kernel_str_bytes, bpf_probe_read_user_buf,
        bpf_probe_read_user_str_bytes,
    },
    macros::{map, tracepoint, uprobe, uretprobe},
    maps::{ring_buf::RingBufEntry, Array, HashMap, PerCpuArray, RingBuf},
    programs::{ProbeContext, RetProbeContext, TracePointContext},
    EbpfContext,
};
use aya_log_ebpf::debug;
use plainsight_common::{
    CaptureConfig, CorrelationStore, Counter, Counters, Direction, EventChannel, MemoryReader,
    PendingCall, ProcessCapture, ReadFault, Record, ReservedSlot, SchedProcessExecArgs,
    SchedProcessForkArgs, StoreError, TargetRules, TargetSets, TaskContext, TaskLayout,
    TlsCapture, COMM_LEN, COUNTER_SLOTS, DEFAULT_PENDING_CALLS, DEFAULT_RING_BYTES,
    MAX_DATA_SIZE, MAX_TARGET_COMMS, MAX_TARGET_PIDS,
};

// ============================================================================
// eBPF Maps - Shared data structures between kernel and userspace
// ============================================================================

/// Lifecycle records (`ProcessEvent`, 568 bytes each)
#[map]
static PROCESS_EVENTS: RingBuf = RingBuf::with_byte_size(DEFAULT_RING_BYTES, 0);

/// TLS plaintext records (`SslDataEvent`, 16440 bytes each)
///
/// At the default 256KB this holds 15 records; a burst beyond that drops.
#[map]
static TLS_EVENTS: RingBuf = RingBuf::with_byte_size(DEFAULT_RING_BYTES, 0);

/// `pid_tgid` → arguments of an `SSL_read` still in flight
#[map]
static SSL_READ_ARGS: HashMap<u64, PendingCall> =
    HashMap::with_max_entries(DEFAULT_PENDING_CALLS, 0);

/// `pid_tgid` → arguments of an `SSL_write` still in flight
#[map]
static SSL_WRITE_ARGS: HashMap<u64, PendingCall> =
    HashMap::with_max_entries(DEFAULT_PENDING_CALLS, 0);

/// Thread-group ids whose TLS calls are recorded when `FLAG_PID_FILTER` is set
#[map]
static TARGET_PIDS: HashMap<u32, u8> = HashMap::with_max_entries(MAX_TARGET_PIDS, 0);

/// Zero-padded command names whose TLS calls are recorded when
/// `FLAG_COMM_FILTER` is set
#[map]
static TARGET_COMMS: HashMap<[u8; COMM_LEN], u8> =
    HashMap::with_max_entries(MAX_TARGET_COMMS, 0);

/// Index 0: [`CaptureConfig`]
#[map]
static CONFIG: Array<CaptureConfig> = Array::with_max_entries(1, 0);

/// Index 0: [`TaskLayout`] resolved from kernel BTF
#[map]
static TASK_LAYOUT: Array<TaskLayout> = Array::with_max_entries(1, 0);

/// One `u64` per [`Counter`], summed across CPUs by userspace
#[map]
static CAPTURE_STATS: PerCpuArray<u64> = PerCpuArray::with_max_entries(COUNTER_SLOTS, 0);

// ============================================================================
// Bindings of the capture seams to kernel facilities
// ============================================================================

struct KernelRing(&'static RingBuf);

struct KernelSlot<T: 'static>(RingBufEntry<T>);

impl EventChannel for KernelRing {
    type Slot<'a, T: Record>
        = KernelSlot<T>
    where
        Self: 'a;

    #[inline(always)]
    fn reserve<T: Record>(&self) -> Option<KernelSlot<T>> {
        self.0.reserve::<T>(0).map(KernelSlot)
    }
}

impl<T: Record> ReservedSlot<T> for KernelSlot<T> {
    #[inline(always)]
    fn record(&mut self) -> &mut T {
        // Record types accept any byte pattern, so uninitialised slot memory
        // is a valid T.
        unsafe { &mut *self.0.as_mut_ptr() }
    }

    #[inline(always)]
    fn commit(self) {
        self.0.submit(0);
    }

    #[inline(always)]
    fn discard(self) {
        self.0.discard(0);
    }
}

struct KernelStore(&'static HashMap<u64, PendingCall>);

impl CorrelationStore for KernelStore {
    #[inline(always)]
    fn insert(&self, key: u64, call: PendingCall) -> Result<(), StoreError> {
        self.0.insert(&key, &call, 0).map_err(|_| StoreError::Full)
    }

    #[inline(always)]
    fn take(&self, key: u64) -> Option<PendingCall> {
        let call = unsafe { self.0.get(&key) }.copied()?;
        let _ = self.0.remove(&key);
        Some(call)
    }
}

/// The task running the program, with `task_struct` offsets from userspace
struct KernelTask {
    layout: TaskLayout,
}

impl KernelTask {
    #[inline(always)]
    fn current() -> Self {
        let layout = unsafe { TASK_LAYOUT.get(0) }.copied().unwrap_or_default();
        Self { layout }
    }

    /// Read a field at `offset` inside the current `task_struct`
    #[inline(always)]
    fn read_field<T: Copy>(base: *const u8, offset: u32) -> Option<T> {
        if base.is_null() {
            return None;
        }
        unsafe { bpf_probe_read_kernel(base.add(offset as usize).cast::<T>()).ok() }
    }
}

impl TaskContext for KernelTask {
    fn pid_tgid(&self) -> u64 {
        unsafe { bpf_get_current_pid_tgid() }
    }

    fn uid_gid(&self) -> u64 {
        unsafe { bpf_get_current_uid_gid() }
    }

    fn ktime_ns(&self) -> u64 {
        unsafe { bpf_ktime_get_ns() }
    }

    fn comm(&self) -> [u8; COMM_LEN] {
        bpf_get_current_comm().unwrap_or([0; COMM_LEN])
    }

    fn parent_tgid(&self) -> u32 {
        if !self.layout.is_resolved() {
            return 0;
        }
        let task = unsafe { bpf_get_current_task() } as *const u8;
        let parent: *const u8 =
            Self::read_field(task, self.layout.real_parent).unwrap_or(core::ptr::null());
        Self::read_field::<i32>(parent, self.layout.tgid).map_or(0, |tgid| tgid as u32)
    }

    fn exit_code(&self) -> i32 {
        if !self.layout.is_resolved() {
            return 0;
        }
        let task = unsafe { bpf_get_current_task() } as *const u8;
        Self::read_field(task, self.layout.exit_code).unwrap_or(0)
    }
}

struct KernelMemory;

impl MemoryReader for KernelMemory {
    fn read_bytes(&self, src: u64, dst: &mut [u8]) -> Result<(), ReadFault> {
        unsafe { bpf_probe_read_kernel_buf(src as *const u8, dst) }.map_err(|_| ReadFault)
    }

    fn read_str(&self, src: u64, dst: &mut [u8]) -> Result<usize, ReadFault> {
        unsafe { bpf_probe_read_kernel_str_bytes(src as *const u8, dst) }
            .map(<[u8]>::len)
            .map_err(|_| ReadFault)
    }
}

struct UserMemory;

impl MemoryReader for UserMemory {
    fn read_bytes(&self, src: u64, dst: &mut [u8]) -> Result<(), ReadFault> {
        // Bound the length for the verifier
        if dst.len() > MAX_DATA_SIZE {
            return Err(ReadFault);
        }
        unsafe { bpf_probe_read_user_buf(src as *const u8, dst) }.map_err(|_| ReadFault)
    }

    fn read_str(&self, src: u64, dst: &mut [u8]) -> Result<usize, ReadFault> {
        unsafe { bpf_probe_read_user_str_bytes(src as *const u8, dst) }
            .map(<[u8]>::len)
            .map_err(|_| ReadFault)
    }
}

struct KernelTargets;

impl TargetSets for KernelTargets {
    fn has_pid(&self, tgid: u32) -> bool {
        unsafe { TARGET_PIDS.get(&tgid) }.is_some()
    }

    fn has_comm(&self, comm: &[u8; COMM_LEN]) -> bool {
        unsafe { TARGET_COMMS.get(comm) }.is_some()
    }
}

struct PerCpuStats;

impl Counters for PerCpuStats {
    #[inline(always)]
    fn bump(&self, counter: Counter) {
        if let Some(slot) = CAPTURE_STATS.get_ptr_mut(counter as u32) {
            unsafe { *slot += 1 };
        }
    }
}

#[inline(always)]
fn capture_config() -> CaptureConfig {
    unsafe { CONFIG.get(0) }.copied().unwrap_or_default()
}

// ============================================================================
// Process lifecycle
// ============================================================================

#[tracepoint]
pub fn sched_process_exec(ctx: TracePointContext) -> u32 {
    let _ = try_sched_process_exec(&ctx);
    0
}

fn try_sched_process_exec(ctx: &TracePointContext) -> Result<(), i64> {
    // Layout from /sys/kernel/tracing/events/sched/sched_process_exec/format
    let args: SchedProcessExecArgs = unsafe { ctx.read_at(0)? };
    let filename = ctx.as_ptr() as u64 + args.filename_offset() as u64;

    let events = KernelRing(&PROCESS_EVENTS);
    ProcessCapture::new(&events, &PerCpuStats, capture_config())
        .on_exec(&KernelTask::current(), &KernelMemory, filename);
    Ok(())
}

#[tracepoint]
pub fn sched_process_exit(ctx: TracePointContext) -> u32 {
    let _ = try_sched_process_exit(&ctx);
    0
}

fn try_sched_process_exit(_ctx: &TracePointContext) -> Result<(), i64> {
    let events = KernelRing(&PROCESS_EVENTS);
    ProcessCapture::new(&events, &PerCpuStats, capture_config()).on_exit(&KernelTask::current());
    Ok(())
}

#[tracepoint]
pub fn sched_process_fork(ctx: TracePointContext) -> u32 {
    let _ = try_sched_process_fork(&ctx);
    0
}

fn try_sched_process_fork(ctx: &TracePointContext) -> Result<(), i64> {
    let args: SchedProcessForkArgs = unsafe { ctx.read_at(0)? };

    let events = KernelRing(&PROCESS_EVENTS);
    ProcessCapture::new(&events, &PerCpuStats, capture_config())
        .on_fork(&KernelTask::current(), &args);
    Ok(())
}

// ============================================================================
// TLS boundary
// ============================================================================

/// Run `f` against the TLS capturer bound to this program's maps
#[inline(always)]
fn with_tls<R>(
    f: impl FnOnce(
        &TlsCapture<'_, KernelRing, KernelStore, TargetRules<'_, KernelTargets>, PerCpuStats>,
    ) -> R,
) -> R {
    let events = KernelRing(&TLS_EVENTS);
    let reads = KernelStore(&SSL_READ_ARGS);
    let writes = KernelStore(&SSL_WRITE_ARGS);
    let targets = TargetRules::new(capture_config(), &KernelTargets);
    f(&TlsCapture::new(&events, &reads, &writes, &targets, &PerCpuStats))
}

/// Hook: `int SSL_read(SSL *ssl, void *buf, int num)`
#[uprobe]
pub fn ssl_read(ctx: ProbeContext) -> u32 {
    let _ = try_ssl_entry(&ctx, Direction::Read);
    0
}

/// Hook: `int SSL_write(SSL *ssl, const void *buf, int num)`
#[uprobe]
pub fn ssl_write(ctx: ProbeContext) -> u32 {
    let _ = try_ssl_entry(&ctx, Direction::Write);
    0
}

fn try_ssl_entry(ctx: &ProbeContext, direction: Direction) -> Result<(), i64> {
    let Some(buf) = ctx.arg::<u64>(1) else {
        debug!(ctx, "ssl entry: buf argument unavailable");
        return Err(1);
    };
    let num: i32 = ctx.arg(2).ok_or(1i64)?;
    let requested = u64::try_from(num).unwrap_or(0);

    with_tls(|tls| tls.on_entry(direction, &KernelTask::current(), buf, requested));
    Ok(())
}

#[uretprobe]
pub fn ssl_read_ret(ctx: RetProbeContext) -> u32 {
    let _ = try_ssl_return(&ctx, Direction::Read);
    0
}

#[uretprobe]
pub fn ssl_write_ret(ctx: RetProbeContext) -> u32 {
    let _ = try_ssl_return(&ctx, Direction::Write);
    0
}

fn try_ssl_return(ctx: &RetProbeContext, direction: Direction) -> Result<(), i64> {
    // An unreadable return value still has to clear the pending call
    let ret: i32 = ctx.ret().unwrap_or(0);

    with_tls(|tls| tls.on_return(direction, &KernelTask::current(), &UserMemory, i64::from(ret)));
    Ok(())
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";
