//! Fixed-layout records carried by the event channels.
//!
//! Both records start with a `u32` tag so a consumer can tell them apart
//! without out-of-band schema negotiation. Every field is an integer or a
//! byte array and all padding is explicit, so any byte pattern is a valid
//! record and the layout is identical on both sides of the ring buffer.

use crate::{COMM_LEN, MAX_ARGS_LEN, MAX_DATA_SIZE, MAX_PATH_LEN};

/// Tag of a [`ProcessEvent`] record
pub const RECORD_PROCESS: u32 = 1;

/// Tag of an [`SslDataEvent`] record
pub const RECORD_SSL_DATA: u32 = 2;

/// Process image replaced (`sched_process_exec`)
pub const PROC_EXEC: u8 = 0;
/// Task terminated (`sched_process_exit`)
pub const PROC_EXIT: u8 = 1;
/// Task created (`sched_process_fork`)
pub const PROC_FORK: u8 = 2;

/// Plaintext returned by `SSL_read`
pub const SSL_READ: u8 = 0;
/// Plaintext handed to `SSL_write`
pub const SSL_WRITE: u8 = 1;

/// A record that may be written in place into a reserved channel slot.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain only integers and byte arrays,
/// have no implicit padding, and have an alignment of at most 8. Channel
/// implementations rely on this to hand out `&mut Self` over raw slot memory.
#[allow(unsafe_code)]
pub unsafe trait Record: Copy + 'static {
    /// Leading tag written into every record of this type
    const TAG: u32;
}

/// Lifecycle transition kind
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessKind {
    Exec = PROC_EXEC,
    Exit = PROC_EXIT,
    Fork = PROC_FORK,
}

impl TryFrom<u8> for ProcessKind {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            PROC_EXEC => Ok(Self::Exec),
            PROC_EXIT => Ok(Self::Exit),
            PROC_FORK => Ok(Self::Fork),
            other => Err(other),
        }
    }
}

/// Direction of a TLS library call, also the call kind of a pending call
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Read = SSL_READ,
    Write = SSL_WRITE,
}

impl TryFrom<u8> for Direction {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            SSL_READ => Ok(Self::Read),
            SSL_WRITE => Ok(Self::Write),
            other => Err(other),
        }
    }
}

/// One process lifecycle transition
///
/// **Size**: 568 bytes, larger than the eBPF stack, so it is only ever built
/// in place inside a reserved ring buffer slot.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProcessEvent {
    /// Always [`RECORD_PROCESS`]
    pub tag: u32,
    #[allow(clippy::pub_underscore_fields)]
    pub _pad0: [u8; 4],

    /// Monotonic nanoseconds since boot (`bpf_ktime_get_ns()`)
    pub timestamp_ns: u64,

    /// Thread-group id (the userspace "pid")
    pub pid: u32,

    /// Thread-group id of the real parent
    ///
    /// For FORK this is the parent itself, same as `pid`.
    pub ppid: u32,

    pub uid: u32,
    pub gid: u32,

    /// One of [`PROC_EXEC`], [`PROC_EXIT`], [`PROC_FORK`]
    pub kind: u8,
    #[allow(clippy::pub_underscore_fields)]
    pub _pad1: [u8; 3],

    /// Auxiliary code, meaning depends on `kind`:
    /// - EXIT: raw `task->exit_code` (status << 8 | signal)
    /// - FORK: pid of the new child
    /// - EXEC: 0
    pub exit_code: i32,

    /// Command name, NUL-terminated
    pub comm: [u8; COMM_LEN],

    /// Executable path (EXEC only), NUL-terminated, truncated to fit
    pub exe: [u8; MAX_PATH_LEN],

    /// Reserved argument string, always empty
    pub args: [u8; MAX_ARGS_LEN],
}

impl ProcessEvent {
    /// Decoded kind, `None` for a byte outside the three known values
    #[must_use]
    pub fn kind(&self) -> Option<ProcessKind> {
        ProcessKind::try_from(self.kind).ok()
    }

    /// A zeroed record with its tag set
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            tag: RECORD_PROCESS,
            _pad0: [0; 4],
            timestamp_ns: 0,
            pid: 0,
            ppid: 0,
            uid: 0,
            gid: 0,
            kind: PROC_EXEC,
            _pad1: [0; 3],
            exit_code: 0,
            comm: [0; COMM_LEN],
            exe: [0; MAX_PATH_LEN],
            args: [0; MAX_ARGS_LEN],
        }
    }
}

#[allow(unsafe_code)]
unsafe impl Record for ProcessEvent {
    const TAG: u32 = RECORD_PROCESS;
}

/// Plaintext observed at the TLS library boundary
///
/// **Size**: 16440 bytes. Payload bytes past `data_len` are whatever the slot
/// held before; consumers must only look at `data[..data_len]`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SslDataEvent {
    /// Always [`RECORD_SSL_DATA`]
    pub tag: u32,
    #[allow(clippy::pub_underscore_fields)]
    pub _pad0: [u8; 4],

    pub timestamp_ns: u64,

    /// Thread-group id
    pub pid: u32,

    /// Thread id of the calling thread
    pub tid: u32,

    pub uid: u32,

    /// [`SSL_READ`] or [`SSL_WRITE`]
    pub direction: u8,
    #[allow(clippy::pub_underscore_fields)]
    pub _pad1: [u8; 3],

    /// Bytes captured into `data`, `1..=MAX_DATA_SIZE`
    pub data_len: u32,

    pub data: [u8; MAX_DATA_SIZE],

    /// Command name of the calling thread, NUL-terminated
    pub comm: [u8; COMM_LEN],

    #[allow(clippy::pub_underscore_fields)]
    pub _pad2: [u8; 4],
}

impl SslDataEvent {
    /// Decoded direction, `None` for an unknown byte
    #[must_use]
    pub fn direction(&self) -> Option<Direction> {
        Direction::try_from(self.direction).ok()
    }

    /// The captured bytes, never longer than the payload capacity
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let len = (self.data_len as usize).min(MAX_DATA_SIZE);
        &self.data[..len]
    }
}

#[allow(unsafe_code)]
unsafe impl Record for SslDataEvent {
    const TAG: u32 = RECORD_SSL_DATA;
}

/// Value of a Correlation Store entry: what the entry probe saw
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingCall {
    /// Buffer argument (user address)
    pub buf: u64,
    /// Requested length argument (`num`)
    pub requested: u64,
}

const _: () = assert!(core::mem::size_of::<ProcessEvent>() == 568);
const _: () = assert!(core::mem::size_of::<SslDataEvent>() == 16440);
const _: () = assert!(core::mem::align_of::<SslDataEvent>() <= 8);
