//! # Shared Capture Core (eBPF ↔ Userspace)
//!
//! Record layouts, constants, and the capture logic itself. The handlers in
//! [`process`] and [`tls`] are written against small traits rather than aya
//! types, so the kernel crate binds them to real maps and helpers while tests
//! run them on the host against [`ring::EventRing`] and
//! [`correlation::CallTable`].
//!
//! ## Key Types
//!
//! - [`ProcessEvent`] - exec / exit / fork record
//! - [`SslDataEvent`] - plaintext captured at `SSL_read` / `SSL_write`
//! - [`PendingCall`] - what an entry probe leaves for its return probe
//! - [`EventChannel`] / [`CorrelationStore`] - the two shared seams
//!
//! Everything here is `no_std` and allocation-free. With the `user` feature
//! the records also implement `aya::Pod`.

#![no_std]

pub mod bounded;
pub mod channel;
pub mod config;
pub mod context;
pub mod correlation;
pub mod event;
pub mod filter;
pub mod process;
pub mod ring;
pub mod stats;
pub mod sync;
pub mod tls;

pub use channel::{EventChannel, ReservedSlot};
pub use config::{
    CaptureConfig, TaskLayout, FLAG_COMM_FILTER, FLAG_LEADER_EXITS_ONLY, FLAG_PID_FILTER,
};
pub use context::{AllTargets, MemoryReader, ReadFault, TargetFilter, TaskContext};
pub use correlation::{CallTable, CorrelationStore, StoreError};
pub use event::{
    Direction, PendingCall, ProcessEvent, ProcessKind, Record, SslDataEvent, PROC_EXEC,
    PROC_EXIT, PROC_FORK, RECORD_PROCESS, RECORD_SSL_DATA, SSL_READ, SSL_WRITE,
};
pub use filter::{comm_key, TargetRules, TargetSets};
pub use process::{ProcessCapture, SchedProcessExecArgs, SchedProcessForkArgs};
pub use ring::EventRing;
pub use stats::{AtomicCounters, Counter, Counters, COUNTER_SLOTS};
pub use tls::TlsCapture;

// ============================================================================
// Capacities
// ============================================================================

/// Kernel `TASK_COMM_LEN`
pub const COMM_LEN: usize = 16;

/// Executable path capacity, including the terminating NUL
pub const MAX_PATH_LEN: usize = 256;

/// Argument string capacity, including the terminating NUL
pub const MAX_ARGS_LEN: usize = 256;

/// Maximum plaintext bytes captured per TLS call
///
/// A power of two so the kernel side can bound copy lengths with a mask the
/// verifier understands.
pub const MAX_DATA_SIZE: usize = 16384;

/// Default byte size of each kernel ring buffer
pub const DEFAULT_RING_BYTES: u32 = 256 * 1024;

/// Default Correlation Store capacity per call kind
pub const DEFAULT_PENDING_CALLS: u32 = 10240;

/// Capacity of the `TARGET_PIDS` map
pub const MAX_TARGET_PIDS: u32 = 1024;

/// Capacity of the `TARGET_COMMS` map
pub const MAX_TARGET_COMMS: u32 = 64;

const _: () = assert!(MAX_DATA_SIZE.is_power_of_two());

// ============================================================================
// Userspace-only trait implementations
// ============================================================================

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl aya::Pod for ProcessEvent {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl aya::Pod for SslDataEvent {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl aya::Pod for PendingCall {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl aya::Pod for CaptureConfig {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl aya::Pod for TaskLayout {}
