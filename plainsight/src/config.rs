//! Validated sensor configuration
//!
//! [`SensorConfig`] is built once from the command line and is the only
//! source of capacities and flags for the loader. Capacity mistakes are
//! rejected here rather than surfacing as verifier or map-creation errors.

use plainsight_common::ring::record_footprint;
use plainsight_common::{
    comm_key, CaptureConfig, ProcessEvent, SslDataEvent, COMM_LEN, FLAG_COMM_FILTER,
    FLAG_LEADER_EXITS_ONLY, FLAG_PID_FILTER, MAX_TARGET_COMMS, MAX_TARGET_PIDS,
};
use std::mem::size_of;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Args;
use crate::domain::{ConfigError, Pid};

/// Fallback when the page size cannot be queried
const DEFAULT_PAGE_SIZE: u32 = 4096;

#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Processes whose TLS calls are captured; empty means all
    pub targets: Vec<Pid>,
    /// Command names whose TLS calls are captured; empty means all
    pub target_comms: Vec<String>,
    pub tls_lib: Option<PathBuf>,
    pub process: bool,
    pub tls: bool,
    pub leader_exits_only: bool,
    pub process_ring_bytes: u32,
    pub tls_ring_bytes: u32,
    pub pending_calls: u32,
    pub export: Option<PathBuf>,
    pub duration: Option<Duration>,
    pub quiet: bool,
}

impl SensorConfig {
    /// Validate the command line.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a capacity is unusable or nothing would be
    /// captured.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        Self::validate(args, page_size())
    }

    fn validate(args: &Args, page_size: u32) -> Result<Self, ConfigError> {
        let process = !args.no_process;
        let tls = !args.no_tls;
        if !process && !tls {
            return Err(ConfigError::NothingEnabled);
        }

        if process {
            check_ring("process", args.process_ring_bytes, size_of::<ProcessEvent>(), page_size)?;
        }
        if tls {
            check_ring("tls", args.tls_ring_bytes, size_of::<SslDataEvent>(), page_size)?;
            if args.pending_calls == 0 {
                return Err(ConfigError::NoPendingCalls);
            }
        }

        if args.pids.len() > MAX_TARGET_PIDS as usize {
            return Err(ConfigError::TooManyTargets {
                count: args.pids.len(),
                max: MAX_TARGET_PIDS,
            });
        }
        let mut targets: Vec<Pid> = args.pids.iter().copied().map(Pid).collect();
        targets.sort_unstable();
        targets.dedup();

        let target_comms = target_comms(&args.comms)?;

        Ok(Self {
            targets,
            target_comms,
            tls_lib: args.tls_lib.clone(),
            process,
            tls,
            leader_exits_only: args.leader_exits_only,
            process_ring_bytes: args.process_ring_bytes,
            tls_ring_bytes: args.tls_ring_bytes,
            pending_calls: args.pending_calls,
            export: args.export.clone(),
            duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
            quiet: args.quiet,
        })
    }

    /// Flags written to the kernel `CONFIG` map
    #[must_use]
    pub fn capture_config(&self) -> CaptureConfig {
        let mut flags = 0;
        if !self.targets.is_empty() {
            flags |= FLAG_PID_FILTER;
        }
        if !self.target_comms.is_empty() {
            flags |= FLAG_COMM_FILTER;
        }
        if self.leader_exits_only {
            flags |= FLAG_LEADER_EXITS_ONLY;
        }
        CaptureConfig::new(flags)
    }

    /// Keys for the kernel `TARGET_COMMS` map
    #[must_use]
    pub fn comm_keys(&self) -> Vec<[u8; COMM_LEN]> {
        self.target_comms.iter().map(|name| comm_key(name.as_bytes())).collect()
    }

    /// The target when exactly one process is targeted
    #[must_use]
    pub fn single_target(&self) -> Option<Pid> {
        match self.targets.as_slice() {
            [pid] => Some(*pid),
            _ => None,
        }
    }
}

/// Names are matched against the kernel comm, which holds at most 15 bytes.
/// Longer names are cut to that and duplicates after cutting are dropped.
fn target_comms(names: &[String]) -> Result<Vec<String>, ConfigError> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if name.is_empty() || name.contains('\0') {
            return Err(ConfigError::BadComm(name.clone()));
        }
        let key = comm_key(name.as_bytes());
        if !out.iter().any(|seen| comm_key(seen.as_bytes()) == key) {
            out.push(name.clone());
        }
    }
    if out.len() > MAX_TARGET_COMMS as usize {
        return Err(ConfigError::TooManyComms { count: out.len(), max: MAX_TARGET_COMMS });
    }
    Ok(out)
}

/// A ring must be a power of two, at least a page, and fit one record.
fn check_ring(
    name: &'static str,
    bytes: u32,
    record_size: usize,
    page_size: u32,
) -> Result<(), ConfigError> {
    if !bytes.is_power_of_two() {
        return Err(ConfigError::RingNotPowerOfTwo { name, bytes });
    }
    let record = u32::try_from(record_footprint(record_size)).unwrap_or(u32::MAX);
    let min = page_size.max(record).next_power_of_two();
    if bytes < min {
        return Err(ConfigError::RingTooSmall { name, bytes, min });
    }
    Ok(())
}

#[allow(unsafe_code)]
fn page_size() -> u32 {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u32::try_from(size).ok().filter(|s| *s > 0).unwrap_or(DEFAULT_PAGE_SIZE)
}
