//! # eBPF Program Loading and Attachment
//!
//! Loads the compiled kernel programs, sizes and seeds their maps from
//! [`SensorConfig`], and attaches them.
//!
//! ## Attachment Points
//!
//! - **Tracepoints**: `sched/sched_process_{exec,exit,fork}` (lifecycle)
//! - **Uprobes**: `SSL_read`, `SSL_write` entry (pending call)
//! - **Uretprobes**: `SSL_read`, `SSL_write` return (plaintext record)
//!
//! Map sizes are applied with [`EbpfLoader::set_max_entries`] before the
//! object is loaded, so the compiled-in defaults only matter when the loader
//! is bypassed.

use anyhow::{Context, Result};
use aya::{
    include_bytes_aligned,
    maps::{Array, HashMap},
    programs::{TracePoint, UProbe},
    Ebpf, EbpfLoader,
};
use aya_log::EbpfLogger;
use log::{info, warn};
use plainsight_common::{CaptureConfig, TaskLayout, COMM_LEN};
use std::path::Path;

use crate::btf::{resolve_task_layout, Btf};
use crate::config::SensorConfig;
use crate::domain::{Pid, SensorError};

/// Lifecycle tracepoint programs, all in the `sched` category
const LIFECYCLE_TRACEPOINTS: [&str; 3] =
    ["sched_process_exec", "sched_process_exit", "sched_process_fork"];

/// `(program, library symbol, is return probe)`
const TLS_PROBES: [(&str, &str, bool); 4] = [
    ("ssl_read", "SSL_read", false),
    ("ssl_read_ret", "SSL_read", true),
    ("ssl_write", "SSL_write", false),
    ("ssl_write_ret", "SSL_write", true),
];

/// Load the eBPF program binary with map sizes taken from `config`.
///
/// Always uses the release build; debug builds pull in formatting code the
/// BPF target cannot link.
///
/// # Errors
/// Returns an error if the object is rejected by the kernel
pub fn load_ebpf_program(config: &SensorConfig) -> Result<Ebpf> {
    let mut loader = EbpfLoader::new();
    if config.process {
        loader.set_max_entries("PROCESS_EVENTS", config.process_ring_bytes);
    }
    if config.tls {
        loader
            .set_max_entries("TLS_EVENTS", config.tls_ring_bytes)
            .set_max_entries("SSL_READ_ARGS", config.pending_calls)
            .set_max_entries("SSL_WRITE_ARGS", config.pending_calls);
    }

    let bpf = loader
        .load(include_bytes_aligned!("../../../target/bpfel-unknown-none/release/plainsight"))
        .map_err(|e| SensorError::EbpfLoadFailed(e.to_string()))?;
    Ok(bpf)
}

/// Initialize eBPF logger
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Store the capture flags at `CONFIG[0]`
///
/// # Errors
/// Returns an error if the map is missing or the update fails
pub fn write_capture_config(bpf: &mut Ebpf, config: CaptureConfig) -> Result<(), SensorError> {
    let mut map: Array<_, CaptureConfig> =
        Array::try_from(bpf.map_mut("CONFIG").ok_or(SensorError::MapNotFound("CONFIG"))?)?;
    map.set(0, config, 0)?;
    info!("✓ Capture flags: {:#x}", config.flags);
    Ok(())
}

/// Resolve `task_struct` offsets from kernel BTF and store them at
/// `TASK_LAYOUT[0]`.
///
/// Missing or unreadable BTF is not fatal: the layout stays unresolved and
/// ppid and exit codes read as 0.
///
/// # Errors
/// Returns an error only if the map itself cannot be updated
pub fn write_task_layout(bpf: &mut Ebpf) -> Result<Option<TaskLayout>, SensorError> {
    let layout = match Btf::from_sys_fs().and_then(|btf| resolve_task_layout(&btf)) {
        Ok(layout) => layout,
        Err(e) => {
            warn!("task_struct layout unavailable: {e}");
            return Ok(None);
        }
    };

    let mut map: Array<_, TaskLayout> = Array::try_from(
        bpf.map_mut("TASK_LAYOUT").ok_or(SensorError::MapNotFound("TASK_LAYOUT"))?,
    )?;
    map.set(0, layout, 0)?;
    info!(
        "✓ task_struct layout: real_parent=+{} tgid=+{} exit_code=+{}",
        layout.real_parent, layout.tgid, layout.exit_code
    );
    Ok(Some(layout))
}

/// Register TLS targets in `TARGET_PIDS`
///
/// # Errors
/// Returns an error if the map is missing or an insert fails
pub fn register_targets(bpf: &mut Ebpf, targets: &[Pid]) -> Result<usize, SensorError> {
    if targets.is_empty() {
        return Ok(0);
    }

    let mut map: HashMap<_, u32, u8> = HashMap::try_from(
        bpf.map_mut("TARGET_PIDS").ok_or(SensorError::MapNotFound("TARGET_PIDS"))?,
    )?;
    for pid in targets {
        map.insert(pid.0, 1, 0)?;
    }

    info!("✓ Registered {} target processes", targets.len());
    Ok(targets.len())
}

/// Register TLS target command names in `TARGET_COMMS`
///
/// # Errors
/// Returns an error if the map is missing or an insert fails
pub fn register_comms(bpf: &mut Ebpf, keys: &[[u8; COMM_LEN]]) -> Result<usize, SensorError> {
    if keys.is_empty() {
        return Ok(0);
    }

    let mut map: HashMap<_, [u8; COMM_LEN], u8> = HashMap::try_from(
        bpf.map_mut("TARGET_COMMS").ok_or(SensorError::MapNotFound("TARGET_COMMS"))?,
    )?;
    for key in keys {
        map.insert(key, 1, 0)?;
    }

    info!("✓ Registered {} target command names", keys.len());
    Ok(keys.len())
}

/// Attach `sched/sched_process_{exec,exit,fork}`
///
/// # Errors
/// Returns an error if a program is missing or fails to load or attach
pub fn attach_lifecycle_tracepoints(bpf: &mut Ebpf) -> Result<()> {
    for name in LIFECYCLE_TRACEPOINTS {
        let program: &mut TracePoint = bpf
            .program_mut(name)
            .ok_or(SensorError::ProgramNotFound(name))?
            .try_into()?;
        program.load()?;
        program
            .attach("sched", name)
            .with_context(|| format!("Failed to attach tracepoint sched/{name}"))?;
        info!("✓ Attached tracepoint: sched/{name}");
    }
    Ok(())
}

/// Attach entry and return probes on `SSL_read` and `SSL_write` in `library`,
/// restricted to `pid` when given.
///
/// # Errors
/// Returns [`SensorError::AttachFailed`] naming the probe that failed
pub fn attach_tls_probes(bpf: &mut Ebpf, library: &Path, pid: Option<Pid>) -> Result<()> {
    let pid = pid.and_then(Pid::as_raw);

    for (name, symbol, is_return) in TLS_PROBES {
        let program: &mut UProbe = bpf
            .program_mut(name)
            .ok_or(SensorError::ProgramNotFound(name))?
            .try_into()?;
        program.load()?;
        program.attach(Some(symbol), 0, library, pid).map_err(|e| SensorError::AttachFailed {
            probe: name.to_string(),
            target: format!("{}:{symbol}", library.display()),
            error: e.to_string(),
        })?;

        let kind = if is_return { "uretprobe" } else { "uprobe" };
        info!("✓ Attached {kind}: {symbol} ({name})");
    }
    Ok(())
}
