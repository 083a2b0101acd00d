//! Pre-flight checks for plainsight
//!
//! Validates system requirements before attempting to load eBPF programs.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() and setrlimit() require unsafe

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use std::path::Path;

use crate::btf::VMLINUX_BTF;
use crate::domain::{Pid, SensorError};

/// Ring buffer maps need 5.8
const MIN_KERNEL_VERSION: (u32, u32) = (5, 8);

/// Run all pre-flight checks before eBPF loading
///
/// # Errors
/// Returns an error when not root, the kernel is too old or a targeted
/// process does not exist.
pub fn run_preflight_checks(targets: &[Pid], quiet: bool) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    for pid in targets {
        check_process_exists(*pid)?;
    }
    check_btf(quiet);
    raise_memlock_rlimit();
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: plainsight requires root privileges to load eBPF programs.\n\n\
         Run with: sudo plainsight ..."
    );
}

/// Check if the kernel version is sufficient for eBPF features
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");
    let Some((major, minor)) = parse_kernel_release(release) else {
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             plainsight requires Linux {}.{} or newer for eBPF ring buffer support.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

/// `"6.1.0-arch1-1"` → `(6, 1)`
fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some((major, minor.parse().ok()?))
}

/// Without kernel BTF the parent pid and exit code of lifecycle events read as 0
fn check_btf(quiet: bool) {
    if !quiet && !Path::new(VMLINUX_BTF).exists() {
        eprintln!("warning: {VMLINUX_BTF} missing, ppid and exit codes will read as 0");
    }
}

/// Check if the target process exists
///
/// # Errors
/// [`SensorError::ProcessNotFound`] when `/proc/<pid>` is absent.
pub fn check_process_exists(pid: Pid) -> Result<(), SensorError> {
    if !Path::new(&format!("/proc/{}", pid.0)).exists() {
        return Err(SensorError::ProcessNotFound(pid));
    }
    Ok(())
}

/// Kernels before 5.11 charge map memory to `RLIMIT_MEMLOCK`
fn raise_memlock_rlimit() {
    let limit = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
    // SAFETY: `limit` is a valid rlimit for the duration of the call
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &limit) };
    if ret == 0 {
        debug!("Raised RLIMIT_MEMLOCK");
    } else {
        warn!("Failed to remove limit on locked memory, ret is: {ret}");
    }
}
