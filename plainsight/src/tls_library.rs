//! Locate the `libssl` the TLS probes attach to.

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::domain::{Pid, SensorError};

/// Well-known distro locations, newest ABI first
pub const LIBSSL_CANDIDATES: &[&str] = &[
    "/usr/lib/x86_64-linux-gnu/libssl.so.3",
    "/usr/lib/x86_64-linux-gnu/libssl.so.1.1",
    "/lib/x86_64-linux-gnu/libssl.so.3",
    "/lib/x86_64-linux-gnu/libssl.so.1.1",
    "/usr/lib/aarch64-linux-gnu/libssl.so.3",
    "/usr/lib/aarch64-linux-gnu/libssl.so.1.1",
    "/usr/lib64/libssl.so.3",
    "/usr/lib64/libssl.so.1.1",
    "/usr/lib/libssl.so.3",
    "/usr/lib/libssl.so.1.1",
];

/// Pick the library to probe.
///
/// An explicit path always wins. With a single target the library mapped
/// into that process is used; otherwise the distro paths are tried and then
/// `ldconfig -p`.
///
/// # Errors
/// [`SensorError::TlsLibraryMissing`] when the explicit path does not exist,
/// [`SensorError::TlsLibraryNotFound`] when nothing could be found.
pub fn find_tls_library(explicit: Option<&Path>, targets: &[Pid]) -> Result<PathBuf, SensorError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(SensorError::TlsLibraryMissing(path.to_path_buf()));
        }
        return Ok(path.to_path_buf());
    }

    if let [pid] = targets {
        match from_process(*pid) {
            Some(path) => {
                info!("Using libssl mapped by {pid}: {}", path.display());
                return Ok(path);
            }
            None => debug!("{pid} has no libssl mapping, falling back to system paths"),
        }
    }

    if let Some(path) = LIBSSL_CANDIDATES.iter().map(Path::new).find(|p| p.is_file()) {
        debug!("Found libssl at {}", path.display());
        return Ok(path.to_path_buf());
    }

    match Command::new("ldconfig").arg("-p").output() {
        Ok(output) => {
            let listing = String::from_utf8_lossy(&output.stdout);
            if let Some(path) = libssl_from_ldconfig(&listing).filter(|p| p.is_file()) {
                debug!("Found libssl via ldconfig: {}", path.display());
                return Ok(path);
            }
        }
        Err(e) => warn!("Failed to run ldconfig: {e}"),
    }

    Err(SensorError::TlsLibraryNotFound)
}

fn from_process(pid: Pid) -> Option<PathBuf> {
    let maps = std::fs::read_to_string(format!("/proc/{}/maps", pid.0)).ok()?;
    let mapped = libssl_from_maps(&maps)?;
    if mapped.is_file() {
        return Some(mapped);
    }
    // Containerised targets: the path is only valid inside their mount
    // namespace
    let rooted = Path::new(&format!("/proc/{}/root", pid.0)).join(mapped.strip_prefix("/").ok()?);
    rooted.is_file().then_some(rooted)
}

/// First `libssl.so*` file mapped in a `/proc/<pid>/maps` listing
#[must_use]
pub fn libssl_from_maps(maps: &str) -> Option<PathBuf> {
    maps.lines()
        .filter_map(|line| line.split_whitespace().nth(5))
        .find(|path| is_libssl(path))
        .map(PathBuf::from)
}

/// Best `libssl` entry in `ldconfig -p` output, preferring `libssl.so.3`
///
/// Lines look like
/// `libssl.so.3 (libc6,x86-64) => /usr/lib/x86_64-linux-gnu/libssl.so.3`.
#[must_use]
pub fn libssl_from_ldconfig(listing: &str) -> Option<PathBuf> {
    let entries: Vec<&str> = listing
        .lines()
        .filter_map(|line| line.split_once("=>").map(|(_, path)| path.trim()))
        .filter(|path| is_libssl(path))
        .collect();

    entries
        .iter()
        .find(|path| path.ends_with("libssl.so.3"))
        .or_else(|| entries.first())
        .map(PathBuf::from)
}

fn is_libssl(path: &str) -> bool {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with("libssl.so"))
}
