//! Structured error types for plainsight
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Pid;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Failed to load eBPF program: {0}")]
    EbpfLoadFailed(String),

    #[error("eBPF map {0} not found")]
    MapNotFound(&'static str),

    #[error("eBPF program {0} not found")]
    ProgramNotFound(&'static str),

    #[error("Failed to attach {probe} to {target}: {error}")]
    AttachFailed { probe: String, target: String, error: String },

    #[error("Process {0} not found")]
    ProcessNotFound(Pid),

    #[error("No TLS library found; pass --tls-lib <PATH> or --no-tls")]
    TlsLibraryNotFound,

    #[error("TLS library {} does not exist", .0.display())]
    TlsLibraryMissing(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Aya(#[from] aya::EbpfError),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),

    #[error(transparent)]
    Program(#[from] aya::programs::ProgramError),
}

/// A ring buffer record that does not match the record contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record too short for a tag ({len} bytes)")]
    Truncated { len: usize },

    #[error("unknown record tag {0}")]
    UnknownTag(u32),

    #[error("record tag {tag} expects {expected} bytes, got {actual}")]
    LengthMismatch { tag: u32, expected: usize, actual: usize },

    #[error("unknown lifecycle kind {0}")]
    UnknownKind(u8),

    #[error("unknown TLS direction {0}")]
    UnknownDirection(u8),

    #[error("TLS payload length {len} outside 1..={max}")]
    BadPayloadLength { len: u32, max: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} ring size {bytes} is not a power of two")]
    RingNotPowerOfTwo { name: &'static str, bytes: u32 },

    #[error("{name} ring size {bytes} is below the minimum of {min} bytes")]
    RingTooSmall { name: &'static str, bytes: u32, min: u32 },

    #[error("--pending-calls must be greater than zero")]
    NoPendingCalls,

    #[error("--no-process and --no-tls leave nothing to capture")]
    NothingEnabled,

    #[error("{count} target PIDs given, at most {max} supported")]
    TooManyTargets { count: usize, max: u32 },

    #[error("{count} target command names given, at most {max} supported")]
    TooManyComms { count: usize, max: u32 },

    #[error("Invalid command name {0:?}")]
    BadComm(String),
}

#[derive(Error, Debug)]
pub enum BtfError {
    #[error("Failed to read kernel BTF: {0}")]
    Unavailable(#[from] std::io::Error),

    #[error("Not a BTF blob (magic {0:#06x})")]
    BadMagic(u16),

    #[error("BTF data truncated in {0}")]
    Truncated(&'static str),

    #[error("Unsupported BTF type kind {0}")]
    UnknownKind(u32),

    #[error("struct {0} not found in BTF")]
    StructNotFound(String),

    #[error("member {member} not found in struct {strukt}")]
    MemberNotFound { strukt: String, member: String },

    #[error("member {0} is not byte aligned")]
    Unaligned(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_error_display() {
        let err = SensorError::ProcessNotFound(Pid(1234));
        assert_eq!(err.to_string(), "Process PID:1234 not found");
    }

    #[test]
    fn test_attach_error() {
        let err = SensorError::AttachFailed {
            probe: "ssl_write".to_string(),
            target: "/usr/lib/libssl.so.3".to_string(),
            error: "symbol not found".to_string(),
        };
        assert!(err.to_string().contains("ssl_write"));
        assert!(err.to_string().contains("/usr/lib/libssl.so.3"));
    }

    #[test]
    fn test_config_error_names_ring() {
        let err = ConfigError::RingNotPowerOfTwo { name: "tls", bytes: 3000 };
        assert_eq!(err.to_string(), "tls ring size 3000 is not a power of two");
    }
}
