//! Domain model for plainsight
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

pub use types::{ExitStatus, Pid};

pub use errors::{BtfError, ConfigError, DecodeError, ExportError, SensorError};
