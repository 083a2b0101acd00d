//! Newtypes and value types shared across the sensor
//!
//! Kernel records carry raw integers; these give them names once they reach
//! userspace.

use serde::Serialize;
use std::fmt;

/// Process (thread-group) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl Pid {
    /// PID in the form `aya` attach calls expect
    #[must_use]
    pub fn as_raw(self) -> Option<i32> {
        i32::try_from(self.0).ok()
    }
}

/// How a process ended, decoded from the raw `task->exit_code`
///
/// The kernel packs it like a `wait(2)` status: the low 7 bits hold the
/// terminating signal (0 for a normal exit), bit 7 the core-dump flag and
/// bits 8..16 the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExitStatus {
    Exited { code: i32 },
    Signaled { signal: i32, core_dumped: bool },
}

impl ExitStatus {
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        let signal = raw & 0x7f;
        if signal == 0 {
            Self::Exited { code: (raw >> 8) & 0xff }
        } else {
            Self::Signaled { signal, core_dumped: raw & 0x80 != 0 }
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "code {code}"),
            Self::Signaled { signal, core_dumped: false } => write!(f, "signal {signal}"),
            Self::Signaled { signal, core_dumped: true } => {
                write!(f, "signal {signal} (core dumped)")
            }
        }
    }
}
