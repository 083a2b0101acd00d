//! Target selection for the TLS capturer.
//!
//! Userspace fills a pid set and a comm set and turns each one on with a
//! config flag. A process is captured only if it passes every enabled check;
//! with no flag set everything is captured.

use crate::config::{CaptureConfig, FLAG_COMM_FILTER, FLAG_PID_FILTER};
use crate::context::{TargetFilter, TaskContext};
use crate::COMM_LEN;

/// Membership lookups behind a [`TargetRules`]
pub trait TargetSets {
    fn has_pid(&self, tgid: u32) -> bool;

    /// `comm` is the raw 16-byte kernel name, zero-padded
    fn has_comm(&self, comm: &[u8; COMM_LEN]) -> bool;
}

pub struct TargetRules<'a, S> {
    config: CaptureConfig,
    sets: &'a S,
}

impl<'a, S: TargetSets> TargetRules<'a, S> {
    pub const fn new(config: CaptureConfig, sets: &'a S) -> Self {
        Self { config, sets }
    }
}

impl<S: TargetSets> TargetFilter for TargetRules<'_, S> {
    fn wants<T: TaskContext>(&self, task: &T) -> bool {
        if self.config.has(FLAG_PID_FILTER) && !self.sets.has_pid(task.tgid()) {
            return false;
        }
        if self.config.has(FLAG_COMM_FILTER) && !self.sets.has_comm(&task.comm()) {
            return false;
        }
        true
    }
}

/// Key under which `name` is stored in `TARGET_COMMS`
///
/// Names longer than 15 bytes are cut, as the kernel does when it sets comm.
#[must_use]
pub fn comm_key(name: &[u8]) -> [u8; COMM_LEN] {
    let mut key = [0u8; COMM_LEN];
    let n = name.len().min(COMM_LEN - 1);
    key[..n].copy_from_slice(&name[..n]);
    key
}
