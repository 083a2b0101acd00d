//! Capture counters.
//!
//! Drops are expected under load and never surface as errors; these counters
//! are the only record of them.

use core::sync::atomic::{AtomicU64, Ordering};

/// Index into the counter array (`CAPTURE_STATS` in the kernel)
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    /// Record committed to a channel
    Emitted = 0,
    /// Reservation failed, event dropped
    ChannelFull = 1,
    /// Pending call could not be stored
    StoreFull = 2,
    /// Probe read faulted, reserved record discarded
    ReadFault = 3,
    /// Return probe found no pending call
    Unmatched = 4,
}

/// Number of [`Counter`] slots
pub const COUNTER_SLOTS: u32 = 5;

impl Counter {
    pub const ALL: [Counter; COUNTER_SLOTS as usize] =
        [Self::Emitted, Self::ChannelFull, Self::StoreFull, Self::ReadFault, Self::Unmatched];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Emitted => "emitted",
            Self::ChannelFull => "channel_full",
            Self::StoreFull => "store_full",
            Self::ReadFault => "read_fault",
            Self::Unmatched => "unmatched",
        }
    }
}

pub trait Counters {
    fn bump(&self, counter: Counter);
}

/// Host counters
#[derive(Default)]
pub struct AtomicCounters {
    slots: [AtomicU64; COUNTER_SLOTS as usize],
}

impl AtomicCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
        }
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slots[counter as usize].load(Ordering::Relaxed)
    }
}

impl Counters for AtomicCounters {
    fn bump(&self, counter: Counter) {
        self.slots[counter as usize].fetch_add(1, Ordering::Relaxed);
    }
}
