//! Correlation Store: bridges an entry probe and its return probe.
//!
//! Keyed by the calling thread's `pid_tgid`. One store per call kind, so a
//! thread interleaving `SSL_read` and `SSL_write` never resolves one against
//! the other.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::event::PendingCall;

/// Why an insert did not take effect
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Every slot is taken by another thread identity
    Full,
}

pub trait CorrelationStore {
    /// Record `call` for `key`, replacing any entry already there.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the entry could not be stored.
    fn insert(&self, key: u64, call: PendingCall) -> Result<(), StoreError>;

    /// Remove and return the entry for `key`.
    fn take(&self, key: u64) -> Option<PendingCall>;
}

/// Key of an unclaimed slot. No thread has an all-ones `pid_tgid`.
const VACANT: u64 = u64::MAX;

/// One entry. `key` is claimed by CAS; `ready` publishes the call fields.
struct Slot {
    key: AtomicU64,
    ready: AtomicBool,
    buf: AtomicU64,
    requested: AtomicU64,
}

impl Slot {
    #[allow(clippy::declare_interior_mutable_const)]
    const EMPTY: Self = Self {
        key: AtomicU64::new(VACANT),
        ready: AtomicBool::new(false),
        buf: AtomicU64::new(0),
        requested: AtomicU64::new(0),
    };

    fn publish(&self, call: PendingCall) {
        self.buf.store(call.buf, Ordering::Relaxed);
        self.requested.store(call.requested, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
    }

    fn load(&self) -> PendingCall {
        PendingCall {
            buf: self.buf.load(Ordering::Relaxed),
            requested: self.requested.load(Ordering::Relaxed),
        }
    }

    fn holds(&self, key: u64) -> bool {
        self.key.load(Ordering::Acquire) == key && self.ready.load(Ordering::Acquire)
    }
}

/// Fixed-capacity host store of `N` entries
///
/// Lookup is a linear scan over `N` slots, bounded by construction. Inserting
/// a new key into a full table fails instead of evicting. Threads never wait
/// on each other: a slot is claimed with a single CAS on its key, and only
/// the thread owning a key ever writes or removes its entry.
pub struct CallTable<const N: usize> {
    slots: [Slot; N],
}

impl<const N: usize> Default for CallTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CallTable<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: [Slot::EMPTY; N] }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.ready.load(Ordering::Acquire)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry for `key` without removing it
    pub fn peek(&self, key: u64) -> Option<PendingCall> {
        self.slots.iter().find(|s| s.holds(key)).map(Slot::load)
    }
}

impl<const N: usize> CorrelationStore for CallTable<N> {
    fn insert(&self, key: u64, call: PendingCall) -> Result<(), StoreError> {
        if key == VACANT {
            return Err(StoreError::Full);
        }

        if let Some(slot) = self.slots.iter().find(|s| s.key.load(Ordering::Acquire) == key) {
            slot.publish(call);
            return Ok(());
        }

        let slot = self
            .slots
            .iter()
            .find(|s| {
                s.key
                    .compare_exchange(VACANT, key, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            })
            .ok_or(StoreError::Full)?;
        slot.publish(call);
        Ok(())
    }

    fn take(&self, key: u64) -> Option<PendingCall> {
        let slot = self.slots.iter().find(|s| s.holds(key))?;
        let call = slot.load();
        slot.ready.store(false, Ordering::Relaxed);
        slot.key.store(VACANT, Ordering::Release);
        Some(call)
    }
}
