//! Host implementation of the Event Channel.
//!
//! Mirrors the kernel BPF ring buffer protocol closely enough that the capture
//! handlers behave the same against either:
//!
//! - every record is preceded by an 8-byte header `{len | BUSY | DISCARD, 0}`
//!   and padded to 8 bytes
//! - reservation advances the producer position under a spin lock and
//!   publishes a BUSY header before anyone else can see the space; it fails
//!   only when the free space is too small for the record
//! - commit/discard clear BUSY with release ordering
//! - the single consumer walks records in reservation order, stops at the
//!   first BUSY one, and skips DISCARD ones
//!
//! The kernel maps the data area twice so records never wrap. Here a record
//! that would cross the end of the buffer is preceded by a discarded padding
//! record that fills the tail.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::mem::size_of;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crate::channel::{EventChannel, ReservedSlot};
use crate::event::Record;
use crate::sync::SpinLock;

/// Bytes in a record header
pub const RECORD_HEADER_LEN: usize = 8;

const BUSY_BIT: u32 = 1 << 31;
const DISCARD_BIT: u32 = 1 << 30;
const LEN_MASK: u32 = DISCARD_BIT - 1;

/// Bytes a record of `len` payload bytes occupies in the ring
#[must_use]
pub const fn record_footprint(len: usize) -> usize {
    (len + RECORD_HEADER_LEN + 7) & !7
}

#[repr(C, align(8))]
struct Storage<const N: usize>([u8; N]);

/// Fixed-capacity MPSC record ring of `N` bytes (`N` a power of two, ≥ 64)
pub struct EventRing<const N: usize> {
    data: UnsafeCell<Storage<N>>,
    reserve_lock: SpinLock<()>,
    producer_pos: AtomicUsize,
    consumer_pos: AtomicUsize,
    consuming: AtomicBool,
}

// SAFETY: all shared access to `data` is ordered through the position atomics
// and per-record header atomics.
#[allow(unsafe_code)]
unsafe impl<const N: usize> Sync for EventRing<N> {}

impl<const N: usize> Default for EventRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EventRing<N> {
    const CAPACITY_OK: () = assert!(N.is_power_of_two() && N >= 64, "ring size");

    #[must_use]
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;
        Self {
            data: UnsafeCell::new(Storage([0; N])),
            reserve_lock: SpinLock::new(()),
            producer_pos: AtomicUsize::new(0),
            consumer_pos: AtomicUsize::new(0),
            consuming: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes reserved and not yet released by the consumer
    pub fn pending_bytes(&self) -> usize {
        self.producer_pos.load(Ordering::Acquire) - self.consumer_pos.load(Ordering::Acquire)
    }

    fn base(&self) -> *mut u8 {
        self.data.get().cast::<u8>()
    }

    #[allow(unsafe_code)]
    fn header(&self, offset: usize) -> &AtomicU32 {
        debug_assert!(offset % RECORD_HEADER_LEN == 0 && offset < N);
        // SAFETY: offset is 8-aligned and inside the buffer; AtomicU32 has
        // the layout of u32.
        unsafe { &*self.base().add(offset).cast::<AtomicU32>() }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn try_reserve(&self, len: usize) -> Option<usize> {
        let total = record_footprint(len);
        if total > N || len > LEN_MASK as usize {
            return None;
        }

        let _guard = self.reserve_lock.lock();
        let cons = self.consumer_pos.load(Ordering::Acquire);
        let prod = self.producer_pos.load(Ordering::Relaxed);

        let offset = prod & (N - 1);
        let tail = N - offset;
        let pad = if tail < total { tail } else { 0 };
        if prod + pad + total - cons > N {
            return None;
        }

        if pad > 0 {
            let pad_len = (pad - RECORD_HEADER_LEN) as u32;
            self.header(offset).store(pad_len | DISCARD_BIT, Ordering::Relaxed);
        }
        let start = (prod + pad) & (N - 1);
        self.header(start).store(len as u32 | BUSY_BIT, Ordering::Relaxed);
        self.producer_pos.store(prod + pad + total, Ordering::Release);

        Some(start)
    }

    /// Deliver committed records in order to `f` and release their space.
    ///
    /// Returns the number of records delivered. Stops at the first record
    /// that is still being written. Only one consumer runs at a time; a
    /// concurrent call returns 0 without touching the ring.
    pub fn consume(&self, mut f: impl FnMut(&[u8])) -> usize {
        if self.consuming.swap(true, Ordering::Acquire) {
            return 0;
        }

        let mut delivered = 0;
        let mut cons = self.consumer_pos.load(Ordering::Relaxed);
        for _ in 0..N / RECORD_HEADER_LEN {
            let prod = self.producer_pos.load(Ordering::Acquire);
            if cons == prod {
                break;
            }
            let offset = cons & (N - 1);
            let header = self.header(offset).load(Ordering::Acquire);
            if header & BUSY_BIT != 0 {
                break;
            }
            let len = (header & LEN_MASK) as usize;
            if header & DISCARD_BIT == 0 {
                // SAFETY: committed record, fully inside the buffer, and no
                // producer can reuse it until consumer_pos moves past it.
                #[allow(unsafe_code)]
                let bytes = unsafe {
                    core::slice::from_raw_parts(self.base().add(offset + RECORD_HEADER_LEN), len)
                };
                f(bytes);
                delivered += 1;
            }
            cons += record_footprint(len);
            self.consumer_pos.store(cons, Ordering::Release);
        }

        self.consuming.store(false, Ordering::Release);
        delivered
    }
}

impl<const N: usize> EventChannel for EventRing<N> {
    type Slot<'a, T: Record>
        = RingSlot<'a, N, T>
    where
        Self: 'a;

    fn reserve<T: Record>(&self) -> Option<RingSlot<'_, N, T>> {
        let offset = self.try_reserve(size_of::<T>())?;
        Some(RingSlot { ring: self, offset, finished: false, _record: PhantomData })
    }
}

/// A reserved record in an [`EventRing`]. Dropping it unfinished discards it.
pub struct RingSlot<'a, const N: usize, T: Record> {
    ring: &'a EventRing<N>,
    offset: usize,
    finished: bool,
    _record: PhantomData<&'a mut T>,
}

impl<const N: usize, T: Record> RingSlot<'_, N, T> {
    #[allow(clippy::cast_possible_truncation)]
    fn finish(&mut self, flags: u32) {
        if !self.finished {
            let len = size_of::<T>() as u32;
            self.ring.header(self.offset).store(len | flags, Ordering::Release);
            self.finished = true;
        }
    }
}

impl<const N: usize, T: Record> ReservedSlot<T> for RingSlot<'_, N, T> {
    fn record(&mut self) -> &mut T {
        // SAFETY: the slot owns this region until finished; it is 8-aligned,
        // initialised (the storage starts zeroed), and `Record` guarantees
        // every byte pattern is a valid `T`.
        #[allow(unsafe_code)]
        unsafe {
            &mut *self.ring.base().add(self.offset + RECORD_HEADER_LEN).cast::<T>()
        }
    }

    fn commit(mut self) {
        self.finish(0);
    }

    fn discard(mut self) {
        self.finish(DISCARD_BIT);
    }
}

impl<const N: usize, T: Record> Drop for RingSlot<'_, N, T> {
    fn drop(&mut self) {
        self.finish(DISCARD_BIT);
    }
}
