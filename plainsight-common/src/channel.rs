//! Event Channel contract: reserve, fill in place, then commit or discard.
//!
//! Implemented by the kernel `RingBuf` wrapper in `plainsight-ebpf` and by
//! [`EventRing`](crate::ring::EventRing) on the host.

use crate::event::Record;

/// A claimed, not yet visible, record slot
pub trait ReservedSlot<T: Record> {
    /// The record memory. Fields hold unspecified bytes until written.
    fn record(&mut self) -> &mut T;

    /// Publish the slot to the consumer.
    fn commit(self);

    /// Release the slot without publishing it.
    fn discard(self);
}

/// Bounded many-producer, single-consumer record channel
pub trait EventChannel {
    type Slot<'a, T: Record>: ReservedSlot<T>
    where
        Self: 'a;

    /// Claim room for one `T` without blocking. `None` means the channel is
    /// full and the caller must drop the event.
    fn reserve<T: Record>(&self) -> Option<Self::Slot<'_, T>>;
}
