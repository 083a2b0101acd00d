//! # Event Processing
//!
//! Drains the kernel ring buffers, decodes each record and hands it to the
//! output worker.
//!
//! The hand-off never blocks the drain loop: when the output channel is full
//! the event is counted in [`ConsumerStats::dropped`] and discarded, the same
//! drop-and-count policy the kernel side applies to its rings.

use aya::maps::{MapData, RingBuf};
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, warn};
use std::borrow::Borrow;

use crate::decode::{decode_record, CapturedEvent};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Records read from the rings
    pub received: u64,
    pub process_events: u64,
    pub tls_events: u64,
    /// Records rejected by the decoder
    pub malformed: u64,
    /// Events lost because the output worker fell behind or is gone
    pub dropped: u64,
}

pub struct EventProcessor {
    tx: Sender<CapturedEvent>,
    pub stats: ConsumerStats,
}

impl EventProcessor {
    #[must_use]
    pub fn new(tx: Sender<CapturedEvent>) -> Self {
        Self { tx, stats: ConsumerStats::default() }
    }

    /// Decode and forward one raw record
    pub fn process_record(&mut self, bytes: &[u8]) {
        self.stats.received += 1;

        let event = match decode_record(bytes) {
            Ok(event) => event,
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Dropping malformed record: {e}");
                return;
            }
        };

        match &event {
            CapturedEvent::Process(_) => self.stats.process_events += 1,
            CapturedEvent::Tls(_) => self.stats.tls_events += 1,
        }

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.stats.dropped += 1,
            Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped += 1;
                debug!("Output worker gone, dropping event");
            }
        }
    }

    /// Process every record currently in `ring`; returns how many were read
    pub fn drain<T: Borrow<MapData>>(&mut self, ring: &mut RingBuf<T>) -> usize {
        let mut count = 0;
        while let Some(item) = ring.next() {
            self.process_record(&item);
            count += 1;
        }
        count
    }

    /// Close the output channel so the worker can finish
    pub fn finish(self) -> ConsumerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use plainsight_common::{ProcessEvent, PROC_EXIT, RECORD_PROCESS};

    #[allow(unsafe_code)]
    fn exit_record(pid: u32) -> Vec<u8> {
        let mut event = ProcessEvent::zeroed();
        event.tag = RECORD_PROCESS;
        event.kind = PROC_EXIT;
        event.pid = pid;
        // SAFETY: ProcessEvent is plain old data
        let bytes = unsafe {
            std::slice::from_raw_parts(
                std::ptr::from_ref(&event).cast::<u8>(),
                std::mem::size_of::<ProcessEvent>(),
            )
        };
        bytes.to_vec()
    }

    #[test]
    fn test_forwards_decoded_events() {
        let (tx, rx) = bounded(4);
        let mut processor = EventProcessor::new(tx);

        processor.process_record(&exit_record(7));

        assert_eq!(processor.stats.process_events, 1);
        assert!(matches!(rx.try_recv().unwrap(), CapturedEvent::Process(p) if p.pid == 7));
    }

    #[test]
    fn test_counts_malformed_records() {
        let (tx, rx) = bounded(4);
        let mut processor = EventProcessor::new(tx);

        processor.process_record(&[0xff; 3]);
        processor.process_record(&[0xff; 64]);

        assert_eq!(processor.stats.malformed, 2);
        assert_eq!(processor.stats.received, 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (tx, rx) = bounded(1);
        let mut processor = EventProcessor::new(tx);
        let bytes = exit_record(9);

        for _ in 0..3 {
            processor.process_record(&bytes);
        }

        assert_eq!(processor.stats.dropped, 2);
        assert_eq!(rx.len(), 1);
        assert_eq!(processor.finish().process_events, 3);
    }

    #[test]
    fn test_disconnected_worker_counts_drop() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let mut processor = EventProcessor::new(tx);

        processor.process_record(&exit_record(1));
        assert_eq!(processor.stats.dropped, 1);
    }
}
