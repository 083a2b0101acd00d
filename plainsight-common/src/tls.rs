//! # TLS Boundary Capturer
//!
//! `SSL_read(ssl, buf, num)` and `SSL_write(ssl, buf, num)` are observed in
//! two halves. The entry probe knows the buffer but not how many bytes will
//! move; the return probe knows the count but no longer sees the arguments.
//! The entry half parks the arguments in a [`CorrelationStore`] under the
//! calling thread's `pid_tgid`, the return half takes them back out.
//!
//! Per (thread, direction) the state is IDLE → PENDING → IDLE. A second entry
//! before the return overwrites the first; nested or recursive calls on one
//! thread are not queued.

use crate::bounded::{nul_terminate, payload_len};
use crate::channel::{EventChannel, ReservedSlot};
use crate::context::{MemoryReader, TargetFilter, TaskContext};
use crate::correlation::CorrelationStore;
use crate::event::{Direction, PendingCall, SslDataEvent, RECORD_SSL_DATA};
use crate::stats::{Counter, Counters};

pub struct TlsCapture<'a, C, K, F, S> {
    events: &'a C,
    reads: &'a K,
    writes: &'a K,
    targets: &'a F,
    counters: &'a S,
}

impl<'a, C, K, F, S> TlsCapture<'a, C, K, F, S>
where
    C: EventChannel,
    K: CorrelationStore,
    F: TargetFilter,
    S: Counters,
{
    pub const fn new(
        events: &'a C,
        reads: &'a K,
        writes: &'a K,
        targets: &'a F,
        counters: &'a S,
    ) -> Self {
        Self { events, reads, writes, targets, counters }
    }

    fn store(&self, direction: Direction) -> &'a K {
        match direction {
            Direction::Read => self.reads,
            Direction::Write => self.writes,
        }
    }

    /// Entry probe: remember `buf` and `requested` until the call returns.
    pub fn on_entry<T: TaskContext>(
        &self,
        direction: Direction,
        task: &T,
        buf: u64,
        requested: u64,
    ) {
        if !self.targets.wants(task) {
            return;
        }

        let call = PendingCall { buf, requested };
        if self.store(direction).insert(task.pid_tgid(), call).is_err() {
            self.counters.bump(Counter::StoreFull);
        }
    }

    /// Return probe: resolve the pending call and emit what was transferred.
    ///
    /// The pending call is removed before anything else is decided, so a
    /// failed, empty or dropped call still leaves the thread IDLE.
    pub fn on_return<T: TaskContext, M: MemoryReader>(
        &self,
        direction: Direction,
        task: &T,
        user: &M,
        ret: i64,
    ) {
        if !self.targets.wants(task) {
            return;
        }

        let Some(call) = self.store(direction).take(task.pid_tgid()) else {
            self.counters.bump(Counter::Unmatched);
            return;
        };

        let Some(len) = payload_len(ret, call.requested) else {
            return;
        };

        let Some(mut slot) = self.events.reserve::<SslDataEvent>() else {
            self.counters.bump(Counter::ChannelFull);
            return;
        };

        let event = slot.record();
        event.tag = RECORD_SSL_DATA;
        event._pad0 = [0; 4];
        event.timestamp_ns = task.ktime_ns();
        event.pid = task.tgid();
        event.tid = task.tid();
        event.uid = task.uid();
        event.direction = direction as u8;
        event._pad1 = [0; 3];
        #[allow(clippy::cast_possible_truncation)]
        {
            event.data_len = len as u32;
        }
        event.comm = task.comm();
        nul_terminate(&mut event.comm);
        event._pad2 = [0; 4];

        let copied = match event.data.get_mut(..len) {
            Some(dst) => user.read_bytes(call.buf, dst).is_ok(),
            None => false,
        };
        if !copied {
            slot.discard();
            self.counters.bump(Counter::ReadFault);
            return;
        }

        slot.commit();
        self.counters.bump(Counter::Emitted);
    }
}
