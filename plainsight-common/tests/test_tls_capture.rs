mod support;

use plainsight_common::{
    AllTargets, AtomicCounters, CallTable, CaptureConfig, Counter, Direction, EventRing,
    PendingCall, SslDataEvent, TargetRules, TlsCapture, FLAG_COMM_FILTER, FLAG_PID_FILTER,
    MAX_DATA_SIZE, RECORD_SSL_DATA,
};
use support::{c_str, read_record, FakeMemory, FakeTargets, FakeTask};

const RING: usize = 1 << 16;
const BUF_A: u64 = 0x7f00_0000_1000;
const BUF_B: u64 = 0x7f00_0000_9000;

fn drain(ring: &EventRing<RING>) -> Vec<SslDataEvent> {
    let mut out = Vec::new();
    ring.consume(|bytes| out.push(read_record::<SslDataEvent>(bytes)));
    out
}

struct Harness {
    ring: EventRing<RING>,
    reads: CallTable<64>,
    writes: CallTable<64>,
    counters: AtomicCounters,
}

impl Harness {
    fn new() -> Self {
        Self {
            ring: EventRing::new(),
            reads: CallTable::new(),
            writes: CallTable::new(),
            counters: AtomicCounters::new(),
        }
    }

    fn capture(&self) -> TlsCapture<'_, EventRing<RING>, CallTable<64>, AllTargets, AtomicCounters> {
        TlsCapture::new(&self.ring, &self.reads, &self.writes, &AllTargets, &self.counters)
    }
}

#[test]
fn test_write_round_trip() {
    let h = Harness::new();
    let task = FakeTask::new(500, 501).with_comm("curl").with_ids(1000, 1000);
    let user = FakeMemory::new().map(BUF_A, b"GET / HTTP".to_vec());

    h.capture().on_entry(Direction::Write, &task, BUF_A, 10);
    assert_eq!(h.writes.len(), 1);
    h.capture().on_return(Direction::Write, &task, &user, 10);

    let events = drain(&h.ring);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.tag, RECORD_SSL_DATA);
    assert_eq!(event.direction(), Some(Direction::Write));
    assert_eq!(event.data_len, 10);
    assert_eq!(event.payload(), b"GET / HTTP");
    assert_eq!(event.pid, 500);
    assert_eq!(event.tid, 501);
    assert_eq!(event.uid, 1000);
    assert_eq!(c_str(&event.comm), "curl");
    assert!(h.writes.is_empty());
    assert_eq!(h.counters.get(Counter::Emitted), 1);
}

#[test]
fn test_read_captures_only_returned_bytes() {
    let h = Harness::new();
    let task = FakeTask::leader(500);
    let user = FakeMemory::new().map(BUF_A, vec![b'r'; 4096]);

    h.capture().on_entry(Direction::Read, &task, BUF_A, 4096);
    h.capture().on_return(Direction::Read, &task, &user, 17);

    let events = drain(&h.ring);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].direction(), Some(Direction::Read));
    assert_eq!(events[0].data_len, 17);
    assert_eq!(events[0].payload(), &[b'r'; 17][..]);
}

#[test]
fn test_failed_or_empty_call_emits_nothing_and_clears_entry() {
    let h = Harness::new();
    let task = FakeTask::leader(500);
    let user = FakeMemory::new().map(BUF_A, vec![0; 64]);

    for ret in [0, -1, i64::MIN] {
        h.capture().on_entry(Direction::Read, &task, BUF_A, 64);
        h.capture().on_return(Direction::Read, &task, &user, ret);
        assert!(h.reads.is_empty(), "entry left behind for ret {ret}");
    }

    assert!(drain(&h.ring).is_empty());
    assert_eq!(h.counters.get(Counter::Emitted), 0);
    assert_eq!(h.counters.get(Counter::Unmatched), 0);
}

#[test]
fn test_oversized_return_is_clamped() {
    let h = Harness::new();
    let task = FakeTask::leader(500);
    let user = FakeMemory::new().map(BUF_A, vec![7; 100_000]);

    h.capture().on_entry(Direction::Write, &task, BUF_A, 100_000);
    h.capture().on_return(Direction::Write, &task, &user, 100_000);

    // Reported more than was requested
    h.capture().on_entry(Direction::Write, &task, BUF_A, 8);
    h.capture().on_return(Direction::Write, &task, &user, 64);

    let lens: Vec<_> = drain(&h.ring).iter().map(|e| e.data_len).collect();
    assert_eq!(lens, vec![MAX_DATA_SIZE as u32, 8]);
}

#[test]
fn test_return_without_entry_is_unmatched() {
    let h = Harness::new();
    let user = FakeMemory::new().map(BUF_A, vec![0; 64]);

    h.capture().on_return(Direction::Read, &FakeTask::leader(500), &user, 32);

    assert!(drain(&h.ring).is_empty());
    assert_eq!(h.counters.get(Counter::Unmatched), 1);
}

#[test]
fn test_repeated_cycles_keep_one_entry_at_most() {
    let h = Harness::new();
    let task = FakeTask::new(500, 502);
    let user = FakeMemory::new().map(BUF_A, vec![1; 256]);

    for round in 1..=20_u64 {
        h.capture().on_entry(Direction::Read, &task, BUF_A, 256);
        assert_eq!(h.reads.len(), 1);
        h.capture().on_return(Direction::Read, &task, &user, 1);
        assert!(h.reads.is_empty());
        assert_eq!(drain(&h.ring).len(), 1, "round {round}");
    }
}

#[test]
fn test_unreturned_entry_is_overwritten() {
    let h = Harness::new();
    let task = FakeTask::new(500, 503);
    let user = FakeMemory::new()
        .map(BUF_A, b"first".to_vec())
        .map(BUF_B, b"second".to_vec());

    h.capture().on_entry(Direction::Read, &task, BUF_A, 5);
    h.capture().on_entry(Direction::Read, &task, BUF_B, 6);
    assert_eq!(h.reads.len(), 1);
    assert_eq!(h.reads.peek(task_key(&task)), Some(PendingCall { buf: BUF_B, requested: 6 }));

    h.capture().on_return(Direction::Read, &task, &user, 6);

    let events = drain(&h.ring);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload(), b"second");
    assert!(h.reads.is_empty());
}

#[test]
fn test_read_and_write_pending_on_one_thread() {
    let h = Harness::new();
    let task = FakeTask::new(500, 504);
    let user = FakeMemory::new()
        .map(BUF_A, b"inbound".to_vec())
        .map(BUF_B, b"outbound".to_vec());

    h.capture().on_entry(Direction::Read, &task, BUF_A, 7);
    h.capture().on_entry(Direction::Write, &task, BUF_B, 8);
    h.capture().on_return(Direction::Write, &task, &user, 8);
    h.capture().on_return(Direction::Read, &task, &user, 7);

    let events = drain(&h.ring);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].direction(), Some(Direction::Write));
    assert_eq!(events[0].payload(), b"outbound");
    assert_eq!(events[1].direction(), Some(Direction::Read));
    assert_eq!(events[1].payload(), b"inbound");
}

#[test]
fn test_threads_of_one_process_do_not_collide() {
    let h = Harness::new();
    let first = FakeTask::new(500, 510);
    let second = FakeTask::new(500, 511);
    let user = FakeMemory::new()
        .map(BUF_A, b"aaaa".to_vec())
        .map(BUF_B, b"bbbb".to_vec());

    h.capture().on_entry(Direction::Write, &first, BUF_A, 4);
    h.capture().on_entry(Direction::Write, &second, BUF_B, 4);
    assert_eq!(h.writes.len(), 2);

    h.capture().on_return(Direction::Write, &second, &user, 4);
    h.capture().on_return(Direction::Write, &first, &user, 4);

    let events = drain(&h.ring);
    assert_eq!((events[0].tid, events[0].payload()), (511, &b"bbbb"[..]));
    assert_eq!((events[1].tid, events[1].payload()), (510, &b"aaaa"[..]));
}

#[test]
fn test_user_read_fault_discards_and_ring_stays_usable() {
    let h = Harness::new();
    let task = FakeTask::leader(500);
    let user = FakeMemory::new().map(BUF_B, b"fine".to_vec());

    h.capture().on_entry(Direction::Write, &task, BUF_A, 16);
    h.capture().on_return(Direction::Write, &task, &FakeMemory::new(), 16);

    assert!(h.writes.is_empty());
    assert_eq!(h.counters.get(Counter::ReadFault), 1);
    assert!(drain(&h.ring).is_empty());
    assert_eq!(h.ring.pending_bytes(), 0);

    h.capture().on_entry(Direction::Write, &task, BUF_B, 4);
    h.capture().on_return(Direction::Write, &task, &user, 4);
    let events = drain(&h.ring);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload(), b"fine");
}

#[test]
fn test_full_store_counts_and_leaves_return_unmatched() {
    let ring = EventRing::<RING>::new();
    let reads = CallTable::<2>::new();
    let writes = CallTable::<2>::new();
    let counters = AtomicCounters::new();
    let capture = TlsCapture::new(&ring, &reads, &writes, &AllTargets, &counters);
    let user = FakeMemory::new().map(BUF_A, vec![9; 32]);

    let tasks: Vec<_> = (1..=3).map(|tid| FakeTask::new(500, 500 + tid)).collect();
    for task in &tasks {
        capture.on_entry(Direction::Read, task, BUF_A, 32);
    }
    assert_eq!(counters.get(Counter::StoreFull), 1);
    assert_eq!(reads.len(), 2);

    for task in &tasks {
        capture.on_return(Direction::Read, task, &user, 32);
    }
    assert_eq!(counters.get(Counter::Emitted), 2);
    assert_eq!(counters.get(Counter::Unmatched), 1);
    assert!(reads.is_empty());
}

#[test]
fn test_full_channel_drops_event_but_clears_entry() {
    let h = Harness::new();
    let user = FakeMemory::new().map(BUF_A, vec![3; 64]);

    // A 64 KiB ring holds three 16448-byte records
    for tid in 1..=4 {
        let task = FakeTask::new(500, tid);
        h.capture().on_entry(Direction::Write, &task, BUF_A, 64);
        h.capture().on_return(Direction::Write, &task, &user, 64);
    }

    assert!(h.writes.is_empty());
    assert_eq!(h.counters.get(Counter::Emitted), 3);
    assert_eq!(h.counters.get(Counter::ChannelFull), 1);
    let events = drain(&h.ring);
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.payload() == [3; 64]));
}

#[test]
fn test_pid_filter_ignores_other_processes() {
    let ring = EventRing::<RING>::new();
    let reads = CallTable::<8>::new();
    let writes = CallTable::<8>::new();
    let counters = AtomicCounters::new();
    let sets = FakeTargets::pids(&[42]);
    let targets = TargetRules::new(CaptureConfig::new(FLAG_PID_FILTER), &sets);
    let capture = TlsCapture::new(&ring, &reads, &writes, &targets, &counters);
    let user = FakeMemory::new().map(BUF_A, vec![1; 8]);

    let outsider = FakeTask::leader(7);
    capture.on_entry(Direction::Write, &outsider, BUF_A, 8);
    capture.on_return(Direction::Write, &outsider, &user, 8);
    assert!(writes.is_empty());
    assert_eq!(counters.get(Counter::Unmatched), 0);

    let target = FakeTask::new(42, 43);
    capture.on_entry(Direction::Write, &target, BUF_A, 8);
    capture.on_return(Direction::Write, &target, &user, 8);

    let events = drain(&ring);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pid, 42);
}

#[test]
fn test_concurrent_threads_count_no_store_failures() {
    static READS: CallTable<64> = CallTable::new();
    static WRITES: CallTable<64> = CallTable::new();
    let ring = EventRing::<RING>::new();
    let counters = AtomicCounters::new();
    let capture = TlsCapture::new(&ring, &READS, &WRITES, &AllTargets, &counters);
    let user = FakeMemory::new();

    std::thread::scope(|s| {
        for tid in 1..=16 {
            let (capture, user) = (&capture, &user);
            s.spawn(move || {
                let task = FakeTask::new(700, tid);
                for _ in 0..5_000 {
                    capture.on_entry(Direction::Read, &task, BUF_A, 64);
                    capture.on_return(Direction::Read, &task, user, 0);
                }
            });
        }
    });

    assert_eq!(counters.get(Counter::StoreFull), 0);
    assert_eq!(counters.get(Counter::Unmatched), 0);
    assert!(READS.is_empty());
}

/// Runs one write call for `task` and reports whether it was captured
fn captured_with(config: CaptureConfig, sets: &FakeTargets, task: &FakeTask) -> bool {
    let ring = EventRing::<RING>::new();
    let reads = CallTable::<8>::new();
    let writes = CallTable::<8>::new();
    let counters = AtomicCounters::new();
    let targets = TargetRules::new(config, sets);
    let capture = TlsCapture::new(&ring, &reads, &writes, &targets, &counters);
    let user = FakeMemory::new().map(BUF_A, vec![1; 8]);

    capture.on_entry(Direction::Write, task, BUF_A, 8);
    capture.on_return(Direction::Write, task, &user, 8);
    assert!(writes.is_empty());
    assert_eq!(counters.get(Counter::Unmatched), 0);
    drain(&ring).len() == 1
}

#[test]
fn test_comm_filter_matches_thread_name() {
    let sets = FakeTargets::comms(&["curl", "python3"]);
    let config = CaptureConfig::new(FLAG_COMM_FILTER);

    assert!(captured_with(config, &sets, &FakeTask::new(7, 8).with_comm("curl")));
    assert!(captured_with(config, &sets, &FakeTask::leader(9).with_comm("python3")));
    assert!(!captured_with(config, &sets, &FakeTask::leader(7).with_comm("wget")));
    assert!(!captured_with(config, &sets, &FakeTask::leader(7).with_comm("curl-wrapper")));
}

#[test]
fn test_comm_filter_uses_truncated_kernel_name() {
    let sets = FakeTargets::comms(&["very-long-service-name"]);
    let config = CaptureConfig::new(FLAG_COMM_FILTER);

    let task = FakeTask::leader(7).with_comm("very-long-servi");
    assert!(captured_with(config, &sets, &task));
}

#[test]
fn test_pid_and_comm_filters_must_both_match() {
    let sets = FakeTargets { pids: vec![42], ..FakeTargets::comms(&["curl"]) };
    let config = CaptureConfig::new(FLAG_PID_FILTER | FLAG_COMM_FILTER);

    assert!(captured_with(config, &sets, &FakeTask::leader(42).with_comm("curl")));
    assert!(!captured_with(config, &sets, &FakeTask::leader(42).with_comm("wget")));
    assert!(!captured_with(config, &sets, &FakeTask::leader(43).with_comm("curl")));
}

#[test]
fn test_disabled_filters_capture_everything() {
    let sets = FakeTargets { pids: vec![42], ..FakeTargets::comms(&["curl"]) };

    assert!(captured_with(CaptureConfig::default(), &sets, &FakeTask::leader(7).with_comm("wget")));
}

fn task_key(task: &FakeTask) -> u64 {
    (u64::from(task.tgid) << 32) | u64::from(task.tid)
}
