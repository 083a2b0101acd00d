use std::collections::HashSet;

use plainsight_common::{CallTable, CorrelationStore, PendingCall, StoreError};

fn call(buf: u64, requested: u64) -> PendingCall {
    PendingCall { buf, requested }
}

fn key(tgid: u32, tid: u32) -> u64 {
    (u64::from(tgid) << 32) | u64::from(tid)
}

#[test]
fn test_insert_take_and_overwrite() {
    let table = CallTable::<4>::new();
    assert!(table.take(key(1, 1)).is_none());

    table.insert(key(1, 1), call(0x1000, 10)).unwrap();
    table.insert(key(1, 1), call(0x2000, 20)).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.peek(key(1, 1)), Some(call(0x2000, 20)));

    assert_eq!(table.take(key(1, 1)), Some(call(0x2000, 20)));
    assert!(table.take(key(1, 1)).is_none());
    assert!(table.is_empty());
}

#[test]
fn test_full_table_rejects_new_keys_but_updates_existing() {
    let table = CallTable::<2>::new();
    table.insert(key(1, 1), call(1, 1)).unwrap();
    table.insert(key(1, 2), call(2, 2)).unwrap();

    assert_eq!(table.insert(key(1, 3), call(3, 3)), Err(StoreError::Full));
    table.insert(key(1, 2), call(4, 4)).unwrap();
    assert_eq!(table.len(), 2);

    assert_eq!(table.take(key(1, 1)), Some(call(1, 1)));
    table.insert(key(1, 3), call(3, 3)).unwrap();
    assert_eq!(table.peek(key(1, 3)), Some(call(3, 3)));
}

#[test]
fn test_freed_slots_are_reused() {
    let table = CallTable::<3>::new();
    for round in 0..100_u32 {
        let keys: Vec<_> = (0..3).map(|tid| key(round, tid)).collect();
        for (i, &k) in keys.iter().enumerate() {
            table.insert(k, call(k, i as u64)).unwrap();
        }
        for (i, &k) in keys.iter().enumerate() {
            assert_eq!(table.take(k), Some(call(k, i as u64)));
        }
        assert!(table.is_empty());
    }
}

#[test]
fn test_concurrent_threads_never_rejected_below_capacity() {
    const THREADS: u32 = 16;
    const CYCLES: u64 = 20_000;

    static TABLE: CallTable<1024> = CallTable::new();

    let outcomes: Vec<(u64, u64)> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..THREADS)
            .map(|tid| {
                s.spawn(move || {
                    let k = key(900, tid + 1);
                    let mut rejected = 0;
                    let mut lost = 0;
                    for cycle in 0..CYCLES {
                        let pending = call((u64::from(tid) << 40) | cycle, cycle);
                        if TABLE.insert(k, pending).is_err() {
                            rejected += 1;
                            continue;
                        }
                        if TABLE.take(k) != Some(pending) {
                            lost += 1;
                        }
                    }
                    (rejected, lost)
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert!(outcomes.iter().all(|&(rejected, _)| rejected == 0), "{outcomes:?}");
    assert!(outcomes.iter().all(|&(_, lost)| lost == 0), "{outcomes:?}");
    assert!(TABLE.is_empty());
}

#[test]
fn test_concurrent_pending_entries_stay_separate() {
    const THREADS: u32 = 8;
    const PER_THREAD: u32 = 32;

    let table = CallTable::<{ (THREADS * PER_THREAD) as usize }>::new();
    std::thread::scope(|s| {
        for t in 0..THREADS {
            let table = &table;
            s.spawn(move || {
                for i in 0..PER_THREAD {
                    let k = key(t, i);
                    table.insert(k, call(k, u64::from(i))).unwrap();
                }
            });
        }
    });
    assert_eq!(table.len(), (THREADS * PER_THREAD) as usize);

    let mut seen = HashSet::new();
    for t in 0..THREADS {
        for i in 0..PER_THREAD {
            let k = key(t, i);
            assert_eq!(table.take(k), Some(call(k, u64::from(i))));
            assert!(seen.insert(k));
        }
    }
    assert!(table.is_empty());
}
