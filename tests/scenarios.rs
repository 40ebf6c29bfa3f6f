//! End-to-end scenarios and concurrent workload checks against the public
//! `Map`/`StmRuntime` surface.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use nbds::epoch::Epoch;
use nbds::key::{Key, DEFAULT_KEY_DESCRIPTOR, DOES_NOT_EXIST};
use nbds::map::Map;
use nbds::stm::{Isolation, StmRuntime};

fn b(s: &str) -> Key {
    Key::from_bytes(s.as_bytes())
}

#[test]
fn scenario_basic_list() {
    let map = Map::new_list(DEFAULT_KEY_DESCRIPTOR);
    let epoch = Epoch::new();
    let g = epoch.register();

    assert_eq!(map.add(b("a"), 10, &g), DOES_NOT_EXIST);
    assert_eq!(map.add(b("b"), 20, &g), DOES_NOT_EXIST);
    assert_eq!(map.get(&b("b"), &g), 20);
    assert_eq!(map.set(b("a"), 11, &g), 10);
    assert_eq!(map.add(b("b"), 22, &g), 20);
    assert_eq!(map.remove(&b("a"), &g), 11);
    assert_eq!(map.get(&b("a"), &g), DOES_NOT_EXIST);
    assert_eq!(map.count(&g).unwrap(), 1);
}

#[test]
fn scenario_basic_skiplist_iteration() {
    let map = Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR);
    let epoch = Epoch::new();
    let g = epoch.register();

    assert_eq!(map.add(Key::Int(1), 1, &g), DOES_NOT_EXIST);
    assert_eq!(map.add(Key::Int(2), 2, &g), DOES_NOT_EXIST);
    assert_eq!(map.add(Key::Int(3), 3, &g), DOES_NOT_EXIST);

    let mut it = map.iter_begin(None, &g).unwrap();
    assert_eq!(it.next(), Some((Key::Int(1), 1)));
    assert_eq!(it.next(), Some((Key::Int(2), 2)));
    assert_eq!(it.next(), Some((Key::Int(3), 3)));
    assert_eq!(it.next(), None);
}

#[test]
fn scenario_hash_table_grow() {
    let map = Map::new_hash_int();
    let epoch = Epoch::new();
    let g = epoch.register();

    for i in 0..12u64 {
        assert_eq!(map.add(Key::Int(i + 1), (i + 1) * 10, &g), DOES_NOT_EXIST);
    }
    for i in 0..12u64 {
        assert_eq!(map.get(&Key::Int(i + 1), &g), (i + 1) * 10);
    }

    for i in 0..6u64 {
        map.remove(&Key::Int(i + 1), &g);
    }
    assert_eq!(map.count(&g).unwrap(), 6);

    for i in 12..32u64 {
        assert_eq!(map.add(Key::Int(i + 1), (i + 1) * 10, &g), DOES_NOT_EXIST);
    }
    for i in 6..32u64 {
        assert_eq!(map.get(&Key::Int(i + 1), &g), (i + 1) * 10);
    }
    assert_eq!(map.count(&g).unwrap(), 26);
}

#[test]
fn scenario_stm_write_write_conflict_then_read_only() {
    let runtime = StmRuntime::new(Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR));
    let epoch = Epoch::new();
    let g = epoch.register();

    let mut t1 = runtime.begin(Isolation::RepeatableRead, &g);
    let mut t2 = runtime.begin(Isolation::RepeatableRead, &g);

    t1.set(Key::Int(100), 2);
    t1.set(Key::Int(100), 3);
    assert_eq!(t2.get(&Key::Int(100)), DOES_NOT_EXIST);
    t2.set(Key::Int(100), 4);
    assert_eq!(t1.get(&Key::Int(100)), 3);
    assert_eq!(t2.get(&Key::Int(100)), 4);

    assert!(t2.commit().is_ok());
    assert!(t1.commit().is_err());

    let reader = runtime.begin(Isolation::RepeatableRead, &g);
    assert_eq!(reader.get(&Key::Int(100)), 4);
    assert!(reader.commit().is_ok());

    let t3 = runtime.begin(Isolation::ReadOnly, &g);
    assert_eq!(t3.get(&Key::Int(100)), 4);
    assert!(t3.commit().is_ok());
}

#[test]
fn scenario_hash_table_iterator_forwarding_during_grow() {
    let map = Map::new_hash_int();
    let epoch = Epoch::new();
    let g = epoch.register();

    for i in 0..12u64 {
        map.add(Key::Int(i + 1), i + 1, &g);
    }

    let mut it = map.iter_begin(None, &g).unwrap();

    for i in 12..40u64 {
        map.add(Key::Int(i + 1), i + 1, &g);
    }

    let mut seen = std::collections::HashSet::new();
    while let Some((k, v)) = it.next() {
        if let Key::Int(k) = k {
            assert_eq!(k, v);
            assert!(seen.insert(k), "key {} observed twice", k);
        }
    }
    assert!(seen.len() >= 12, "iterator must see at least the pre-grow keys once");
}

#[test]
fn law_insert_then_get() {
    let map = Map::new_hash_int();
    let epoch = Epoch::new();
    let g = epoch.register();
    assert_eq!(map.add(Key::Int(7), 70, &g), DOES_NOT_EXIST);
    assert_eq!(map.get(&Key::Int(7), &g), 70);
}

#[test]
fn law_remove_idempotence() {
    let map = Map::new_list(DEFAULT_KEY_DESCRIPTOR);
    let epoch = Epoch::new();
    let g = epoch.register();
    map.add(b("x"), 1, &g);
    assert_eq!(map.remove(&b("x"), &g), 1);
    assert_eq!(map.remove(&b("x"), &g), DOES_NOT_EXIST);
}

#[test]
fn law_replace_conservation() {
    let map = Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR);
    let epoch = Epoch::new();
    let g = epoch.register();
    map.add(Key::Int(1), 1, &g);
    assert_eq!(map.replace(Key::Int(1), 2, &g), 1);
    assert_eq!(map.get(&Key::Int(1), &g), 2);
}

#[test]
fn law_cas_linearizable_in_sequential_history() {
    let map = Map::new_hash_int();
    let epoch = Epoch::new();
    let g = epoch.register();
    map.add(Key::Int(1), 1, &g);
    assert_eq!(map.cas(Key::Int(1), 1, 2, &g), 1);
    assert_eq!(map.cas(Key::Int(1), 1, 3, &g), 2); // stale expectation, rejected
    assert_eq!(map.get(&Key::Int(1), &g), 2);
}

#[test]
fn law_stm_snapshot_repeated_reads_agree_until_commit() {
    let runtime = StmRuntime::new(Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR));
    let epoch = Epoch::new();
    let g = epoch.register();
    let mut setup = runtime.begin(Isolation::RepeatableRead, &g);
    setup.set(Key::Int(9), 1);
    setup.commit().unwrap();

    let reader = runtime.begin(Isolation::RepeatableRead, &g);
    let first = reader.get(&Key::Int(9));

    let mut writer = runtime.begin(Isolation::RepeatableRead, &g);
    writer.set(Key::Int(9), 2);
    writer.commit().unwrap();

    assert_eq!(reader.get(&Key::Int(9)), first);
    reader.commit().unwrap();
}

/// Two threads add disjoint (even/odd) key ranges, observe the full set,
/// then each removes its own subset; the map returns to empty. Repeated
/// several times with a quiescence check (`count() == 0`) after each round.
#[test]
fn concurrent_workload_add_remove_disjoint_ranges() {
    const N: u64 = 2_000;
    const ROUNDS: usize = 10;

    let map = Arc::new(Map::new_hash_int());
    let epoch = Arc::new(Epoch::new());

    for _round in 0..ROUNDS {
        let added = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = [0u64, 1u64]
            .into_iter()
            .map(|parity| {
                let map = Arc::clone(&map);
                let epoch = Arc::clone(&epoch);
                let added = Arc::clone(&added);
                thread::spawn(move || {
                    let g = epoch.register();
                    let mut i = parity;
                    while i < N {
                        if map.add(Key::Int(i + 1), i + 1, &g) == DOES_NOT_EXIST {
                            added.fetch_add(1, Ordering::Relaxed);
                        }
                        i += 2;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(added.load(Ordering::Relaxed) as u64, N);
        {
            let g = epoch.register();
            assert_eq!(map.count(&g).unwrap(), N);
            for i in 0..N {
                assert_eq!(map.get(&Key::Int(i + 1), &g), i + 1);
            }
        }

        let handles: Vec<_> = [0u64, 1u64]
            .into_iter()
            .map(|parity| {
                let map = Arc::clone(&map);
                let epoch = Arc::clone(&epoch);
                thread::spawn(move || {
                    let g = epoch.register();
                    let mut i = parity;
                    while i < N {
                        map.remove(&Key::Int(i + 1), &g);
                        i += 2;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let g = epoch.register();
        assert_eq!(map.count(&g).unwrap(), 0);
    }
}
