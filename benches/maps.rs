use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use nbds::epoch::Epoch;
use nbds::key::{Key, DEFAULT_KEY_DESCRIPTOR};
use nbds::map::Map;
use nbds::stm::{Isolation, StmRuntime};
use rand::Rng;
use std::sync::Arc;
use std::thread;

const PREFILL: u64 = 4_096;

fn prefilled_list() -> Map {
    let map = Map::new_list(DEFAULT_KEY_DESCRIPTOR);
    let epoch = Epoch::new();
    let g = epoch.register();
    for i in 0..PREFILL {
        map.add(Key::Int(i), i, &g);
    }
    map
}

fn prefilled_skiplist() -> Map {
    let map = Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR);
    let epoch = Epoch::new();
    let g = epoch.register();
    for i in 0..PREFILL {
        map.add(Key::Int(i), i, &g);
    }
    map
}

fn prefilled_hash_table() -> Map {
    let map = Map::new_hash_int();
    let epoch = Epoch::new();
    let g = epoch.register();
    for i in 0..PREFILL {
        map.add(Key::Int(i), i, &g);
    }
    map
}

fn bench_single_thread_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("single-thread get (hit)");

    let list = prefilled_list();
    let epoch = Epoch::new();
    let g = epoch.register();
    group.bench_function("list", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Key::Int(i % PREFILL);
            i += 1;
            black_box(list.get(&key, &g))
        });
    });

    let skiplist = prefilled_skiplist();
    group.bench_function("skiplist", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Key::Int(i % PREFILL);
            i += 1;
            black_box(skiplist.get(&key, &g))
        });
    });

    let hash_table = prefilled_hash_table();
    group.bench_function("hash_table", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Key::Int(i % PREFILL);
            i += 1;
            black_box(hash_table.get(&key, &g))
        });
    });

    group.finish();
}

fn bench_insert_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert then remove, fresh key");

    group.bench_function("list", |b| {
        let list = Map::new_list(DEFAULT_KEY_DESCRIPTOR);
        let epoch = Epoch::new();
        let g = epoch.register();
        let mut next = 0u64;
        b.iter_batched(
            || {
                next += 1;
                next
            },
            |k| {
                list.add(Key::Int(k), k, &g);
                list.remove(&Key::Int(k), &g)
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("skiplist", |b| {
        let skiplist = Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR);
        let epoch = Epoch::new();
        let g = epoch.register();
        let mut next = 0u64;
        b.iter_batched(
            || {
                next += 1;
                next
            },
            |k| {
                skiplist.add(Key::Int(k), k, &g);
                skiplist.remove(&Key::Int(k), &g)
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("hash_table", |b| {
        let hash_table = Map::new_hash_int();
        let epoch = Epoch::new();
        let g = epoch.register();
        let mut next = 0u64;
        b.iter_batched(
            || {
                next += 1;
                next
            },
            |k| {
                hash_table.add(Key::Int(k), k, &g);
                hash_table.remove(&Key::Int(k), &g)
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// A fixed thread pool hammering a shared, prefilled hash table with a
/// uniform random mix of `get`/`add`/`remove`, matching the contention shape
/// the back-ends were actually designed for.
fn bench_contended_hash_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended hash table");
    for &threads in &[2usize, 4, 8] {
        group.bench_function(format!("{threads}-threads"), |b| {
            b.iter_batched(
                || Arc::new(prefilled_hash_table()),
                |map| {
                    let epoch = Arc::new(Epoch::new());
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            let map = Arc::clone(&map);
                            let epoch = Arc::clone(&epoch);
                            thread::spawn(move || {
                                let g = epoch.register();
                                let mut rng = rand::thread_rng();
                                for _ in 0..200 {
                                    let key = Key::Int(rng.gen_range(0..PREFILL * 2));
                                    match rng.gen_range(0..3) {
                                        0 => {
                                            black_box(map.get(&key, &g));
                                        }
                                        1 => {
                                            black_box(map.add(key, 1, &g));
                                        }
                                        _ => {
                                            black_box(map.remove(&key, &g));
                                        }
                                    }
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_stm_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("stm transaction");

    group.bench_function("single write, uncontended", |b| {
        let runtime = StmRuntime::new(Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR));
        let epoch = Epoch::new();
        let g = epoch.register();
        let mut next = 0u64;
        b.iter_batched(
            || {
                next += 1;
                next
            },
            |k| {
                let mut txn = runtime.begin(Isolation::RepeatableRead, &g);
                txn.set(Key::Int(k), k);
                txn.commit().unwrap();
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("read-only", |b| {
        let runtime = StmRuntime::new(Map::new_skiplist(DEFAULT_KEY_DESCRIPTOR));
        let epoch = Epoch::new();
        let g = epoch.register();
        let mut setup = runtime.begin(Isolation::RepeatableRead, &g);
        setup.set(Key::Int(1), 1);
        setup.commit().unwrap();
        b.iter(|| {
            let txn = runtime.begin(Isolation::ReadOnly, &g);
            black_box(txn.get(&Key::Int(1)));
            txn.commit().unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_thread_get,
    bench_insert_remove,
    bench_contended_hash_table,
    bench_stm_commit
);
criterion_main!(benches);
