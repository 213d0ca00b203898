//! Benchmarks comparing handle-based access against std associative maps.
//!
//! Run with: cargo bench --bench cache
//!
//! The interesting comparison is the hot path: a pre-handed-out handle
//! resolving straight to its slot versus `HashMap`/`BTreeMap` lookups that
//! hash or walk the tree on every access.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use handle_cache::{Handle, HandleCache, ShardedHandleCache};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

const ITEM_COUNT: usize = 1 << 16;
const PROBE_COUNT: usize = 1 << 14;
const INSERT_ERASE_COUNT: usize = 1 << 12;
const NODE_TYPE: u8 = 1;

/// Golden-ratio key mixing keeps the keyset spread without a rng in the
/// measured loop.
fn make_key(i: usize) -> u64 {
    (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0xD1B5_4A32_D192_ED03
}

fn probe_stream(len: usize, bound: usize) -> Vec<usize> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x0DDC_0FFE_EBAD_F00D);
    (0..len).map(|_| rng.gen_range(0..bound)).collect()
}

struct Dataset {
    cache: HandleCache<u64, u64>,
    unordered: HashMap<u64, u64>,
    ordered: BTreeMap<u64, u64>,
    keys: Vec<u64>,
    handles: Vec<Handle>,
    probes: Vec<usize>,
}

impl Dataset {
    fn new() -> Self {
        let mut cache = HandleCache::with_capacity(ITEM_COUNT);
        let mut unordered = HashMap::with_capacity(ITEM_COUNT);
        let mut ordered = BTreeMap::new();
        let mut keys = Vec::with_capacity(ITEM_COUNT);
        let mut handles = Vec::with_capacity(ITEM_COUNT);

        for i in 0..ITEM_COUNT {
            let key = make_key(i);
            let value = i as u64;
            keys.push(key);
            handles.push(cache.insert(NODE_TYPE, key, value));
            unordered.insert(key, value);
            ordered.insert(key, value);
        }

        Self {
            cache,
            unordered,
            ordered,
            keys,
            handles,
            probes: probe_stream(PROBE_COUNT, ITEM_COUNT),
        }
    }
}

fn bench_read(c: &mut Criterion) {
    let data = Dataset::new();
    let mut group = c.benchmark_group("cache/read");
    group.throughput(Throughput::Elements(PROBE_COUNT as u64));

    group.bench_function("handle", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for &idx in &data.probes {
                sum += data.cache.get(data.handles[idx]).unwrap();
            }
            black_box(sum)
        });
    });

    group.bench_function("hashmap", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for &idx in &data.probes {
                sum += data.unordered[&data.keys[idx]];
            }
            black_box(sum)
        });
    });

    group.bench_function("btreemap", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for &idx in &data.probes {
                sum += data.ordered[&data.keys[idx]];
            }
            black_box(sum)
        });
    });

    // Key-routed lookup for comparison: one hash probe, then the handle.
    group.bench_function("find_handle", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for &idx in &data.probes {
                let handle = data.cache.find_handle(&data.keys[idx]);
                sum += data.cache.get(handle).unwrap();
            }
            black_box(sum)
        });
    });

    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let mut data = Dataset::new();
    let mut group = c.benchmark_group("cache/update");
    group.throughput(Throughput::Elements(PROBE_COUNT as u64));

    let probes = data.probes.clone();

    group.bench_function("handle", |b| {
        b.iter(|| {
            for &idx in &probes {
                *data.cache.get_mut(data.handles[idx]).unwrap() += 1;
            }
        });
    });

    group.bench_function("hashmap", |b| {
        b.iter(|| {
            for &idx in &probes {
                *data.unordered.get_mut(&data.keys[idx]).unwrap() += 1;
            }
        });
    });

    group.bench_function("btreemap", |b| {
        b.iter(|| {
            for &idx in &probes {
                *data.ordered.get_mut(&data.keys[idx]).unwrap() += 1;
            }
        });
    });

    group.finish();
}

fn bench_insert_erase(c: &mut Criterion) {
    let keys: Vec<u64> = (0..INSERT_ERASE_COUNT).map(make_key).collect();
    let mut group = c.benchmark_group("cache/insert_erase");
    group.throughput(Throughput::Elements(2 * INSERT_ERASE_COUNT as u64));

    group.bench_function("handle", |b| {
        b.iter_batched(
            || HandleCache::with_capacity(INSERT_ERASE_COUNT),
            |mut cache| {
                let mut handles = Vec::with_capacity(INSERT_ERASE_COUNT);
                for (i, &key) in keys.iter().enumerate() {
                    handles.push(cache.insert(NODE_TYPE, key, i as u64));
                }
                let mut erased = 0usize;
                for handle in handles {
                    erased += cache.erase(handle) as usize;
                }
                black_box(erased)
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.bench_function("hashmap", |b| {
        b.iter_batched(
            || HashMap::with_capacity(INSERT_ERASE_COUNT),
            |mut map| {
                for (i, &key) in keys.iter().enumerate() {
                    map.insert(key, i as u64);
                }
                let mut erased = 0usize;
                for key in &keys {
                    erased += map.remove(key).is_some() as usize;
                }
                black_box(erased)
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.bench_function("btreemap", |b| {
        b.iter_batched(
            BTreeMap::new,
            |mut map| {
                for (i, &key) in keys.iter().enumerate() {
                    map.insert(key, i as u64);
                }
                let mut erased = 0usize;
                for key in &keys {
                    erased += map.remove(key).is_some() as usize;
                }
                black_box(erased)
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_sharded_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("sharded/concurrent");

    for num_threads in [1usize, 2, 4, 8] {
        // Over-provisioned so hashed key routing cannot overflow one shard.
        let cache: Arc<ShardedHandleCache<u64, u64>> =
            Arc::new(ShardedHandleCache::new(num_threads * 2, ITEM_COUNT * 2));
        let handles: Arc<Vec<Handle>> = Arc::new(
            (0..ITEM_COUNT)
                .map(|i| cache.insert(NODE_TYPE, make_key(i), i as u64))
                .collect(),
        );
        let probes = Arc::new(probe_stream(PROBE_COUNT, ITEM_COUNT));
        let ops_per_thread = PROBE_COUNT / num_threads;

        group.throughput(Throughput::Elements((num_threads * ops_per_thread) as u64));

        group.bench_with_input(
            BenchmarkId::new("read", num_threads),
            &num_threads,
            |b, &num_threads| {
                b.iter(|| {
                    let workers: Vec<_> = (0..num_threads)
                        .map(|t| {
                            let cache = Arc::clone(&cache);
                            let handles = Arc::clone(&handles);
                            let probes = Arc::clone(&probes);
                            thread::spawn(move || {
                                let mut sum = 0u64;
                                for i in 0..ops_per_thread {
                                    let idx = probes[(t * ops_per_thread + i) % probes.len()];
                                    cache.read(handles[idx], |v| sum += *v);
                                }
                                black_box(sum)
                            })
                        })
                        .collect();
                    for worker in workers {
                        worker.join().unwrap();
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("add", num_threads),
            &num_threads,
            |b, &num_threads| {
                b.iter(|| {
                    let workers: Vec<_> = (0..num_threads)
                        .map(|t| {
                            let cache = Arc::clone(&cache);
                            let handles = Arc::clone(&handles);
                            let probes = Arc::clone(&probes);
                            thread::spawn(move || {
                                let mut ok = 0usize;
                                for i in 0..ops_per_thread {
                                    let idx = probes[(t * ops_per_thread + i) % probes.len()];
                                    ok += cache.add(handles[idx], 1) as usize;
                                }
                                black_box(ok)
                            })
                        })
                        .collect();
                    for worker in workers {
                        worker.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_read,
    bench_update,
    bench_insert_erase,
    bench_sharded_concurrent,
);

criterion_main!(benches);
