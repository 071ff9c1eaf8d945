/*
Cost of drawing one injected delay from the shared latency model, alone and with
several workers sampling at the same time. `spend()` is excluded on purpose: its
cost is the delay itself.
*/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use latency_rig::stages::LatencyModel;
use std::{hint::black_box, sync::Arc, thread};

const THREAD_COUNTS: &[usize] = &[1, 2, 4, 8];
const SAMPLES_PER_THREAD: usize = 10_000;

fn bench_sample(c: &mut Criterion) {
    let model = match LatencyModel::seeded(7) {
        Ok(m) => m,
        Err(e) => panic!("latency model: {}", e),
    };
    c.bench_function("latency_sample", |b| b.iter(|| black_box(model.sample())));
}

fn bench_sample_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency_sample_contention");

    for &threads in THREAD_COUNTS {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let model = match LatencyModel::seeded(7) {
                Ok(m) => Arc::new(m),
                Err(e) => panic!("latency model: {}", e),
            };

            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let m = Arc::clone(&model);
                        thread::spawn(move || {
                            for _ in 0..SAMPLES_PER_THREAD {
                                black_box(m.sample());
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    let _ = h.join();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sample, bench_sample_contention);
criterion_main!(benches);
