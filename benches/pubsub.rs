use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use crossbeam_channel::bounded;

use deferred_pubsub::{Affinity, Dispatcher, DispatcherConfig, Hub};

fn bench_dispatcher() -> Arc<Dispatcher> {
    Arc::new(Dispatcher::with_config(DispatcherConfig {
        queue_capacity: 1024,
        enqueue_timeout: Duration::from_secs(30),
        worker_name_prefix: "bench".to_string(),
        ..DispatcherConfig::default()
    }))
}

fn bench_sync_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_publish");
    group.throughput(Throughput::Elements(1));

    for subscribers in [1usize, 8] {
        group.bench_function(format!("sync_{subscribers}_subscribers"), |b| {
            let hub: Hub<u64> = Hub::new(bench_dispatcher());
            let sum = Arc::new(AtomicU64::new(0));
            for _ in 0..subscribers {
                let sum = Arc::clone(&sum);
                hub.subscribe_sync("bench", move |v| {
                    sum.fetch_add(v, Ordering::Relaxed);
                });
            }

            b.iter(|| hub.publish("bench", black_box(1)));
        });
    }

    group.bench_function("no_subscribers", |b| {
        let hub: Hub<u64> = Hub::new(bench_dispatcher());
        b.iter(|| hub.publish("nobody", black_box(1)));
    });

    group.finish();
}

fn bench_deferred_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher_throughput");
    group.throughput(Throughput::Elements(1));

    group.bench_function("submit_and_drain", |b| {
        // Fresh dispatcher per sample, but exclude worker creation from timing.
        b.iter_custom(|iters| {
            let dispatcher = bench_dispatcher();
            dispatcher.submit_to(|| {}, 1, Some(Affinity::Any));

            let (done_tx, done_rx) = bounded(1);
            let start = Instant::now();
            for i in 0..iters {
                let done_tx = done_tx.clone();
                dispatcher.submit_to(
                    move || {
                        if i + 1 == iters {
                            let _ = done_tx.send(());
                        }
                    },
                    1,
                    Some(Affinity::Any),
                );
            }
            if iters > 0 {
                let _ = done_rx.recv();
            }
            start.elapsed()
        });
    });

    group.bench_function("async_publish", |b| {
        b.iter_custom(|iters| {
            let hub: Hub<u64> = Hub::new(bench_dispatcher());
            let (done_tx, done_rx) = bounded(1);
            hub.subscribe_async_with_priority(
                "bench",
                move |v| {
                    if v + 1 == iters {
                        let _ = done_tx.send(());
                    }
                },
                1,
            );

            let start = Instant::now();
            for i in 0..iters {
                hub.publish("bench", i);
            }
            if iters > 0 {
                let _ = done_rx.recv();
            }
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(pubsub, bench_sync_publish, bench_deferred_calls);
criterion_main!(pubsub);
