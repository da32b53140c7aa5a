//! deferred-pubsub demo
//!
//! Walks through the core publish/subscribe scenarios against a fresh dispatcher
//! and hub with logging enabled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::bounded;
use tracing::info;

use deferred_pubsub::{logging, Affinity, Dispatcher, DispatcherConfig, Hub};

/// Demo configuration
struct Config {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    log_filter: String,
    /// Worker queue capacity
    queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "deferred_pubsub=debug,pubsub_demo=info".to_string(),
            queue_capacity: DispatcherConfig::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--log" | "-l" => {
                if i + 1 < args.len() {
                    config.log_filter.clone_from(&args[i + 1]);
                    i += 2;
                } else {
                    eprintln!("error: --log requires a value");
                    std::process::exit(1);
                }
            }
            "--queue-capacity" | "-q" => {
                if i + 1 < args.len() {
                    config.queue_capacity = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("error: invalid queue capacity: {}", args[i + 1]);
                        std::process::exit(1);
                    });
                    i += 2;
                } else {
                    eprintln!("error: --queue-capacity requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("pubsub-demo - deferred-pubsub walkthrough");
                println!();
                println!("USAGE:");
                println!("    pubsub-demo [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -l, --log <FILTER>           Log filter [default: deferred_pubsub=debug]");
                println!("    -q, --queue-capacity <N>     Worker queue capacity [default: 20]");
                println!("    -h, --help                   Print help information");
                std::process::exit(0);
            }
            other => {
                eprintln!("error: unknown argument: {other}");
                std::process::exit(1);
            }
        }
    }

    config
}

fn main() {
    let config = parse_args();
    logging::init(&config.log_filter);

    let dispatcher = Arc::new(Dispatcher::with_config(DispatcherConfig {
        queue_capacity: config.queue_capacity,
        ..DispatcherConfig::default()
    }));
    let hub: Arc<Hub<i32>> = Arc::new(Hub::new(Arc::clone(&dispatcher)));

    scenario_sync(&hub);
    scenario_mixed(&hub);
    scenario_nested_subscribe(&hub);
    scenario_overflow(&dispatcher);
    scenario_faulty_handler(&hub);

    let hub_stats = hub.stats();
    let dispatch_stats = dispatcher.stats();
    info!(
        publishes = hub_stats.publishes,
        sync = hub_stats.sync_deliveries,
        async_deliveries = hub_stats.async_deliveries,
        deferred_ops = hub_stats.deferred_ops,
        workers = dispatcher.worker_count(),
        handler_faults = dispatch_stats.handler_faults,
        "demo finished"
    );
}

/// A sync subscriber sees the message before publish returns.
fn scenario_sync(hub: &Hub<i32>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    hub.subscribe_sync("a", move |v| sink.lock().unwrap_or_else(|e| e.into_inner()).push(v));
    hub.publish("a", 42);
    let seen = seen.lock().unwrap_or_else(|e| e.into_inner()).clone();
    info!(?seen, "scenario a");
}

/// Sync effect is immediate, the priority 0 async effect follows later.
fn scenario_mixed(hub: &Hub<i32>) {
    let (tx, rx) = bounded(1);
    hub.subscribe_sync("b", |v| info!(v, "b sync handler"));
    hub.subscribe_async_with_priority(
        "b",
        move |v| {
            let _ = tx.send(v);
        },
        0,
    );
    hub.publish("b", 41);
    match rx.recv_timeout(Duration::from_secs(1)) {
        Ok(v) => info!(v, "scenario b: async handler done"),
        Err(err) => info!(%err, "scenario b: async handler did not run"),
    }
}

/// A subscribe made inside a handler applies after the outer publish.
fn scenario_nested_subscribe(hub: &Arc<Hub<i32>>) {
    let late_hits = Arc::new(AtomicUsize::new(0));
    let weak = Arc::downgrade(hub);
    let hits = Arc::clone(&late_hits);
    hub.subscribe_sync("c", move |v| {
        let Some(hub) = weak.upgrade() else { return };
        let hits = Arc::clone(&hits);
        hub.subscribe_sync("d", move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        hub.publish("d", v);
    });

    hub.publish("c", 1);
    info!(d_hits = late_hits.load(Ordering::SeqCst), "scenario c: publish inside handler");
    hub.publish("d", 2);
    info!(d_hits = late_hits.load(Ordering::SeqCst), "scenario d: publish after registration");
}

/// More submissions than the queue holds all complete, in order.
fn scenario_overflow(dispatcher: &Dispatcher) {
    let total = dispatcher.config().effective_queue_capacity() + 3;
    let order = Arc::new(Mutex::new(Vec::with_capacity(total)));
    let (done_tx, done_rx) = bounded(1);
    for i in 0..total {
        let order = Arc::clone(&order);
        let done_tx = done_tx.clone();
        dispatcher.submit_to(
            move || {
                std::thread::sleep(Duration::from_millis(1));
                order.lock().unwrap_or_else(|e| e.into_inner()).push(i);
                if i + 1 == total {
                    let _ = done_tx.send(());
                }
            },
            2,
            Some(Affinity::Any),
        );
    }
    let _ = done_rx.recv_timeout(Duration::from_secs(5));
    let order = order.lock().unwrap_or_else(|e| e.into_inner());
    let in_order = order.windows(2).all(|w| w[0] < w[1]);
    info!(total, completed = order.len(), in_order, "scenario overflow");
}

/// A panicking async handler does not stop its worker.
fn scenario_faulty_handler(hub: &Hub<i32>) {
    let (tx, rx) = bounded(1);
    hub.subscribe_async_with_priority("fault", |_| panic!("handler failure"), 3);
    hub.subscribe_async_with_priority(
        "fault",
        move |v| {
            let _ = tx.send(v);
        },
        3,
    );
    hub.publish("fault", 5);
    let delivered = rx.recv_timeout(Duration::from_secs(1)).is_ok();
    info!(delivered, "scenario fault: worker survived panicking handler");
}
