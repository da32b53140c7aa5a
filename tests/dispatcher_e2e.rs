use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;

use deferred_pubsub::{Affinity, Dispatcher, DispatcherConfig, ThreadScheduler};

fn dispatcher(queue_capacity: usize) -> Dispatcher {
    Dispatcher::with_config(DispatcherConfig {
        queue_capacity,
        enqueue_timeout: Duration::from_secs(5),
        worker_stack_size: 128 * 1024,
        worker_name_prefix: "e2e".to_string(),
        ..DispatcherConfig::default()
    })
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn overflow_submissions_all_complete_in_order() {
    let dispatcher = dispatcher(DispatcherConfig::DEFAULT_QUEUE_CAPACITY);
    let total = DispatcherConfig::DEFAULT_QUEUE_CAPACITY + 3;
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..total {
        let order = Arc::clone(&order);
        dispatcher.submit_to(
            move || {
                thread::sleep(Duration::from_millis(2));
                order.lock().unwrap().push(i);
            },
            2,
            Some(Affinity::Any),
        );
    }

    wait_for(|| order.lock().unwrap().len() == total);
    assert_eq!(*order.lock().unwrap(), (0..total).collect::<Vec<_>>());
    assert_eq!(dispatcher.worker_count(), 1);
}

#[test]
fn fifo_per_key_with_concurrent_submitters() {
    let dispatcher = Arc::new(dispatcher(4));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let submitters: Vec<_> = (0..3)
        .map(|producer| {
            let dispatcher = Arc::clone(&dispatcher);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for seq in 0..50 {
                    let seen = Arc::clone(&seen);
                    dispatcher.submit_to(
                        move || seen.lock().unwrap().push((producer, seq)),
                        1,
                        Some(Affinity::Any),
                    );
                }
            })
        })
        .collect();
    for handle in submitters {
        handle.join().unwrap();
    }

    wait_for(|| seen.lock().unwrap().len() == 150);
    let seen = seen.lock().unwrap();
    for producer in 0..3 {
        let seqs: Vec<i32> = seen.iter().filter(|(p, _)| *p == producer).map(|(_, s)| *s).collect();
        assert_eq!(seqs, (0..50).collect::<Vec<_>>());
    }
}

#[test]
fn panicking_call_does_not_stop_worker() {
    let dispatcher = dispatcher(8);
    let (tx, rx) = bounded(1);

    dispatcher.submit_to(|| panic!("deferred call failure"), 0, Some(Affinity::Any));
    dispatcher.submit_to(move || tx.send("after").unwrap(), 0, Some(Affinity::Any));

    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "after");
    wait_for(|| dispatcher.stats().executed == 2);
    assert_eq!(dispatcher.stats().handler_faults, 1);
}

#[test]
fn different_keys_run_concurrently() {
    let dispatcher = dispatcher(8);
    let (release_tx, release_rx) = bounded::<()>(0);
    let (tx, rx) = bounded(1);

    dispatcher.submit_to(
        move || {
            let _ = release_rx.recv();
        },
        0,
        Some(Affinity::Any),
    );
    dispatcher.submit_to(move || tx.send(()).unwrap(), 1, Some(Affinity::Any));

    // Priority 0 is blocked; priority 1 still makes progress.
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(dispatcher.worker_count(), 2);
    drop(release_tx);
}

#[test]
fn worker_reports_its_key_as_context() {
    let dispatcher = dispatcher(8);
    let (tx, rx) = bounded(1);
    dispatcher.submit_to(
        move || {
            let name = thread::current().name().map(str::to_string);
            tx.send((ThreadScheduler::recorded_context(), name)).unwrap();
        },
        7,
        Some(Affinity::Any),
    );

    let (ctx, name) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let ctx = ctx.unwrap();
    assert_eq!((ctx.priority, ctx.affinity), (7, Affinity::Any));
    assert_eq!(name.as_deref(), Some("e2e-p7c*"));
}

#[test]
fn nested_submission_from_worker() {
    let dispatcher = Arc::new(dispatcher(8));
    let count = Arc::new(AtomicUsize::new(0));

    let inner = Arc::clone(&dispatcher);
    let outer_count = Arc::clone(&count);
    dispatcher.submit_to(
        move || {
            outer_count.fetch_add(1, Ordering::SeqCst);
            let count = Arc::clone(&outer_count);
            // Affinity resolves to the worker's own.
            inner.submit_to(
                move || {
                    count.fetch_add(1, Ordering::SeqCst);
                },
                0,
                None,
            );
        },
        0,
        Some(Affinity::Any),
    );

    wait_for(|| count.load(Ordering::SeqCst) == 2);
    assert_eq!(dispatcher.worker_count(), 1);
}
