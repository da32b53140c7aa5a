use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, error};

use crate::error::DispatchError;

use super::DeferredCall;

/// Counters shared between the dispatcher and its workers.
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    pub submitted: AtomicU64,
    pub executed: AtomicU64,
    pub handler_faults: AtomicU64,
}

/// Point-in-time view of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Calls accepted into a worker queue.
    pub submitted: u64,
    /// Calls that finished, including the ones that panicked.
    pub executed: u64,
    /// Calls that panicked.
    pub handler_faults: u64,
}

impl WorkerCounters {
    pub(crate) fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Acquire),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
        }
    }
}

/// Drains one worker queue until every sender is gone.
///
/// A panicking call is contained here: it is logged and counted, and the
/// worker moves on to the next entry so one faulty handler cannot stall its
/// (priority, affinity) key. A [`DispatchError`] payload is the fatal
/// enqueue path of a nested submit and is re-raised, ending the worker.
pub(crate) fn run(name: &str, rx: &Receiver<DeferredCall>, counters: &Arc<WorkerCounters>) {
    while let Ok(call) = rx.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
            if payload.is::<DispatchError>() {
                error!(worker = name, "fatal dispatch failure inside deferred call, worker stops");
                panic::resume_unwind(payload);
            }
            counters.handler_faults.fetch_add(1, Ordering::Relaxed);
            error!(worker = name, fault = %panic_message(payload.as_ref()), "deferred call panicked");
        }
        counters.executed.fetch_add(1, Ordering::Release);
    }
    debug!(worker = name, "deferred call queue closed, worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam_channel::bounded;
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn runs_calls_in_order_and_exits_when_closed() {
        let (tx, rx) = bounded::<DeferredCall>(4);
        let counters = Arc::new(WorkerCounters::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = Arc::clone(&seen);
            tx.send(Box::new(move || seen.lock().unwrap().push(i))).unwrap();
        }
        drop(tx);

        let worker_counters = Arc::clone(&counters);
        thread::spawn(move || run("test", &rx, &worker_counters)).join().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(counters.snapshot().executed, 3);
        assert_eq!(counters.snapshot().handler_faults, 0);
    }

    #[test]
    fn panicking_call_does_not_stop_worker() {
        let (tx, rx) = bounded::<DeferredCall>(4);
        let counters = Arc::new(WorkerCounters::default());
        let (done_tx, done_rx) = bounded(1);

        tx.send(Box::new(|| panic!("handler fault"))).unwrap();
        tx.send(Box::new(move || done_tx.send(()).unwrap())).unwrap();
        drop(tx);

        let worker_counters = Arc::clone(&counters);
        thread::spawn(move || run("test", &rx, &worker_counters)).join().unwrap();

        assert!(done_rx.try_recv().is_ok());
        let stats = counters.snapshot();
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.handler_faults, 1);
    }

    #[test]
    fn dispatch_error_payload_ends_the_worker() {
        let (tx, rx) = bounded::<DeferredCall>(4);
        let counters = Arc::new(WorkerCounters::default());
        let (later_tx, later_rx) = bounded(1);

        tx.send(Box::new(|| {
            panic::panic_any(DispatchError::QueueTimeout {
                worker: "test-p0c*".to_string(),
                timeout_ms: 5,
            })
        }))
        .unwrap();
        tx.send(Box::new(move || later_tx.send(()).unwrap())).unwrap();

        let worker_counters = Arc::clone(&counters);
        let joined = thread::spawn(move || run("test", &rx, &worker_counters)).join();

        let payload = joined.unwrap_err();
        assert!(payload.downcast_ref::<DispatchError>().is_some());
        assert!(later_rx.try_recv().is_err());
        assert_eq!(counters.snapshot().handler_faults, 0);
        assert!(tx.send(Box::new(|| {})).is_err());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
