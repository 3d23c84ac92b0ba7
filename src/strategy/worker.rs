//! Dedicated parse worker
//!
//! One process-wide thread that runs parse requests for hosts whose own
//! threads must not execute handler callbacks. Requests go through a
//! bounded FIFO queue; each carries its own reply channel and the caller
//! blocks until the answer is back, so callbacks still run synchronously
//! and in document order.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, SendError, SyncSender};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;

use crate::error::ParseError;
use crate::parser::session::{Parser, Status};
use crate::sax::handler::Handler;

/// Pending requests before callers block on submit
const QUEUE_DEPTH: usize = 64;

const UNSTARTED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const FAILED: u8 = 3;

type Job = Box<dyn FnOnce() + Send>;

static STATE: AtomicU8 = AtomicU8::new(UNSTARTED);
static QUEUE: OnceLock<SyncSender<Job>> = OnceLock::new();

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker thread could not be started
    Spawn,
    /// The request panicked on the worker; the worker itself keeps running
    HandlerPanicked,
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerError::Spawn => f.write_str("failed to start the parse worker"),
            WorkerError::HandlerPanicked => f.write_str("parse request panicked on the worker"),
        }
    }
}

impl std::error::Error for WorkerError {}

/// Queue to the worker, starting it on first use
fn queue() -> Option<&'static SyncSender<Job>> {
    loop {
        match STATE.compare_exchange(UNSTARTED, STARTING, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return start(),
            Err(RUNNING) => return QUEUE.get(),
            Err(FAILED) => return None,
            Err(_) => thread::yield_now(),
        }
    }
}

fn start() -> Option<&'static SyncSender<Job>> {
    let (tx, rx) = mpsc::sync_channel::<Job>(QUEUE_DEPTH);
    let spawned = thread::Builder::new()
        .name("rustysax-worker".to_string())
        .spawn(move || {
            ON_WORKER.with(|flag| flag.set(true));
            for job in rx {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::warn!("parse request panicked on the worker");
                }
            }
        });

    match spawned {
        Ok(_) => {
            let queue = QUEUE.get_or_init(|| tx);
            STATE.store(RUNNING, Ordering::Release);
            log::debug!("parse worker started (queue depth {QUEUE_DEPTH})");
            Some(queue)
        }
        Err(err) => {
            log::warn!("could not start parse worker: {err}");
            STATE.store(FAILED, Ordering::Release);
            None
        }
    }
}

/// Run `job` on the worker and wait for its result
pub fn run<F, R>(job: F) -> Result<R, WorkerError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    // Already on the worker: queueing would wait on ourselves
    if ON_WORKER.with(Cell::get) {
        return panic::catch_unwind(AssertUnwindSafe(job)).map_err(|_| WorkerError::HandlerPanicked);
    }

    let queue = queue().ok_or(WorkerError::Spawn)?;
    let (reply_tx, reply_rx) = mpsc::channel();
    let request: Job = Box::new(move || {
        let _ = reply_tx.send(job());
    });
    if let Err(SendError(request)) = queue.send(request) {
        // Worker gone; answer on this thread instead
        request();
    }
    reply_rx.recv().map_err(|_| WorkerError::HandlerPanicked)
}

/// Feed a shared parser on the worker
pub fn feed<H>(
    parser: &Arc<Mutex<Parser<H>>>,
    bytes: Vec<u8>,
    is_final: bool,
) -> Result<Result<Status, ParseError>, WorkerError>
where
    H: Handler + Send + 'static,
{
    let parser = Arc::clone(parser);
    run(move || {
        let mut parser = parser.lock().unwrap_or_else(PoisonError::into_inner);
        parser.feed(&bytes, is_final)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sax::collector::EventCollector;

    #[test]
    fn test_runs_on_named_worker() {
        let name = run(|| thread::current().name().map(str::to_string)).unwrap();
        assert_eq!(name.as_deref(), Some("rustysax-worker"));
    }

    #[test]
    fn test_concurrent_callers() {
        let handles: Vec<_> = (0..8)
            .map(|i| thread::spawn(move || run(move || i * 2).unwrap()))
            .collect();
        let mut results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort_unstable();
        assert_eq!(results, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_panic_is_reported_and_worker_survives() {
        let result: Result<(), _> = run(|| panic!("boom"));
        assert_eq!(result, Err(WorkerError::HandlerPanicked));
        assert_eq!(run(|| 1).unwrap(), 1);
    }

    #[test]
    fn test_nested_run_does_not_deadlock() {
        let inner = run(|| run(|| 5).unwrap()).unwrap();
        assert_eq!(inner, 5);
    }

    #[test]
    fn test_feed_shared_parser() {
        let parser = Arc::new(Mutex::new(Parser::new(EventCollector::new())));
        let status = feed(&parser, b"<a>".to_vec(), false).unwrap().unwrap();
        assert_eq!(status, Status::Parsing);
        let status = feed(&parser, b"hi</a>".to_vec(), true).unwrap().unwrap();
        assert_eq!(status, Status::Finished);

        let parser = parser.lock().unwrap();
        assert_eq!(parser.handler().text(), "hi");
    }
}
