//! WorkerPool — per-connection native threads for handler execution.
//!
//! Handlers are synchronous and may be CPU-bound; they must never run on
//! the socket task. Each connection owns one pool, torn down on close as
//! purge → wait → drop.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send>;

struct State {
    queue: VecDeque<Job>,
    running: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    job_cv: Condvar,
    idle_cv: Condvar,
}

/// Fixed-size thread pool with a non-blocking submit, a queue purge, and
/// a drain wait.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        debug!("Making pool with threads: {threads}");
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                running: 0,
                shutdown: false,
            }),
            job_cv: Condvar::new(),
            idle_cv: Condvar::new(),
        });
        let workers = (0..threads)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || worker_loop(&shared))
            })
            .collect();
        Self { shared, workers }
    }

    /// Pool size derived from the host: a third of the available cores,
    /// clamped to [8, 24].
    pub fn default_threads() -> usize {
        let cores = thread::available_parallelism().map_or(1, usize::from);
        (cores / 3).clamp(8, 24)
    }

    /// Enqueue a job. Never blocks; the queue is unbounded.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock();
        state.queue.push_back(Box::new(job));
        self.shared.job_cv.notify_one();
    }

    /// Drop every queued-but-not-started job. Running jobs are
    /// unaffected.
    pub fn purge(&self) {
        let mut state = self.shared.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        if dropped > 0 {
            debug!("Purged {dropped} queued tasks");
        }
    }

    /// Block until the queue is empty and no job is running.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while !state.queue.is_empty() || state.running > 0 {
            self.shared.idle_cv.wait(&mut state);
        }
    }

    /// Jobs queued or running.
    pub fn tasks_total(&self) -> usize {
        let state = self.shared.state.lock();
        state.queue.len() + state.running
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.job_cv.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if let Some(job) = state.queue.pop_front() {
            state.running += 1;
            drop(state);
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("Worker task panicked");
            }
            state = shared.state.lock();
            state.running -= 1;
            if state.queue.is_empty() && state.running == 0 {
                shared.idle_cv.notify_all();
            }
        } else if state.shutdown {
            break;
        } else {
            shared.job_cv.wait(&mut state);
        }
    }
}
