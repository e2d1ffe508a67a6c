//! ScheduledTask — a one-shot, cancellable, re-armable timer.
//!
//! Each `schedule` spawns a waiter thread parked on a condition variable
//! and bumps an epoch; a waiter only fires if its epoch is still current
//! when the deadline passes. That makes `cancel` an O(1) bump-and-notify,
//! lets `schedule`/`cancel` race freely across threads, and permits
//! re-entrant calls from inside the task closure itself.

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

type Task = Box<dyn FnMut() + Send>;

struct TimerState {
    epoch: u64,
    armed: bool,
    /// Thread currently running the closure, while it runs.
    runner: Option<ThreadId>,
}

struct Inner {
    name: String,
    task: Mutex<Task>,
    state: Mutex<TimerState>,
    cv: Condvar,
}

/// One-shot named timer. Constructed cancelled; `schedule` arms it,
/// `cancel` (or drop) disarms it.
pub struct ScheduledTask {
    inner: Arc<Inner>,
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, task: impl FnMut() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                task: Mutex::new(Box::new(task)),
                state: Mutex::new(TimerState {
                    epoch: 0,
                    armed: false,
                    runner: None,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Arm the timer: the task runs once, `delay` from now, unless
    /// `cancel` or another `schedule` intervenes. Any in-flight arming
    /// is superseded, so only the last `schedule` fires.
    pub fn schedule(&self, delay: Duration) {
        self.cancel();
        debug!("{} scheduled with {:?}", self.inner.name, delay);
        let deadline = Instant::now() + delay;
        let epoch = {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            state.armed = true;
            state.epoch
        };
        let inner = self.inner.clone();
        thread::spawn(move || wait_and_fire(&inner, epoch, deadline));
    }

    /// Disarm the timer. Idempotent. A waiter still parked is invalidated
    /// and exits without firing; a closure already running completes
    /// before `cancel` returns (unless `cancel` is the closure itself).
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        state.epoch += 1;
        if state.armed {
            state.armed = false;
            debug!("{} cancelled", self.inner.name);
        }
        let me = thread::current().id();
        while state.runner.is_some_and(|runner| runner != me) {
            self.inner.cv.wait(&mut state);
        }
        drop(state);
        self.inner.cv.notify_all();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn wait_and_fire(inner: &Arc<Inner>, epoch: u64, deadline: Instant) {
    let fire = {
        let mut state = inner.state.lock();
        while state.epoch == epoch && state.armed {
            if inner.cv.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        // Stale epoch means a cancel or a newer schedule superseded us.
        let fire = state.epoch == epoch && state.armed;
        if fire {
            state.armed = false;
            state.runner = Some(thread::current().id());
        }
        fire
    };
    if fire {
        debug!("{} executing...", inner.name);
        {
            let mut task = inner.task.lock();
            (*task)();
        }
        inner.state.lock().runner = None;
        inner.cv.notify_all();
    }
}
