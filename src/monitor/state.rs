//! Liveness state shared between a monitor's watcher thread and its owner

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Everything about a monitor that more than one thread reads or writes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LivenessState {
    /// True strictly between `start()` and the terminal transition.
    pub running: bool,
    /// The terminal transition happened. Never reset.
    pub done: bool,
    /// The end-of-life event has been claimed for publishing. Never reset.
    pub sent_termination: bool,
    /// The claimed end-of-life publish has not finished yet.
    pub publishing: bool,
    /// Loggers that have not reported completion, as last seen by the watcher.
    pub loggers_outstanding: usize,
}

/// Outcome of a locked state change, acted on after the lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub terminated: bool,
    pub must_publish: bool,
}

impl Transition {
    const NONE: Transition = Transition {
        terminated: false,
        must_publish: false,
    };
}

#[derive(Default)]
pub(crate) struct SharedState {
    inner: Mutex<LivenessState>,
    changed: Condvar,
}

impl SharedState {
    pub fn new(loggers_outstanding: usize) -> Self {
        SharedState {
            inner: Mutex::new(LivenessState {
                loggers_outstanding,
                ..Default::default()
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LivenessState> {
        self.inner.lock()
    }

    pub fn snapshot(&self) -> LivenessState {
        *self.lock()
    }

    /// Idle -> Watching. False if the monitor was already started or is done.
    pub fn begin_watching(&self) -> bool {
        let mut state = self.lock();
        if state.running || state.done {
            return false;
        }
        state.running = true;
        true
    }

    /// Undo `begin_watching` when the watcher could not be spawned.
    pub fn abort_watching(&self) {
        self.lock().running = false;
    }

    /// Claim the end-of-life publish. Only the first caller gets `true`.
    pub fn claim_termination(&self) -> bool {
        let mut state = self.lock();
        claim(&mut state)
    }

    /// Unconditional terminal transition (command event or immediate stop).
    pub fn terminate(&self) -> Transition {
        let mut state = self.lock();
        if state.done {
            return Transition::NONE;
        }
        enter_terminal(&mut state)
    }

    /// Record the watcher's logger count and terminate if it reached zero.
    ///
    /// The emptiness check and the transition share one critical section, so a
    /// concurrent `stop()` can never slip between them.
    pub fn settle_loggers(&self, outstanding: usize) -> Transition {
        let mut state = self.lock();
        state.loggers_outstanding = outstanding;
        if outstanding > 0 || state.done || !state.running {
            return Transition::NONE;
        }
        enter_terminal(&mut state)
    }

    /// Mark a claimed publish as finished and wake completion waiters.
    pub fn finish_publish(&self) {
        self.lock().publishing = false;
        self.changed.notify_all();
    }

    pub fn wake_waiters(&self) {
        self.changed.notify_all();
    }

    /// Block until the monitor is done and any claimed publish has finished.
    /// Returns false if `timeout` elapsed first.
    pub fn wait_until_done(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        while !(state.done && !state.publishing) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return state.done && !state.publishing;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        true
    }
}

fn claim(state: &mut LivenessState) -> bool {
    if state.sent_termination {
        return false;
    }
    state.sent_termination = true;
    state.publishing = true;
    true
}

fn enter_terminal(state: &mut LivenessState) -> Transition {
    state.running = false;
    state.done = true;
    Transition {
        terminated: true,
        must_publish: claim(state),
    }
}
