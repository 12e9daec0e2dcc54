//! Single-shot rendezvous: many waiters, one release.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// A one-shot completion event.
///
/// Created unreleased; [`Barrier::release`] is idempotent and unblocks every
/// current and future waiter. The internal mutex gives the usual visibility
/// contract: a waiter returning from [`Barrier::wait`] observes every write
/// the releaser made before calling `release`.
#[derive(Debug, Default)]
pub struct Barrier {
    state: Mutex<BarrierState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct BarrierState {
    released: bool,
    /// Registrations from `wait_any` callers still blocked elsewhere.
    watchers: Vec<Arc<Watcher>>,
}

#[derive(Debug, Default)]
struct Watcher {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Watcher {
    fn fire(&self) {
        let mut fired = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
        *fired = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut fired = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
        while !*fired {
            fired = self.cond.wait(fired).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Barrier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `release` has been called.
    #[must_use]
    pub fn released(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .released
    }

    /// Unblock all current and future waiters. Idempotent.
    pub fn release(&self) {
        let watchers = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.released {
                return;
            }
            state.released = true;
            self.cond.notify_all();
            std::mem::take(&mut state.watchers)
        };
        // Watchers carry their own locks; fire them outside ours.
        for watcher in watchers {
            watcher.fire();
        }
    }

    /// Block until [`Barrier::release`] has been called; returns immediately
    /// thereafter.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !state.released {
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until at least one of `barriers` is released.
    ///
    /// Registration-based: no polling, and a barrier that is already released
    /// returns without blocking at all.
    pub fn wait_any(barriers: &[Arc<Barrier>]) {
        assert!(!barriers.is_empty(), "wait_any needs at least one barrier");
        let watcher = Arc::new(Watcher::default());
        for barrier in barriers {
            let mut state = barrier
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if state.released {
                return;
            }
            state.watchers.push(Arc::clone(&watcher));
        }
        watcher.wait();
    }
}
