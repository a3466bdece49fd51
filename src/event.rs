//! Manual-reset signalable event handed out to the guest

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Event that stays signalled until explicitly reset
#[derive(Debug, Default)]
pub struct KEvent {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl KEvent {
    /// Event starting in the given state
    pub fn new(signalled: bool) -> Self {
        Self {
            signalled: Mutex::new(signalled),
            cond: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, bool> {
        self.signalled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signal the event and wake every waiter
    pub fn signal(&self) {
        *self.state() = true;
        self.cond.notify_all();
    }

    /// Return the event to the unsignalled state
    pub fn reset_signal(&self) {
        *self.state() = false;
    }

    /// Current state without waiting
    pub fn is_signalled(&self) -> bool {
        *self.state()
    }

    /// Block until signalled or `timeout` elapses, returns whether it was signalled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.state();
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |signalled| !*signalled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
