//! Cross-thread marshaling queue
//!
//! Connection tasks parse and validate concurrently, but the effects of a
//! command must be applied one at a time on a single consumer thread. Producers
//! call [`Dispatcher::enqueue`] from any context; the consumer calls
//! [`Dispatcher::drain_and_run`] once per application tick.

use log::{debug, trace};
use std::fmt;
use std::sync::{Mutex, PoisonError, TryLockError};

/// A captured unit of work, run exactly once by the consumer
pub type PendingAction = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub struct Dispatcher {
    pending: Mutex<Vec<PendingAction>>,
    /// Held for the duration of a drain so two consumers never interleave
    draining: Mutex<()>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an action; safe to call from any thread, including from inside
    /// an action that is currently running
    pub fn enqueue<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(action));
    }

    /// Runs every action queued so far in FIFO order and returns how many ran
    ///
    /// The queue is swapped out under the lock and executed outside it, so
    /// actions enqueued while draining wait for the next call. A nested or
    /// concurrent call while another drain is in progress returns 0.
    pub fn drain_and_run(&self) -> usize {
        let _guard = match self.draining.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("Dispatcher drain already in progress, skipping");
                return 0;
            }
        };

        let actions = std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let count = actions.len();
        for action in actions {
            action();
        }

        if count > 0 {
            trace!("Dispatcher ran {} pending actions", count);
        }
        count
    }

    /// Number of actions waiting for the next drain
    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.len())
            .finish()
    }
}
