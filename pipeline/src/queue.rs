//! Unbounded FIFO of file events shared by the watcher and the processor.
//!
//! Producers push from the notify callback thread, which is not a tokio
//! context, so `push` is synchronous. The consumer side waits with a bounded
//! timeout so it can keep checking the abort signal.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::warn;

use crate::event::FileEvent;

#[derive(Debug, Default)]
struct State {
    items: VecDeque<FileEvent>,
    /// Pushed but not yet marked done.
    unfinished: usize,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    pushed: Notify,
    drained: Notify,
}

/// Thread-safe event queue. Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    inner: Arc<Inner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event at the back.
    pub fn push(&self, event: FileEvent) {
        {
            let mut state = self.state();
            state.items.push_back(event);
            state.unfinished += 1;
        }
        self.inner.pushed.notify_one();
    }

    /// Take the front event without waiting.
    pub fn try_pop(&self) -> Option<FileEvent> {
        self.state().items.pop_front()
    }

    /// Take the front event, waiting at most `timeout` for one to arrive.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<FileEvent> {
        if let Some(event) = self.try_pop() {
            return Some(event);
        }
        // `notify_one` leaves a permit behind, so a push that lands between
        // the check above and this wait is not missed.
        let _ = tokio::time::timeout(timeout, self.inner.pushed.notified()).await;
        self.try_pop()
    }

    /// Mark one previously popped event as handled.
    pub fn task_done(&self) {
        let remaining = {
            let mut state = self.state();
            if state.unfinished == 0 {
                warn!("task_done called more times than events were pushed");
                return;
            }
            state.unfinished -= 1;
            state.unfinished
        };
        if remaining == 0 {
            self.inner.drained.notify_waiters();
        }
    }

    /// Wait until every pushed event has been marked done.
    pub async fn join(&self) {
        loop {
            let drained = self.inner.drained.notified();
            if self.unfinished() == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Events waiting to be popped.
    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events pushed but not yet marked done, including ones in flight.
    pub fn unfinished(&self) -> usize {
        self.state().unfinished
    }
}
