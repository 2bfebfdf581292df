//! Timer scheduling backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use super::types::TimerId;

/// Schedules and cancels timers on behalf of the core.
///
/// Expiry is delivered back to [`crate::UserAgentCore::handle_timer`] by
/// whoever drives the core; the service itself never touches protocol state.
pub trait TimerService: Send + Sync {
    /// Schedules `id` to fire after `delay`, replacing a pending timer with
    /// the same id.
    fn schedule(&self, id: TimerId, delay: Duration);

    /// Cancels `id` if it is pending.
    fn cancel(&self, id: &TimerId);
}

/// Expiry notification produced by [`TokioTimerService`]
#[derive(Debug, Clone)]
pub struct TimerExpiry {
    pub id: TimerId,
    pub generation: u64,
}

/// Timer service backed by spawned `tokio::time::sleep` tasks.
///
/// Each scheduled timer is a task whose `JoinHandle` is kept so it can be
/// aborted. An expiry that was already queued when its timer got cancelled
/// or rescheduled carries a stale generation and is discarded by
/// [`TokioTimerService::take_if_current`].
pub struct TokioTimerService {
    sender: mpsc::UnboundedSender<TimerExpiry>,
    active: Mutex<HashMap<TimerId, (u64, JoinHandle<()>)>>,
    next_generation: AtomicU64,
}

impl TokioTimerService {
    pub fn new(sender: mpsc::UnboundedSender<TimerExpiry>) -> Self {
        Self {
            sender,
            active: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Returns true and forgets the timer when `expiry` is the live instance.
    pub fn take_if_current(&self, expiry: &TimerExpiry) -> bool {
        let mut active = self.active.lock();
        match active.get(&expiry.id) {
            Some((generation, _)) if *generation == expiry.generation => {
                active.remove(&expiry.id);
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.active.lock().len()
    }
}

impl TimerService for TokioTimerService {
    fn schedule(&self, id: TimerId, delay: Duration) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let sender = self.sender.clone();
        let expiry = TimerExpiry {
            id: id.clone(),
            generation,
        };
        trace!(timer = %id, ?delay, "scheduling timer");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(expiry);
        });
        if let Some((_, previous)) = self.active.lock().insert(id, (generation, handle)) {
            previous.abort();
        }
    }

    fn cancel(&self, id: &TimerId) {
        if let Some((_, handle)) = self.active.lock().remove(id) {
            trace!(timer = %id, "cancelling timer");
            handle.abort();
        }
    }
}

impl Drop for TokioTimerService {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.active.get_mut().drain() {
            handle.abort();
        }
    }
}
