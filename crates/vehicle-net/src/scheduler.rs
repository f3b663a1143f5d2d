//! Cancellable delayed collider re-enable
//!
//! A player who leaves a seat gets their movement collider back only after
//! a delay. At most one pending re-enable exists per player; scheduling
//! again or cancelling aborts the previous one. Each pending task carries a
//! generation so a task that already woke up cannot fire after being
//! replaced.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use vehicle_core::PlayerId;

struct PendingEnable {
    generation: u64,
    handle: AbortHandle,
}

pub struct ColliderScheduler {
    delay: Duration,
    pending: Arc<DashMap<PlayerId, PendingEnable>>,
    next_generation: AtomicU64,
}

impl ColliderScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `action` for `player` after the delay unless cancelled first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, player: PlayerId, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let pending = self.pending.clone();
        let delay = self.delay;

        // the entry guard is held until the new task is recorded
        let entry = self.pending.entry(player);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = pending
                .remove_if(&player, |_, p| p.generation == generation)
                .is_some();
            if current {
                action();
            }
        });
        let scheduled = PendingEnable {
            generation,
            handle: task.abort_handle(),
        };

        match entry {
            Entry::Occupied(mut occupied) => {
                occupied.get().handle.abort();
                occupied.insert(scheduled);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(scheduled);
            }
        }
        tracing::debug!("Collider re-enable for {} in {:?}", player, delay);
    }

    /// Drop the pending re-enable for `player`; true if one was pending
    pub fn cancel(&self, player: PlayerId) -> bool {
        match self.pending.remove(&player) {
            Some((_, pending)) => {
                pending.handle.abort();
                tracing::debug!("Cancelled collider re-enable for {}", player);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, player: PlayerId) -> bool {
        self.pending.contains_key(&player)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn cancel_all(&self) {
        let players: Vec<PlayerId> = self.pending.iter().map(|r| *r.key()).collect();
        for player in players {
            self.cancel(player);
        }
    }
}

impl Drop for ColliderScheduler {
    fn drop(&mut self) {
        for entry in self.pending.iter() {
            entry.value().handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const A: PlayerId = PlayerId(1);

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let make = move || {
            let f = f.clone();
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        };
        (fired, make)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let scheduler = ColliderScheduler::new(Duration::from_secs(3));
        let (fired, action) = counter();

        scheduler.schedule(A, action());
        assert!(scheduler.is_pending(A));

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending(A));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_delay() {
        let scheduler = ColliderScheduler::new(Duration::from_secs(3));
        let (fired, action) = counter();

        scheduler.schedule(A, action());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.cancel(A));
        assert!(!scheduler.cancel(A));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending() {
        let scheduler = ColliderScheduler::new(Duration::from_secs(3));
        let (fired, action) = counter();

        scheduler.schedule(A, action());
        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.schedule(A, action());
        assert_eq!(scheduler.pending_count(), 1);

        // first deadline passes without firing
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let scheduler = ColliderScheduler::new(Duration::from_secs(1));
        let (fired, action) = counter();
        scheduler.schedule(PlayerId(1), action());
        scheduler.schedule(PlayerId(2), action());

        scheduler.cancel_all();
        assert_eq!(scheduler.pending_count(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
