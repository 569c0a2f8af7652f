use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::engine::clock::Clock;
use crate::error::ServiceError;

/// Action performed when a deferred timer fires.
///
/// Implementations must re-validate state at fire time: the deadline may have
/// been extended or the target already handled by another path between
/// scheduling and firing.
pub type DeferredAction =
    Arc<dyn Fn(Uuid) -> BoxFuture<'static, Result<(), ServiceError>> + Send + Sync>;

/// Single-fire timer per key; scheduling a key again replaces any pending
/// timer outright rather than stacking with it.
///
/// Used for stage-exit guarantees that cannot depend on inbound requests,
/// such as closing a room whose FINAL deadline has passed.
pub struct OneShotScheduler {
    clock: Arc<dyn Clock>,
    action: DeferredAction,
    timers: DashMap<Uuid, JoinHandle<()>>,
}

impl OneShotScheduler {
    /// Build a scheduler that performs `action` when timers fire.
    pub fn new(clock: Arc<dyn Clock>, action: DeferredAction) -> Arc<Self> {
        Arc::new(Self {
            clock,
            action,
            timers: DashMap::new(),
        })
    }

    /// Arm (or re-arm) the action for `key` at `when_ms` (unix milliseconds).
    ///
    /// A deadline already in the past fires effectively immediately rather
    /// than being skipped.
    pub fn schedule(self: &Arc<Self>, key: Uuid, when_ms: u64) {
        let delay = Duration::from_millis(when_ms.saturating_sub(self.clock.now_ms()));
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            // Deregister before acting: a cancel arriving after this point is
            // too late, which is why the action itself must re-check state.
            this.timers.remove(&key);
            if let Err(err) = (this.action)(key).await {
                warn!(key = %key, error = %err, "deferred action failed");
            }
        });
        if let Some(previous) = self.timers.insert(key, handle) {
            previous.abort();
        }
    }

    /// Disarm the pending timer for `key`, if any.
    pub fn cancel(&self, key: Uuid) {
        if let Some((_, handle)) = self.timers.remove(&key) {
            handle.abort();
        }
    }

    /// Whether a timer is currently armed for `key`.
    pub fn is_scheduled(&self, key: Uuid) -> bool {
        self.timers.contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    use super::*;
    use crate::engine::clock::testing::ManualClock;

    fn counting_action(counter: Arc<AtomicUsize>) -> DeferredAction {
        Arc::new(move |_key| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_the_deadline() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = OneShotScheduler::new(ManualClock::new(0), counting_action(fired.clone()));
        let key = Uuid::new_v4();

        scheduler.schedule(key, 5_000);
        assert!(scheduler.is_scheduled(key));
        sleep(Duration::from_secs(6)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled(key));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_pending_timer() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = OneShotScheduler::new(ManualClock::new(0), counting_action(fired.clone()));
        let key = Uuid::new_v4();

        scheduler.schedule(key, 5_000);
        scheduler.schedule(key, 60_000);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        sleep(Duration::from_secs(31)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_immediately() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler =
            OneShotScheduler::new(ManualClock::new(10_000), counting_action(fired.clone()));

        scheduler.schedule(Uuid::new_v4(), 1_000);
        sleep(Duration::from_millis(1)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disarms_the_timer() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = OneShotScheduler::new(ManualClock::new(0), counting_action(fired.clone()));
        let key = Uuid::new_v4();

        scheduler.schedule(key, 5_000);
        scheduler.cancel(key);
        sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let fired = Arc::new(AtomicUsize::new(0));
        let scheduler = OneShotScheduler::new(ManualClock::new(0), counting_action(fired.clone()));

        scheduler.schedule(Uuid::new_v4(), 1_000);
        scheduler.schedule(Uuid::new_v4(), 2_000);
        sleep(Duration::from_secs(3)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
