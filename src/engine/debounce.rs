use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ServiceError;

/// Asynchronous unit of work executed once per coalesced trigger window.
pub type DebounceJob = Arc<dyn Fn(Uuid) -> BoxFuture<'static, Result<(), ServiceError>> + Send + Sync>;

/// Per-key window state: idle (absent), pending (timer armed), or running.
#[derive(Debug)]
struct DebounceEntry {
    /// First trigger of the current window; anchors the max-wait ceiling.
    first_trigger_at: Instant,
    /// Bumped on every reschedule so stale timer fires are ignored.
    generation: u64,
    timer: Option<JoinHandle<()>>,
    running: bool,
}

impl DebounceEntry {
    fn new(now: Instant) -> Self {
        Self {
            first_trigger_at: now,
            generation: 0,
            timer: None,
            running: false,
        }
    }
}

/// Coalesces bursts of per-room trigger calls into one delayed run of a job,
/// while guaranteeing the run happens within a bounded maximum latency even
/// under continuous triggering.
///
/// At most one run is in flight per key; a trigger arriving during a run is
/// coalesced into it. After a run finishes, success or failure, the key's
/// state resets entirely and the next trigger opens a fresh window.
pub struct Debouncer {
    delay: Duration,
    max_wait: Duration,
    job: DebounceJob,
    entries: DashMap<Uuid, DebounceEntry>,
    destroyed: AtomicBool,
}

enum TriggerAction {
    Arm { wait: Duration, generation: u64 },
    RunNow,
    Coalesced,
}

impl Debouncer {
    /// Build a debouncer around `job` with the given delay and max-wait ceiling.
    pub fn new(delay: Duration, max_wait: Duration, job: DebounceJob) -> Arc<Self> {
        Arc::new(Self {
            delay,
            max_wait,
            job,
            entries: DashMap::new(),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Record activity for `key`, arming or rescheduling its pending run.
    ///
    /// The effective wait is `min(delay, max_wait - elapsed)`; once the
    /// elapsed time since the window's first trigger reaches the max-wait
    /// ceiling the job runs immediately instead of being pushed out further.
    /// Never fails and never propagates job errors.
    pub fn trigger(self: &Arc<Self>, key: Uuid) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        let action = {
            let mut entry = self
                .entries
                .entry(key)
                .or_insert_with(|| DebounceEntry::new(now));
            if entry.running {
                TriggerAction::Coalesced
            } else {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                entry.generation += 1;
                let elapsed = now.saturating_duration_since(entry.first_trigger_at);
                if elapsed >= self.max_wait {
                    entry.running = true;
                    TriggerAction::RunNow
                } else {
                    TriggerAction::Arm {
                        wait: self.delay.min(self.max_wait - elapsed),
                        generation: entry.generation,
                    }
                }
            }
        };

        match action {
            TriggerAction::Arm { wait, generation } => self.arm(key, wait, generation),
            TriggerAction::RunNow => {
                debug!(key = %key, "max wait reached; running debounced job now");
                tokio::spawn(Arc::clone(self).run(key));
            }
            TriggerAction::Coalesced => {}
        }
    }

    /// Drop the pending run for `key` without executing it.
    ///
    /// A run that is already executing is left alone.
    pub fn cancel(&self, key: Uuid) {
        if let Entry::Occupied(mut occupied) = self.entries.entry(key) {
            if !occupied.get().running {
                if let Some(timer) = occupied.get_mut().timer.take() {
                    timer.abort();
                }
                occupied.remove();
            }
        }
    }

    /// Run the pending job for `key` immediately, if one is armed.
    pub fn flush(self: &Arc<Self>, key: Uuid) {
        let claimed = match self.entries.get_mut(&key) {
            Some(mut entry) if !entry.running => {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                entry.running = true;
                true
            }
            _ => false,
        };
        if claimed {
            tokio::spawn(Arc::clone(self).run(key));
        }
    }

    /// Flush every key with a pending run.
    pub fn flush_all(self: &Arc<Self>) {
        for key in self.pending_keys() {
            self.flush(key);
        }
    }

    /// Keys with an armed, not-yet-running window.
    pub fn pending_keys(&self) -> Vec<Uuid> {
        self.entries
            .iter()
            .filter(|entry| !entry.running)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Cancel all pending runs and refuse any further triggers.
    ///
    /// Runs already executing finish on their own.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        let keys: Vec<Uuid> = self.entries.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            self.cancel(key);
        }
    }

    fn arm(self: &Arc<Self>, key: Uuid, wait: Duration, generation: u64) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sleep(wait).await;
            this.fire(key, generation);
        });
        // Store the handle unless the window moved on while we were spawning;
        // aborting a finished task is a no-op, so the race is harmless.
        match self.entries.get_mut(&key) {
            Some(mut entry) if entry.generation == generation && !entry.running => {
                entry.timer = Some(handle);
            }
            _ => handle.abort(),
        }
    }

    /// Claim the window if this timer fire is still current, then run.
    fn fire(self: &Arc<Self>, key: Uuid, generation: u64) {
        let claimed = match self.entries.get_mut(&key) {
            Some(mut entry) if !entry.running && entry.generation == generation => {
                entry.running = true;
                entry.timer = None;
                true
            }
            _ => false,
        };
        if claimed {
            // The job runs on its own task so aborting the timer handle can
            // never cancel an in-flight run.
            tokio::spawn(Arc::clone(self).run(key));
        }
    }

    async fn run(self: Arc<Self>, key: Uuid) {
        if let Err(err) = (self.job)(key).await {
            warn!(key = %key, error = %err, "debounced job failed");
        }
        self.entries.remove(&key);
    }
}
