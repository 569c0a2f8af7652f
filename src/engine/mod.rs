//! Stage/time authority: the tick loop that notices stage changes, fires the
//! transition reactor exactly once per change, and auto-advances timed stages.

/// Injectable time source.
pub mod clock;
/// Burst-coalescing job scheduler with a bounded-latency ceiling.
pub mod debounce;
/// Keyed one-shot deferred actions.
pub mod defer;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dao::models::{RoomPatch, RoomRecord};
use crate::dao::room_store::RoomStore;
use crate::engine::clock::Clock;
use crate::error::ServiceError;
use crate::state::stages::{Stage, StageSchedule, advance};

/// Callback invoked once per observed stage change.
///
/// The engine commits the stage and deadline before invoking it, and awaits
/// the returned future before the room counts as processed for the tick.
/// Failures are logged by the engine and never roll back the transition.
pub trait StageReactor: Send + Sync {
    /// React to a room that has just entered `room.stage`.
    fn on_stage_advanced(&self, room: RoomRecord) -> BoxFuture<'static, Result<(), ServiceError>>;
}

/// Cadence and eviction tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How often the tick loop inspects the hot set.
    pub tick_interval: Duration,
    /// Rooms untouched for longer than this are evicted from tracking.
    pub inactivity_window: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            inactivity_window: Duration::from_secs(30 * 60),
        }
    }
}

struct Ticker {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The authoritative tick loop over recently active rooms.
///
/// Owns the hot set and the last-observed-stage map; both live and die with
/// the engine instance, so tests can build a fresh engine without cross-test
/// leakage.
pub struct StageEngine {
    store: Arc<dyn RoomStore>,
    reactor: Arc<dyn StageReactor>,
    clock: Arc<dyn Clock>,
    schedule: StageSchedule,
    settings: EngineSettings,
    /// Room id to last-touch timestamp (unix ms).
    hot: DashMap<Uuid, u64>,
    /// Room id to the stage value most recently seen by the tick loop.
    observed: DashMap<Uuid, String>,
    ticker: Mutex<Option<Ticker>>,
}

impl StageEngine {
    /// Build an engine around the injected store, reactor, and clock.
    pub fn new(
        store: Arc<dyn RoomStore>,
        reactor: Arc<dyn StageReactor>,
        clock: Arc<dyn Clock>,
        schedule: StageSchedule,
        settings: EngineSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            reactor,
            clock,
            schedule,
            settings,
            hot: DashMap::new(),
            observed: DashMap::new(),
            ticker: Mutex::new(None),
        })
    }

    /// Mark a room active "now" so the tick loop tracks it.
    ///
    /// Cheap and idempotent; safe to call on every inbound request.
    pub fn touch(&self, room_id: Uuid) {
        self.hot.insert(room_id, self.clock.now_ms());
    }

    /// Whether the engine currently tracks the room as hot.
    pub fn is_hot(&self, room_id: Uuid) -> bool {
        self.hot.contains_key(&room_id)
    }

    /// Begin the tick loop. Calling again while it runs is a no-op.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut guard) = self.ticker.lock() else {
            return;
        };
        if guard.as_ref().is_some_and(|ticker| !ticker.task.is_finished()) {
            return;
        }

        let (stop, mut stopped) = watch::channel(false);
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut cadence = interval(engine.settings.tick_interval);
            cadence.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cadence.tick() => engine.run_tick().await,
                    _ = stopped.changed() => break,
                }
            }
        });
        info!(interval = ?self.settings.tick_interval, "stage engine started");
        *guard = Some(Ticker { stop, task });
    }

    /// Halt the tick loop. An in-flight tick finishes; no new ticks start.
    pub fn stop(&self) {
        let Ok(mut guard) = self.ticker.lock() else {
            return;
        };
        if let Some(ticker) = guard.take() {
            let _ = ticker.stop.send(true);
            info!("stage engine stopped");
        }
    }

    /// One pass over the hot set, sequential per room so two writers never
    /// race on the same room's stage fields.
    async fn run_tick(&self) {
        let now = self.clock.now_ms();
        let window = self.settings.inactivity_window.as_millis() as u64;
        let rooms: Vec<(Uuid, u64)> = self
            .hot
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        for (room_id, last_touch) in rooms {
            if now.saturating_sub(last_touch) > window {
                debug!(room = %room_id, "evicting inactive room from tracking");
                self.forget(room_id);
                continue;
            }
            if let Err(err) = self.process_room(room_id, now).await {
                warn!(room = %room_id, error = %err, "tick processing failed; retrying next tick");
            }
        }
    }

    async fn process_room(&self, room_id: Uuid, now_ms: u64) -> Result<(), ServiceError> {
        let Some(room) = self.store.find_room(room_id).await? else {
            debug!(room = %room_id, "room disappeared; dropping from tracking");
            self.forget(room_id);
            return Ok(());
        };
        let stage = room.stage.clone();

        // First observation establishes the baseline and nothing else; it
        // must not read as a transition.
        let previous = self.observed.get(&room_id).map(|entry| entry.clone());
        let Some(previous) = previous else {
            self.observed.insert(room_id, stage);
            return Ok(());
        };

        // A mismatch here means someone other than this loop moved the room
        // (a manual override); the reactor still gets exactly one call.
        if previous != stage {
            self.observed.insert(room_id, stage.clone());
            self.fire_reactor(&room).await;
        }

        let parsed = Stage::parse(&stage);
        if parsed.is_some_and(Stage::is_terminal) {
            self.forget(room_id);
            return Ok(());
        }
        if parsed.is_some_and(Stage::is_held) {
            // FINAL is ended by the deferred close timer, not by this loop.
            return Ok(());
        }

        let Some(ends_at) = room.stage_ends_at else {
            // Bootstrapping a missing deadline is not a transition.
            let ends_at = now_ms + self.schedule.budget_for(&stage).as_millis() as u64;
            self.store
                .update_room(room_id, RoomPatch::deadline(ends_at))
                .await?;
            self.observed.insert(room_id, stage);
            return Ok(());
        };
        if now_ms < ends_at {
            return Ok(());
        }

        let next = advance(&stage);
        if next == stage {
            return Ok(());
        }
        let next_ends_at = now_ms + self.schedule.budget_for(next).as_millis() as u64;
        let updated = self
            .store
            .update_room(room_id, RoomPatch::transition(next, next_ends_at))
            .await?;
        info!(room = %room_id, from = %stage, to = %next, "stage budget elapsed; advancing");
        self.observed.insert(room_id, next.to_owned());
        self.fire_reactor(&updated).await;
        if Stage::parse(next).is_some_and(Stage::is_terminal) {
            self.forget(room_id);
        }
        Ok(())
    }

    async fn fire_reactor(&self, room: &RoomRecord) {
        if let Err(err) = self.reactor.on_stage_advanced(room.clone()).await {
            warn!(room = %room.id, stage = %room.stage, error = %err, "stage reactor failed");
        }
    }

    fn forget(&self, room_id: Uuid) {
        self.hot.remove(&room_id);
        self.observed.remove(&room_id);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use futures::FutureExt;

    use super::*;
    use crate::dao::room_store::memory::InMemoryRoomStore;
    use crate::engine::clock::testing::ManualClock;

    const LOBBY_MS: u64 = 60_000;
    const DISCOVERY_MS: u64 = 90_000;

    /// Reactor stub recording every (room, stage) invocation.
    #[derive(Default)]
    struct RecordingReactor {
        seen: Mutex<Vec<(Uuid, String)>>,
    }

    impl RecordingReactor {
        fn calls(&self) -> Vec<(Uuid, String)> {
            self.seen.lock().unwrap().clone()
        }

        fn stages(&self) -> Vec<String> {
            self.calls().into_iter().map(|(_, stage)| stage).collect()
        }
    }

    impl StageReactor for RecordingReactor {
        fn on_stage_advanced(
            &self,
            room: RoomRecord,
        ) -> BoxFuture<'static, Result<(), ServiceError>> {
            self.seen.lock().unwrap().push((room.id, room.stage));
            async { Ok(()) }.boxed()
        }
    }

    struct Fixture {
        engine: Arc<StageEngine>,
        store: Arc<InMemoryRoomStore>,
        reactor: Arc<RecordingReactor>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let store = InMemoryRoomStore::new();
        let reactor = Arc::new(RecordingReactor::default());
        let clock = ManualClock::new(1_000);
        let schedule = StageSchedule::new(
            HashMap::from([
                (Stage::Lobby, Duration::from_millis(LOBBY_MS)),
                (Stage::Discovery, Duration::from_millis(DISCOVERY_MS)),
            ]),
            Duration::from_millis(30_000),
        );
        let engine = StageEngine::new(
            store.clone(),
            reactor.clone(),
            clock.clone(),
            schedule,
            EngineSettings {
                tick_interval: Duration::from_secs(1),
                inactivity_window: Duration::from_secs(1_800),
            },
        );
        Fixture {
            engine,
            store,
            reactor,
            clock,
        }
    }

    fn seed_room(fixture: &Fixture, stage: &str, ends_at: Option<u64>) -> Uuid {
        let id = Uuid::new_v4();
        fixture.store.insert_room(RoomRecord {
            id,
            stage: stage.into(),
            stage_ends_at: ends_at,
            topic: Some("sea glass".into()),
            draft: None,
            created_at: fixture.clock.now_ms(),
        });
        fixture.engine.touch(id);
        id
    }

    async fn tick(fixture: &Fixture) {
        fixture.engine.run_tick().await;
    }

    #[tokio::test]
    async fn bootstrap_initializes_deadline_without_firing_reactor() {
        let fx = fixture();
        let id = seed_room(&fx, "LOBBY", None);

        // First tick only records the baseline.
        tick(&fx).await;
        assert_eq!(fx.store.find_room(id).await.unwrap().unwrap().stage_ends_at, None);

        // Second tick arms the deadline; still no transition.
        tick(&fx).await;
        let room = fx.store.find_room(id).await.unwrap().unwrap();
        assert_eq!(room.stage, "LOBBY");
        assert_eq!(room.stage_ends_at, Some(fx.clock.now_ms() + LOBBY_MS));
        assert!(fx.reactor.calls().is_empty());
    }

    #[tokio::test]
    async fn elapsed_budget_advances_once_with_fresh_deadline() {
        let fx = fixture();
        let id = seed_room(&fx, "LOBBY", None);
        tick(&fx).await;
        tick(&fx).await;
        let old_ends = fx
            .store
            .find_room(id)
            .await
            .unwrap()
            .unwrap()
            .stage_ends_at
            .unwrap();

        fx.clock.advance(LOBBY_MS + 1);
        tick(&fx).await;

        let room = fx.store.find_room(id).await.unwrap().unwrap();
        assert_eq!(room.stage, "DISCOVERY");
        let new_ends = room.stage_ends_at.unwrap();
        assert_eq!(new_ends, fx.clock.now_ms() + DISCOVERY_MS);
        assert!(new_ends > old_ends);
        assert_eq!(fx.reactor.stages(), ["DISCOVERY"]);

        // Re-observing the same stage must not re-fire the reactor.
        tick(&fx).await;
        tick(&fx).await;
        assert_eq!(fx.reactor.stages(), ["DISCOVERY"]);
    }

    #[tokio::test]
    async fn manual_override_fires_reactor_exactly_once() {
        let fx = fixture();
        let id = seed_room(&fx, "PLANNING", Some(u64::MAX));
        tick(&fx).await;

        // Someone outside the engine forces the stage forward.
        fx.store
            .update_room(id, RoomPatch::stage("ROUGH_DRAFT"))
            .await
            .unwrap();
        tick(&fx).await;
        tick(&fx).await;

        assert_eq!(fx.reactor.stages(), ["ROUGH_DRAFT"]);
    }

    #[tokio::test]
    async fn final_stage_is_tick_inert() {
        let fx = fixture();
        let id = seed_room(&fx, "FINAL", Some(2_000));
        tick(&fx).await;
        fx.clock.advance(3_600_000);

        let writes_before = fx.store.update_count();
        for _ in 0..100 {
            tick(&fx).await;
        }

        let room = fx.store.find_room(id).await.unwrap().unwrap();
        assert_eq!(room.stage, "FINAL");
        assert_eq!(room.stage_ends_at, Some(2_000));
        assert_eq!(fx.store.update_count(), writes_before);
        assert!(fx.reactor.calls().is_empty());
    }

    #[tokio::test]
    async fn terminal_room_is_absorbed_and_evicted() {
        let fx = fixture();
        let id = seed_room(&fx, "CLOSED", None);
        tick(&fx).await;
        assert!(fx.engine.is_hot(id));
        tick(&fx).await;

        assert!(!fx.engine.is_hot(id));
        assert!(fx.reactor.calls().is_empty());
    }

    #[tokio::test]
    async fn advancing_into_terminal_evicts_after_firing() {
        let fx = fixture();
        let id = seed_room(&fx, "FINAL", Some(2_000));
        tick(&fx).await;

        // The close timer (not the engine) commits CLOSED; the next tick
        // observes it, fires once, and drops the room.
        fx.store
            .update_room(id, RoomPatch::stage("CLOSED"))
            .await
            .unwrap();
        tick(&fx).await;

        assert_eq!(fx.reactor.stages(), ["CLOSED"]);
        assert!(!fx.engine.is_hot(id));
    }

    #[tokio::test]
    async fn inactive_room_is_evicted_regardless_of_stage() {
        let fx = fixture();
        let id = seed_room(&fx, "LOBBY", Some(u64::MAX));
        tick(&fx).await;

        fx.clock.advance(1_800_001);
        tick(&fx).await;

        assert!(!fx.engine.is_hot(id));
    }

    #[tokio::test]
    async fn missing_room_is_dropped_from_tracking() {
        let fx = fixture();
        let id = seed_room(&fx, "LOBBY", None);
        tick(&fx).await;
        fx.store.remove_room(id);

        tick(&fx).await;

        assert!(!fx.engine.is_hot(id));
        assert!(fx.reactor.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_stage_gets_default_budget_and_never_advances() {
        let fx = fixture();
        let id = seed_room(&fx, "INTERMISSION", None);
        tick(&fx).await;
        tick(&fx).await;

        let room = fx.store.find_room(id).await.unwrap().unwrap();
        assert_eq!(room.stage, "INTERMISSION");
        assert_eq!(room.stage_ends_at, Some(fx.clock.now_ms() + 30_000));

        fx.clock.advance(60_000);
        tick(&fx).await;
        let room = fx.store.find_room(id).await.unwrap().unwrap();
        assert_eq!(room.stage, "INTERMISSION");
        assert!(fx.reactor.calls().is_empty());
    }

    #[tokio::test]
    async fn full_timed_walk_fires_reactor_per_stage_and_parks_in_final() {
        let fx = fixture();
        seed_room(&fx, "LOBBY", None);
        tick(&fx).await; // baseline
        tick(&fx).await; // arm deadline

        // Drive through every timed stage; FINAL must absorb the walk.
        for _ in 0..10 {
            fx.clock.advance(2_000_000);
            tick(&fx).await;
        }

        assert_eq!(
            fx.reactor.stages(),
            ["DISCOVERY", "IDEA_DUMP", "PLANNING", "ROUGH_DRAFT", "EDITING", "FINAL"]
        );
    }

    #[tokio::test]
    async fn reactor_failure_does_not_roll_back_the_transition() {
        struct FailingReactor;
        impl StageReactor for FailingReactor {
            fn on_stage_advanced(
                &self,
                _room: RoomRecord,
            ) -> BoxFuture<'static, Result<(), ServiceError>> {
                async { Err(ServiceError::InvalidState("reactor exploded".into())) }.boxed()
            }
        }

        let store = InMemoryRoomStore::new();
        let clock = ManualClock::new(1_000);
        let engine = StageEngine::new(
            store.clone(),
            Arc::new(FailingReactor),
            clock.clone(),
            StageSchedule::default(),
            EngineSettings::default(),
        );
        let id = Uuid::new_v4();
        store.insert_room(RoomRecord {
            id,
            stage: "LOBBY".into(),
            stage_ends_at: Some(1_500),
            topic: None,
            draft: None,
            created_at: 1_000,
        });
        engine.touch(id);

        engine.run_tick().await; // baseline
        clock.advance(10_000);
        engine.run_tick().await; // advance; reactor fails, transition stays

        let room = store.find_room(id).await.unwrap().unwrap();
        assert_eq!(room.stage, "DISCOVERY");
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_halts_the_loop() {
        let fx = fixture();
        fx.engine.start();
        fx.engine.start();
        tokio::time::sleep(Duration::from_secs(2)).await;
        fx.engine.stop();
        fx.engine.stop();
    }
}
