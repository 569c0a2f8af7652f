//! Ink Sprint binary entrypoint wiring the stage engine, facilitator, and
//! idea summarization debouncer around an in-memory room store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use ink_sprint_back::config::AppConfig;
use ink_sprint_back::dao::models::{MessageKind, RoomMessage, RoomRecord};
use ink_sprint_back::dao::room_store::RoomStore;
use ink_sprint_back::dao::room_store::memory::InMemoryRoomStore;
use ink_sprint_back::engine::clock::{Clock, SystemClock};
use ink_sprint_back::engine::debounce::Debouncer;
use ink_sprint_back::engine::{StageEngine, StageReactor};
use ink_sprint_back::services::facilitator::Facilitator;
use ink_sprint_back::services::generator::TemplateGenerator;
use ink_sprint_back::state::stages::Stage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = InMemoryRoomStore::new();
    let facilitator = Facilitator::new(
        store.clone(),
        Arc::new(TemplateGenerator),
        clock.clone(),
        config.schedule.clone(),
    );
    let summarizer = Debouncer::new(
        config.debounce.delay,
        config.debounce.max_wait,
        facilitator.summary_job(),
    );
    let reactor: Arc<dyn StageReactor> = Arc::new(facilitator);
    let engine = StageEngine::new(
        store.clone(),
        reactor,
        clock.clone(),
        config.schedule,
        config.engine,
    );

    let room = seed_demo_room(&store, clock.as_ref());
    engine.touch(room.id);
    engine.start();
    info!(room = %room.id, "workshop room open; stage engine running");

    tokio::spawn(simulate_participants(
        store.clone(),
        Arc::clone(&engine),
        Arc::clone(&summarizer),
        clock.clone(),
        room.id,
    ));

    shutdown_signal().await;
    info!("shutting down");
    engine.stop();
    summarizer.destroy();
    Ok(())
}

/// Insert a demo room sitting in the lobby so the engine has work to do.
fn seed_demo_room(store: &Arc<InMemoryRoomStore>, clock: &dyn Clock) -> RoomRecord {
    let room = RoomRecord {
        id: Uuid::new_v4(),
        stage: Stage::Lobby.as_str().to_owned(),
        stage_ends_at: None,
        topic: Some("a city where it rains upward".to_owned()),
        draft: None,
        created_at: clock.now_ms(),
    };
    store.insert_room(room.clone());
    room
}

/// Post a trickle of participant ideas so the debounced summarizer and the
/// timed stage walk have something to chew on.
async fn simulate_participants(
    store: Arc<InMemoryRoomStore>,
    engine: Arc<StageEngine>,
    summarizer: Arc<Debouncer>,
    clock: Arc<dyn Clock>,
    room_id: Uuid,
) {
    let ideas = [
        "umbrellas are worn as shoes",
        "gutters run along rooftops",
        "the clouds live in the sewers",
        "weather reports read bottom to top",
    ];
    for idea in ideas {
        sleep(Duration::from_secs(20)).await;
        engine.touch(room_id);
        let message = RoomMessage {
            id: Uuid::new_v4(),
            room_id,
            author: "demo-writer".to_owned(),
            body: idea.to_owned(),
            posted_at: clock.now_ms(),
            kind: MessageKind::Idea,
        };
        if let Err(err) = store.append_message(message).await {
            tracing::warn!(room = %room_id, error = %err, "failed to post demo idea");
            continue;
        }
        summarizer.trigger(room_id);
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM before shutting down.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
