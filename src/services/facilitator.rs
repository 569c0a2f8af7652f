use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, info};
use uuid::Uuid;

use crate::dao::models::{MessageKind, RoomMessage, RoomPatch, RoomRecord};
use crate::dao::room_store::RoomStore;
use crate::engine::StageReactor;
use crate::engine::clock::Clock;
use crate::engine::debounce::DebounceJob;
use crate::engine::defer::{DeferredAction, OneShotScheduler};
use crate::error::ServiceError;
use crate::services::generator::TextGenerator;
use crate::state::stages::{Stage, StageSchedule};

/// Display name the facilitator posts under.
const DEFAULT_PERSONA: &str = "Quill";

/// AI facilitator persona reacting to stage transitions.
///
/// Implements [`StageReactor`]: greets the group, collects and summarizes
/// ideas, produces the living draft, pastes it for editing, and arms the
/// one-shot auto-close when a room enters FINAL.
#[derive(Clone)]
pub struct Facilitator {
    store: Arc<dyn RoomStore>,
    generator: Arc<dyn TextGenerator>,
    clock: Arc<dyn Clock>,
    closer: Arc<OneShotScheduler>,
    schedule: StageSchedule,
    persona: String,
}

impl Facilitator {
    /// Build a facilitator together with its private auto-close timer.
    pub fn new(
        store: Arc<dyn RoomStore>,
        generator: Arc<dyn TextGenerator>,
        clock: Arc<dyn Clock>,
        schedule: StageSchedule,
    ) -> Self {
        let closer = OneShotScheduler::new(clock.clone(), close_action(store.clone()));
        Self {
            store,
            generator,
            clock,
            closer,
            schedule,
            persona: DEFAULT_PERSONA.to_owned(),
        }
    }

    /// The idea summarization exposed as a debounce job.
    ///
    /// Wire it into a [`Debouncer`] and `trigger(room_id)` on every idea
    /// post; the debouncer coalesces typing bursts into one summary run.
    ///
    /// [`Debouncer`]: crate::engine::debounce::Debouncer
    pub fn summary_job(&self) -> DebounceJob {
        let this = self.clone();
        Arc::new(move |room_id| {
            let this = this.clone();
            async move { this.summarize_ideas(room_id).await }.boxed()
        })
    }

    /// Condense a room's accumulated idea messages into a posted summary.
    pub async fn summarize_ideas(&self, room_id: Uuid) -> Result<(), ServiceError> {
        let Some(room) = self.store.find_room(room_id).await? else {
            return Err(ServiceError::NotFound(format!("room `{room_id}` not found")));
        };
        let ideas = self.collect_ideas(room_id).await?;
        if ideas.is_empty() {
            debug!(room = %room_id, "no ideas to summarize yet");
            return Ok(());
        }

        let topic = room.topic.as_deref().unwrap_or("the piece");
        let prompt = format!(
            "Summarize these workshop ideas about {topic} into a short list of themes:\n{}",
            ideas.join("\n"),
        );
        let summary = self.generator.complete(prompt).await?;
        self.post(room_id, summary).await
    }

    async fn react(self, room: RoomRecord) -> Result<(), ServiceError> {
        let stage = Stage::parse(&room.stage);
        // Leaving the guarded stage by any path disarms the pending close.
        if stage != Some(Stage::Final) {
            self.closer.cancel(room.id);
        }
        match stage {
            Some(Stage::Discovery) => self.post_greeting(&room).await,
            Some(Stage::IdeaDump) => self.post_idea_instructions(&room).await,
            Some(Stage::Planning) => self.summarize_ideas(room.id).await,
            Some(Stage::RoughDraft) => self.write_rough_draft(&room).await,
            Some(Stage::Editing) => self.paste_living_draft(&room).await,
            Some(Stage::Final) => self.open_final_stage(&room).await,
            Some(Stage::Lobby) | Some(Stage::Closed) | None => Ok(()),
        }
    }

    async fn post_greeting(&self, room: &RoomRecord) -> Result<(), ServiceError> {
        let topic = room.topic.as_deref().unwrap_or("whatever the group brings");
        let prompt =
            format!("Warmly greet a small writing group starting a timed workshop about {topic}.");
        let greeting = self.generator.complete(prompt).await?;
        self.post(room.id, greeting).await
    }

    async fn post_idea_instructions(&self, room: &RoomRecord) -> Result<(), ServiceError> {
        self.post(
            room.id,
            "Idea dump is open: drop every fragment, image, or line you have. \
             Nothing is too small; I'll gather the threads as you go."
                .to_owned(),
        )
        .await
    }

    async fn write_rough_draft(&self, room: &RoomRecord) -> Result<(), ServiceError> {
        let topic = room.topic.as_deref().unwrap_or("the piece");
        let ideas = self.collect_ideas(room.id).await?;
        let prompt = format!(
            "Write a rough draft about {topic} weaving in these ideas:\n{}",
            ideas.join("\n"),
        );
        let draft = self.generator.complete(prompt).await?;
        self.store
            .update_room(room.id, RoomPatch::draft(draft.clone()))
            .await?;
        info!(room = %room.id, "living draft written");
        self.post(room.id, draft).await
    }

    async fn paste_living_draft(&self, room: &RoomRecord) -> Result<(), ServiceError> {
        let body = match room.draft.as_deref() {
            Some(draft) => format!("Here is the draft so far; edit away:\n{draft}"),
            None => "No draft exists yet; start editing from a blank page.".to_owned(),
        };
        self.post(room.id, body).await
    }

    async fn open_final_stage(&self, room: &RoomRecord) -> Result<(), ServiceError> {
        let deadline = room.stage_ends_at.unwrap_or_else(|| {
            self.clock.now_ms() + self.schedule.budget_for(Stage::Final.as_str()).as_millis() as u64
        });
        self.closer.schedule(room.id, deadline);
        self.post(
            room.id,
            "Final stage: read the piece once more and make your last touches. \
             The room closes itself when time is up."
                .to_owned(),
        )
        .await
    }

    async fn collect_ideas(&self, room_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let ideas = self
            .store
            .list_messages(room_id)
            .await?
            .into_iter()
            .filter(|message| message.kind == MessageKind::Idea)
            .map(|message| message.body)
            .collect();
        Ok(ideas)
    }

    async fn post(&self, room_id: Uuid, body: String) -> Result<(), ServiceError> {
        self.store
            .append_message(RoomMessage {
                id: Uuid::new_v4(),
                room_id,
                author: self.persona.clone(),
                body,
                posted_at: self.clock.now_ms(),
                kind: MessageKind::Facilitator,
            })
            .await?;
        Ok(())
    }
}

impl StageReactor for Facilitator {
    fn on_stage_advanced(&self, room: RoomRecord) -> BoxFuture<'static, Result<(), ServiceError>> {
        let this = self.clone();
        async move { this.react(room).await }.boxed()
    }
}

/// Close action armed when a room enters FINAL.
///
/// Re-validates at fire time: the room must still exist and still be in
/// FINAL, because the deadline may have been extended or the room moved by
/// another path since scheduling.
fn close_action(store: Arc<dyn RoomStore>) -> DeferredAction {
    Arc::new(move |room_id| {
        let store = store.clone();
        async move {
            let Some(room) = store.find_room(room_id).await? else {
                return Ok(());
            };
            if room.stage != Stage::Final.as_str() {
                debug!(room = %room_id, stage = %room.stage, "skipping auto-close; room left FINAL");
                return Ok(());
            }
            store
                .update_room(room_id, RoomPatch::stage(Stage::Closed.as_str()))
                .await?;
            info!(room = %room_id, "final deadline reached; room closed");
            Ok(())
        }
        .boxed()
    })
}
