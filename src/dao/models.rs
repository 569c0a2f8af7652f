use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted workshop room as seen by the engine and services.
///
/// The engine only ever reads `stage` and `stage_ends_at` and writes new
/// values for both; the remaining fields belong to surrounding features.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomRecord {
    /// Stable identifier for the room.
    pub id: Uuid,
    /// Current stage name; expected to be a member of the stage sequence but
    /// tolerated when it is not.
    pub stage: String,
    /// Absolute deadline (unix milliseconds) for the current stage. Absent
    /// until the engine bootstraps it from the stage budget.
    pub stage_ends_at: Option<u64>,
    /// Topic the group is writing about.
    pub topic: Option<String>,
    /// Living draft text maintained by the facilitator.
    pub draft: Option<String>,
    /// When the room was created (unix milliseconds).
    pub created_at: u64,
}

/// Partial update merged into a stored room record by [`update_room`].
///
/// [`update_room`]: crate::dao::room_store::RoomStore::update_room
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    /// New stage name, if the stage is changing.
    pub stage: Option<String>,
    /// New stage deadline in unix milliseconds.
    pub stage_ends_at: Option<u64>,
    /// Replacement living draft text.
    pub draft: Option<String>,
}

impl RoomPatch {
    /// Patch that only arms a fresh stage deadline.
    pub fn deadline(ends_at_ms: u64) -> Self {
        Self {
            stage_ends_at: Some(ends_at_ms),
            ..Self::default()
        }
    }

    /// Patch committing a stage transition together with its new deadline.
    pub fn transition(stage: &str, ends_at_ms: u64) -> Self {
        Self {
            stage: Some(stage.to_owned()),
            stage_ends_at: Some(ends_at_ms),
            ..Self::default()
        }
    }

    /// Patch that only moves the room to a new stage.
    pub fn stage(stage: &str) -> Self {
        Self {
            stage: Some(stage.to_owned()),
            ..Self::default()
        }
    }

    /// Patch replacing the living draft.
    pub fn draft(text: String) -> Self {
        Self {
            draft: Some(text),
            ..Self::default()
        }
    }
}

/// Who authored a transcript message, for downstream filtering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Ordinary participant chat.
    Chat,
    /// A participant idea collected during IDEA_DUMP; feeds summarization.
    Idea,
    /// A message posted by the facilitator persona.
    Facilitator,
}

/// One entry in a room's transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomMessage {
    /// Stable identifier for the message.
    pub id: Uuid,
    /// Room the message belongs to.
    pub room_id: Uuid,
    /// Display name of the author; facilitator posts use the persona name.
    pub author: String,
    /// Message text.
    pub body: String,
    /// When the message was posted (unix milliseconds).
    pub posted_at: u64,
    /// Classification of the message.
    pub kind: MessageKind,
}
