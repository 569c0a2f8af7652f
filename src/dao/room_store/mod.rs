pub mod memory;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{RoomMessage, RoomPatch, RoomRecord};
use crate::dao::storage::StorageResult;

/// Abstraction over the persistence layer for rooms and their transcripts.
///
/// `find_room` must be idempotent and side-effect free; `update_room` merges
/// a partial patch and returns the resulting full record, and must be safe
/// to call with just `{stage, stage_ends_at}`.
pub trait RoomStore: Send + Sync {
    /// Read a room's current persisted state.
    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomRecord>>>;
    /// Merge a partial update into a room, returning the updated record.
    fn update_room(&self, id: Uuid, patch: RoomPatch)
    -> BoxFuture<'static, StorageResult<RoomRecord>>;
    /// Append a message to a room's transcript.
    fn append_message(&self, message: RoomMessage) -> BoxFuture<'static, StorageResult<()>>;
    /// List a room's transcript in posting order.
    fn list_messages(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoomMessage>>>;
}
