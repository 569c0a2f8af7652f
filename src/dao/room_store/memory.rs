use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{RoomMessage, RoomPatch, RoomRecord};
use crate::dao::room_store::RoomStore;
use crate::dao::storage::{StorageError, StorageResult};

/// In-memory [`RoomStore`] backing the demo binary and the test suites.
///
/// Entries live in [`DashMap`]s, so individual reads and merges are atomic
/// per room without any external locking.
#[derive(Debug, Default)]
pub struct InMemoryRoomStore {
    rooms: DashMap<Uuid, RoomRecord>,
    messages: DashMap<Uuid, Vec<RoomMessage>>,
    updates: AtomicUsize,
}

impl InMemoryRoomStore {
    /// Construct an empty store wrapped in an [`Arc`] for cheap sharing.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert or replace a room directly, bypassing patch merging.
    pub fn insert_room(&self, room: RoomRecord) {
        self.rooms.insert(room.id, room);
    }

    /// Remove a room and its transcript, returning the record if it existed.
    pub fn remove_room(&self, id: Uuid) -> Option<RoomRecord> {
        self.messages.remove(&id);
        self.rooms.remove(&id).map(|(_, room)| room)
    }

    /// Number of successful `update_room` calls so far.
    ///
    /// Diagnostic counter; the tests use it to assert the engine produced no
    /// writes for held or terminal rooms.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }
}

fn apply(room: &mut RoomRecord, patch: RoomPatch) {
    if let Some(stage) = patch.stage {
        room.stage = stage;
    }
    if let Some(ends_at) = patch.stage_ends_at {
        room.stage_ends_at = Some(ends_at);
    }
    if let Some(draft) = patch.draft {
        room.draft = Some(draft);
    }
}

impl RoomStore for InMemoryRoomStore {
    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomRecord>>> {
        let room = self.rooms.get(&id).map(|entry| entry.clone());
        Box::pin(async move { Ok(room) })
    }

    fn update_room(
        &self,
        id: Uuid,
        patch: RoomPatch,
    ) -> BoxFuture<'static, StorageResult<RoomRecord>> {
        let result = match self.rooms.get_mut(&id) {
            Some(mut room) => {
                apply(&mut room, patch);
                self.updates.fetch_add(1, Ordering::Relaxed);
                Ok(room.clone())
            }
            None => Err(StorageError::NotFound { id }),
        };
        Box::pin(async move { result })
    }

    fn append_message(&self, message: RoomMessage) -> BoxFuture<'static, StorageResult<()>> {
        self.messages
            .entry(message.room_id)
            .or_default()
            .push(message);
        Box::pin(async move { Ok(()) })
    }

    fn list_messages(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoomMessage>>> {
        let messages = self
            .messages
            .get(&room_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        Box::pin(async move { Ok(messages) })
    }
}
