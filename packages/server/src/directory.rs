//! External room directory interface.
//!
//! Authoritative room metadata (existence, membership, the persisted
//! active flag) lives in the account/room service; the coordinator only
//! consults it. The trait is async and fallible because the real
//! implementation sits on the other side of a database or RPC hop.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::protocol::{RoomId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("room directory unavailable: {0}")]
    Unavailable(String),
}

/// Data-access surface the coordinator needs from the room service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn room_exists(&self, room_id: RoomId) -> Result<bool, DirectoryError>;

    async fn is_room_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, DirectoryError>;

    /// Persist the room's active flag.
    async fn set_room_active(&self, room_id: RoomId, active: bool) -> Result<(), DirectoryError>;
}

#[derive(Debug, Default)]
struct RoomRecord {
    members: HashSet<UserId>,
    active: bool,
}

/// In-memory directory used by the demo binary and the test suite.
#[derive(Default)]
pub struct InMemoryRoomDirectory {
    rooms: Mutex<HashMap<RoomId, RoomRecord>>,
}

impl InMemoryRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a room with the given member set.
    pub async fn seed_room(&self, room_id: RoomId, members: impl IntoIterator<Item = UserId>) {
        let mut rooms = self.rooms.lock().await;
        rooms.insert(
            room_id,
            RoomRecord {
                members: members.into_iter().collect(),
                active: false,
            },
        );
    }

    /// Current persisted active flag, for the status endpoint and tests.
    pub async fn is_active(&self, room_id: RoomId) -> bool {
        let rooms = self.rooms.lock().await;
        rooms.get(&room_id).map(|r| r.active).unwrap_or(false)
    }
}

#[async_trait]
impl RoomDirectory for InMemoryRoomDirectory {
    async fn room_exists(&self, room_id: RoomId) -> Result<bool, DirectoryError> {
        let rooms = self.rooms.lock().await;
        Ok(rooms.contains_key(&room_id))
    }

    async fn is_room_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, DirectoryError> {
        let rooms = self.rooms.lock().await;
        Ok(rooms
            .get(&room_id)
            .map(|r| r.members.contains(&user_id))
            .unwrap_or(false))
    }

    async fn set_room_active(&self, room_id: RoomId, active: bool) -> Result<(), DirectoryError> {
        let mut rooms = self.rooms.lock().await;
        if let Some(record) = rooms.get_mut(&room_id) {
            record.active = active;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_room_exists_with_members() {
        let directory = InMemoryRoomDirectory::new();
        directory.seed_room(RoomId(1), [UserId(10), UserId(11)]).await;

        assert!(directory.room_exists(RoomId(1)).await.unwrap());
        assert!(!directory.room_exists(RoomId(2)).await.unwrap());
        assert!(directory.is_room_member(RoomId(1), UserId(10)).await.unwrap());
        assert!(!directory.is_room_member(RoomId(1), UserId(12)).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_room_active_round_trips() {
        let directory = InMemoryRoomDirectory::new();
        directory.seed_room(RoomId(1), [UserId(10)]).await;

        directory.set_room_active(RoomId(1), true).await.unwrap();
        assert!(directory.is_active(RoomId(1)).await);

        directory.set_room_active(RoomId(1), false).await.unwrap();
        assert!(!directory.is_active(RoomId(1)).await);
    }

    #[tokio::test]
    async fn test_membership_check_on_unknown_room_is_false() {
        let directory = InMemoryRoomDirectory::new();

        assert!(!directory.is_room_member(RoomId(9), UserId(1)).await.unwrap());
    }
}
