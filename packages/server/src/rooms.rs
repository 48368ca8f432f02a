//! Room presence table, per-room video-state tracker, and the delayed
//! deactivation scheduler.
//!
//! A room entry exists iff the room is non-empty or inside its
//! deactivation grace window (draining). Draining entries keep their video
//! snapshot so a quick rejoin does not lose playback position; the
//! persisted active flag in the external directory is only cleared once
//! the grace period elapses with the room still empty.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::directory::{DirectoryError, RoomDirectory};
use crate::protocol::{RoomId, RoomInfo, UserId};

/// Grace period a room stays draining before it is deactivated.
pub const ROOM_DEACTIVATION_DELAY: Duration = Duration::from_secs(300);

/// Playback operation kinds, as recorded in room snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    SetUrl,
    Play,
    Pause,
    Seek,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::SetUrl => "set_url",
            OpKind::Play => "play",
            OpKind::Pause => "pause",
            OpKind::Seek => "seek",
        }
    }
}

/// A playback-control operation applied to a room's video state.
#[derive(Debug, Clone)]
pub enum VideoOp {
    SetUrl {
        url: String,
        duration: Option<f64>,
    },
    Play {
        progress: f64,
    },
    Pause {
        progress: f64,
    },
    Seek {
        offset: f64,
        playing: bool,
        client_timestamp: i64,
    },
}

/// Last applied operation, kept as a hint for joining clients. Last-writer
/// wins; no reconciliation is attempted.
#[derive(Debug, Clone)]
struct LastOperation {
    kind: OpKind,
    user: UserId,
    progress: f64,
    at: DateTime<Utc>,
    params: Value,
}

/// Lifecycle state of a room as seen by the presence table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    /// At least one user online.
    Active,
    /// Empty, entry retained, deactivation timer armed.
    Draining,
    /// No entry in the table.
    Deactivated,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Active => "active",
            RoomStatus::Draining => "draining",
            RoomStatus::Deactivated => "deactivated",
        }
    }
}

/// In-memory state of one active (or draining) room.
#[derive(Debug, Clone)]
struct ActiveRoom {
    online_users: HashSet<UserId>,
    video_url: Option<String>,
    video_duration: Option<f64>,
    last_op: Option<LastOperation>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl ActiveRoom {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            online_users: HashSet::new(),
            video_url: None,
            video_duration: None,
            last_op: None,
            created_at: now,
            last_activity: now,
        }
    }

    fn apply(&mut self, user: UserId, op: &VideoOp) {
        let now = Utc::now();
        let (kind, progress, params) = match op {
            VideoOp::SetUrl { url, duration } => {
                self.video_url = Some(url.clone());
                self.video_duration = *duration;
                (
                    OpKind::SetUrl,
                    0.0,
                    json!({"url": url, "duration": duration}),
                )
            }
            VideoOp::Play { progress } => (OpKind::Play, *progress, json!({})),
            VideoOp::Pause { progress } => (OpKind::Pause, *progress, json!({})),
            VideoOp::Seek {
                offset,
                playing,
                client_timestamp,
            } => (
                OpKind::Seek,
                *offset,
                json!({"playing": playing, "client_timestamp": client_timestamp}),
            ),
        };
        self.last_op = Some(LastOperation {
            kind,
            user,
            progress,
            at: now,
            params,
        });
        self.last_activity = now;
    }

    fn snapshot(&self) -> RoomInfo {
        RoomInfo {
            online_users_count: self.online_users.len(),
            video_url: self.video_url.clone(),
            video_duration: self.video_duration,
            last_operation_type: self.last_op.as_ref().map(|op| op.kind.as_str().to_string()),
            last_operation_time: self.last_op.as_ref().map(|op| op.at.to_rfc3339()),
            last_operation_progress: self.last_op.as_ref().map(|op| op.progress).unwrap_or(0.0),
            last_operation_user: self.last_op.as_ref().map(|op| op.user),
            last_operation_params: self.last_op.as_ref().map(|op| op.params.clone()),
        }
    }
}

/// Errors surfaced to a client trying to enter a room.
#[derive(Debug, thiserror::Error)]
pub enum EnterError {
    #[error("room not found")]
    RoomNotFound,
    #[error("not a member of this room")]
    NotAMember,
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

struct PresenceInner {
    rooms: HashMap<RoomId, ActiveRoom>,
    timers: HashMap<RoomId, JoinHandle<()>>,
    shutting_down: bool,
}

/// Presence table for all rooms, shared across connection tasks.
///
/// All mutations go through the single inner mutex; deactivation timers
/// re-enter through the same mutex and re-check emptiness before acting,
/// which closes the race between "room observed empty" and "timer fires".
#[derive(Clone)]
pub struct RoomPresence {
    inner: Arc<Mutex<PresenceInner>>,
    directory: Arc<dyn RoomDirectory>,
    grace_period: Duration,
}

impl RoomPresence {
    pub fn new(directory: Arc<dyn RoomDirectory>) -> Self {
        Self::with_grace_period(directory, ROOM_DEACTIVATION_DELAY)
    }

    pub fn with_grace_period(directory: Arc<dyn RoomDirectory>, grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PresenceInner {
                rooms: HashMap::new(),
                timers: HashMap::new(),
                shutting_down: false,
            })),
            directory,
            grace_period,
        }
    }

    /// Attach `user_id` to `room_id`.
    ///
    /// Existence and membership are re-validated against the directory on
    /// every call, so a membership revocation takes effect on the next
    /// enter even for an already connected user. On success the room entry
    /// is created if absent, any pending deactivation is cancelled, and the
    /// post-join snapshot is returned.
    pub async fn enter(&self, user_id: UserId, room_id: RoomId) -> Result<RoomInfo, EnterError> {
        if !self.directory.room_exists(room_id).await? {
            tracing::warn!("User {} tried to enter non-existent room {}", user_id, room_id);
            return Err(EnterError::RoomNotFound);
        }
        if !self.directory.is_room_member(room_id, user_id).await? {
            tracing::warn!("User {} is not a member of room {}", user_id, room_id);
            return Err(EnterError::NotAMember);
        }

        let mut inner = self.inner.lock().await;
        let room = inner.rooms.entry(room_id).or_insert_with(ActiveRoom::new);
        let was_empty = room.online_users.is_empty();
        room.online_users.insert(user_id);
        room.last_activity = Utc::now();
        let snapshot = room.snapshot();

        if was_empty {
            if let Some(timer) = inner.timers.remove(&room_id) {
                timer.abort();
                tracing::info!("Room {} deactivation timer cancelled", room_id);
            }
            // Flag flip happens under the table lock so it cannot interleave
            // with a concurrent timer firing for the same room.
            if let Err(e) = self.directory.set_room_active(room_id, true).await {
                tracing::error!("Failed to mark room {} active: {}", room_id, e);
            } else {
                tracing::info!("Room {} became active", room_id);
            }
        }

        tracing::info!("User {} entered room {}", user_id, room_id);
        Ok(snapshot)
    }

    /// Detach `user_id` from `room_id`. If the room becomes empty the entry
    /// is retained in a draining state and a deactivation timer is armed.
    pub async fn leave(&self, user_id: UserId, room_id: RoomId) {
        let mut inner = self.inner.lock().await;
        if let Some(room) = inner.rooms.get_mut(&room_id) {
            room.online_users.remove(&user_id);
            if room.online_users.is_empty() {
                self.arm_deactivation_locked(&mut inner, room_id);
            }
        }
        tracing::info!("User {} left room {}", user_id, room_id);
    }

    /// Remove `user_id` from every room it occupies, arming deactivation
    /// for rooms that become empty. Safe to call more than once.
    pub async fn disconnect_user(&self, user_id: UserId) {
        let mut inner = self.inner.lock().await;
        let mut drained = Vec::new();
        for (room_id, room) in inner.rooms.iter_mut() {
            if room.online_users.remove(&user_id) && room.online_users.is_empty() {
                drained.push(*room_id);
            }
        }
        for room_id in drained {
            self.arm_deactivation_locked(&mut inner, room_id);
        }
    }

    /// Apply a playback operation to a room's video state.
    ///
    /// Returns false (dropping the operation) when the room has no entry;
    /// operations never create entries, so the table invariant holds.
    pub async fn apply_video_op(&self, room_id: RoomId, user_id: UserId, op: &VideoOp) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.rooms.get_mut(&room_id) {
            Some(room) => {
                room.apply(user_id, op);
                true
            }
            None => {
                tracing::warn!(
                    "Dropping video op from user {} for inactive room {}",
                    user_id,
                    room_id
                );
                false
            }
        }
    }

    /// Snapshot of a room's state, if it has an entry.
    pub async fn room_info(&self, room_id: RoomId) -> Option<RoomInfo> {
        let inner = self.inner.lock().await;
        inner.rooms.get(&room_id).map(|room| room.snapshot())
    }

    /// Copy of the room's online set, for safe iteration during fan-out.
    pub async fn members_snapshot(&self, room_id: RoomId) -> Vec<UserId> {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .get(&room_id)
            .map(|room| room.online_users.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn status(&self, room_id: RoomId) -> RoomStatus {
        let inner = self.inner.lock().await;
        match inner.rooms.get(&room_id) {
            Some(room) if room.online_users.is_empty() => RoomStatus::Draining,
            Some(_) => RoomStatus::Active,
            None => RoomStatus::Deactivated,
        }
    }

    pub async fn online_count(&self, room_id: RoomId) -> usize {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .get(&room_id)
            .map(|room| room.online_users.len())
            .unwrap_or(0)
    }

    /// Room currently occupied by `user_id`, if any.
    pub async fn current_room(&self, user_id: UserId) -> Option<RoomId> {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .iter()
            .find(|(_, room)| room.online_users.contains(&user_id))
            .map(|(room_id, _)| *room_id)
    }

    /// Number of room entries, draining ones included.
    pub async fn active_rooms_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.rooms.len()
    }

    /// Number of rooms with at least one online user.
    pub async fn truly_active_rooms_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .values()
            .filter(|room| !room.online_users.is_empty())
            .count()
    }

    /// Cancel all outstanding deactivation timers and await their
    /// termination. No deactivation side effect fires after this returns.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.lock().await;
            inner.shutting_down = true;
            inner
                .timers
                .drain()
                .map(|(room_id, handle)| {
                    handle.abort();
                    tracing::info!("Cancelled deactivation timer for room {}", room_id);
                    handle
                })
                .collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Arm (or re-arm) the deactivation timer for a drained room. Always
    /// cancels any previous timer first, so at most one is outstanding.
    fn arm_deactivation_locked(&self, inner: &mut PresenceInner, room_id: RoomId) {
        if inner.shutting_down {
            return;
        }
        if let Some(prev) = inner.timers.remove(&room_id) {
            prev.abort();
        }
        let presence = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(presence.grace_period).await;
            presence.finish_deactivation(room_id).await;
        });
        inner.timers.insert(room_id, handle);
        tracing::info!(
            "Room {} entered draining state, deactivation in {:?}",
            room_id,
            self.grace_period
        );
    }

    /// Timer body: re-check emptiness under the table lock; a user may have
    /// rejoined after this timer was scheduled but before its cancellation
    /// landed, in which case firing is a silent no-op.
    async fn finish_deactivation(&self, room_id: RoomId) {
        let mut inner = self.inner.lock().await;
        inner.timers.remove(&room_id);
        match inner.rooms.get(&room_id) {
            Some(room) if room.online_users.is_empty() => {
                inner.rooms.remove(&room_id);
                if let Err(e) = self.directory.set_room_active(room_id, false).await {
                    tracing::error!("Failed to mark room {} inactive: {}", room_id, e);
                }
                tracing::info!("Room {} deactivated after grace period", room_id);
            }
            Some(_) => {
                tracing::info!("Room {} deactivation superseded, users rejoined", room_id);
            }
            None => {
                tracing::info!("Room {} was already removed", room_id);
            }
        }
    }
}
