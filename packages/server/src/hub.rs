//! Realtime hub: composes the session registry and the room presence
//! table, and owns message fan-out.

use std::sync::Arc;
use std::time::Duration;

use crate::directory::RoomDirectory;
use crate::protocol::{RoomId, ServerMessage, UserId};
use crate::registry::{ConnectionSender, SessionRegistry};
use crate::rooms::RoomPresence;

/// Shared entry point for everything the connection handlers and the HTTP
/// surface do to coordinator state.
#[derive(Clone)]
pub struct RealtimeHub {
    registry: SessionRegistry,
    rooms: RoomPresence,
}

impl RealtimeHub {
    pub fn new(directory: Arc<dyn RoomDirectory>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            rooms: RoomPresence::new(directory),
        }
    }

    /// Hub with a custom deactivation grace period, for tests and ops.
    pub fn with_grace_period(directory: Arc<dyn RoomDirectory>, grace_period: Duration) -> Self {
        Self {
            registry: SessionRegistry::new(),
            rooms: RoomPresence::with_grace_period(directory, grace_period),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomPresence {
        &self.rooms
    }

    /// Deliver `message` to every online member of `room_id` except
    /// `exclude`, returning how many sends succeeded.
    ///
    /// Iterates a copy of the online set so concurrent joins and
    /// disconnects cannot invalidate the walk. An absent or draining room
    /// yields 0 without error; an unreachable peer is unregistered by the
    /// registry's send-failure side effect and simply not counted.
    pub async fn broadcast_to_room(
        &self,
        room_id: RoomId,
        message: &ServerMessage,
        exclude: Option<UserId>,
    ) -> usize {
        let members = self.rooms.members_snapshot(room_id).await;
        let mut sent = 0;
        for user_id in members {
            if Some(user_id) == exclude {
                continue;
            }
            if self.registry.send(user_id, message.clone()).await {
                sent += 1;
            }
        }
        tracing::debug!("Broadcast to room {} reached {} users", room_id, sent);
        sent
    }

    /// Side-channel push telling a user to poll their account
    /// notifications. Routed through the registry's unicast send.
    pub async fn notify_user(&self, user_id: UserId) -> bool {
        self.registry
            .send(user_id, ServerMessage::ReceiveNotification)
            .await
    }

    /// Connection teardown: drop the session (only if `sender` is still the
    /// registered handle) and sweep the user out of any room it occupies.
    /// Idempotent, so a transport error racing an explicit close is fine.
    pub async fn disconnect(&self, user_id: UserId, sender: &ConnectionSender) {
        self.registry.unregister_if_current(user_id, sender).await;
        self.rooms.disconnect_user(user_id).await;
        tracing::info!("User {} disconnected", user_id);
    }

    /// Graceful shutdown: cancel all pending room deactivations.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down realtime hub, cancelling deactivation timers");
        self.rooms.shutdown().await;
    }
}
