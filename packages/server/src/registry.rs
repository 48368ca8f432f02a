//! Session registry: one live connection handle per authenticated user.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::protocol::{ServerMessage, UserId};

/// Sending half of a connection's outbound queue. The receiving half is
/// drained by that connection's writer task.
pub type ConnectionSender = mpsc::UnboundedSender<ServerMessage>;

/// Maps each online user to exactly one connection handle.
///
/// Registration is last-writer-wins: a fresh connection for an already
/// registered user replaces the entry, and dropping the old sender ends the
/// old writer task, which closes that transport. A send failure is treated
/// as conclusive evidence of a dead connection and unregisters the user, so
/// no heartbeat sweep is needed to shed stale entries.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    connections: Arc<Mutex<HashMap<UserId, ConnectionSender>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`, replacing any prior entry.
    pub async fn register(&self, user_id: UserId, sender: ConnectionSender) {
        let mut connections = self.connections.lock().await;
        if connections.insert(user_id, sender).is_some() {
            tracing::info!("User {} reconnected, replacing previous session", user_id);
        } else {
            tracing::info!("User {} registered in session registry", user_id);
        }
    }

    /// Remove the entry for `user_id` if present. Idempotent.
    pub async fn unregister(&self, user_id: UserId) {
        let mut connections = self.connections.lock().await;
        if connections.remove(&user_id).is_some() {
            tracing::info!("User {} unregistered from session registry", user_id);
        }
    }

    /// Remove the entry for `user_id` only if it still holds `sender`.
    ///
    /// Connection teardown uses this so a loop that was replaced by a newer
    /// connection cannot evict its replacement.
    pub async fn unregister_if_current(&self, user_id: UserId, sender: &ConnectionSender) {
        let mut connections = self.connections.lock().await;
        if let Some(current) = connections.get(&user_id) {
            if current.same_channel(sender) {
                connections.remove(&user_id);
                tracing::info!("User {} unregistered from session registry", user_id);
            }
        }
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        let connections = self.connections.lock().await;
        connections.contains_key(&user_id)
    }

    /// Number of registered sessions, for the status endpoint.
    pub async fn online_count(&self) -> usize {
        let connections = self.connections.lock().await;
        connections.len()
    }

    /// Deliver `message` to `user_id`.
    ///
    /// Returns false for an offline user. A transport failure unregisters
    /// the entry (guarded, in case a reconnect raced in) before returning
    /// false.
    pub async fn send(&self, user_id: UserId, message: ServerMessage) -> bool {
        let sender = {
            let connections = self.connections.lock().await;
            match connections.get(&user_id) {
                Some(sender) => sender.clone(),
                None => return false,
            }
        };

        if sender.send(message).is_err() {
            tracing::warn!("Failed to send message to user {}, dropping session", user_id);
            self.unregister_if_current(user_id, &sender).await;
            return false;
        }
        true
    }
}
