//! Server state shared across connection and HTTP handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenVerifier;
use crate::handler::AUTH_TIMEOUT;
use crate::hub::RealtimeHub;

/// Shared application state
pub struct AppState {
    /// Session registry + room presence + fan-out
    pub hub: RealtimeHub,
    /// Bearer-token verifier for both authentication paths
    pub verifier: Arc<dyn TokenVerifier>,
    /// In-band authentication deadline
    pub auth_timeout: Duration,
}

impl AppState {
    pub fn new(hub: RealtimeHub, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            hub,
            verifier,
            auth_timeout: AUTH_TIMEOUT,
        }
    }

    /// Override the in-band auth deadline, for tests.
    pub fn with_auth_timeout(mut self, auth_timeout: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self
    }
}
