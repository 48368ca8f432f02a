//! Error types for the cinesync client.

use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Server rejected the authentication token
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),
}
