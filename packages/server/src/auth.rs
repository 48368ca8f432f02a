//! Token verification for WebSocket handshakes.
//!
//! Tokens are HS256 JWTs whose `sub` claim carries the numeric user id,
//! issued by the account service. The coordinator only verifies; issuing
//! lives here solely for tests and operational tooling.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::protocol::UserId;

/// JWT claim set shared with the account service.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric user id, stringly typed as JWT convention dictates.
    pub sub: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

/// Verifies an opaque bearer token and resolves it to a user identity.
pub trait TokenVerifier: Send + Sync {
    /// Returns the user id for a valid, unexpired token, `None` otherwise.
    fn verify(&self, token: &str) -> Option<UserId>;
}

/// HS256 JWT verifier.
pub struct JwtTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtTokenVerifier {
    fn verify(&self, token: &str) -> Option<UserId> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).ok()?;
        data.claims.sub.parse::<u64>().ok().map(UserId)
    }
}

/// Issue a token for the given user, valid for `ttl_secs`.
pub fn issue_token(
    secret: &[u8],
    user_id: UserId,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
}
