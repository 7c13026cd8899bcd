//! Token verification for incoming connections.
//!
//! Connections present an HS256-signed bearer token (usually via the `token`
//! query parameter of the WebSocket URL). A token that is missing, expired,
//! malformed, or signed with the wrong secret is never an error: the
//! connection simply proceeds as a guest.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifetime of freshly signed tokens.
pub const TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Claims carried by an account token.
///
/// `session_id` identifies the login session that minted the token; when the
/// account's current session differs, the token has been revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub exp: u64,
}

/// Signs a token for the given account, valid for [`TOKEN_TTL_SECS`].
pub fn sign_token(
    user_id: &str,
    session_id: Option<&str>,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let claims = Claims {
        user_id: user_id.to_string(),
        session_id: session_id.map(str::to_string),
        exp: now + TOKEN_TTL_SECS,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verifies a token and returns its claims, or `None` if it is not acceptable.
///
/// An empty secret disables verification entirely, so a server started without
/// one treats every connection as a guest.
pub fn verify_token(token: &str, secret: &str) -> Option<Claims> {
    if secret.is_empty() || token.is_empty() {
        return None;
    }
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .ok()
}
