//! Stable player identity, independent of the transport connection.
//!
//! A client holds an opaque signed token and presents it on every connect;
//! the embedded id is what Player rows key on, so a reconnect lands back on
//! the same seat.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{ActionError, ActionResult};
use crate::types::IdentityId;

/// Identity signing configuration
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    secret: String,
}

impl IdentityConfig {
    /// Load the signing secret from IDENTITY_SECRET. Without it a
    /// process-local secret is generated: tokens then die with the process.
    pub fn from_env() -> Self {
        let secret = std::env::var("IDENTITY_SECRET")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        match secret {
            Some(secret) => {
                tracing::info!("Identity signing secret loaded");
                Self { secret }
            }
            None => {
                tracing::warn!(
                    "IDENTITY_SECRET not set, using a process-local secret; identity tokens will not survive a restart"
                );
                Self {
                    secret: ulid::Ulid::new().to_string(),
                }
            }
        }
    }

    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn sign(&self, id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        hasher.update(b".");
        hasher.update(self.secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Mint a fresh identity and its wire token
    pub fn mint(&self) -> (IdentityId, String) {
        let id = ulid::Ulid::new().to_string();
        let token = self.token_for(&id);
        (id, token)
    }

    /// Wire token for an existing identity id
    pub fn token_for(&self, id: &str) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}.{}", id, self.sign(id)))
    }

    /// Verify a wire token and return the embedded identity id
    pub fn verify(&self, token: &str) -> ActionResult<IdentityId> {
        let malformed = || ActionError::Unauthorized("malformed identity token".to_string());

        let decoded = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| malformed())?;
        let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
        let (id, sig) = decoded.split_once('.').ok_or_else(malformed)?;

        let expected = self.sign(id);
        if !constant_time_eq(expected.as_bytes(), sig.as_bytes()) {
            return Err(ActionError::Unauthorized(
                "identity token signature mismatch".to_string(),
            ));
        }

        Ok(id.to_string())
    }
}

/// Constant-time byte comparison to prevent timing attacks
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Friendly default nickname for clients that don't pick one
pub fn default_nickname() -> String {
    petname::petname(2, "-").unwrap_or_else(|| "anonymous".to_string())
}
