//! Signed invite links.
//!
//! An invite is `<payload>.<signature>`. The payload is URL-safe base64 of a
//! small JSON object naming the session, the role granted and the expiry as a
//! unix timestamp. The signature is URL-safe base64 of the HMAC-SHA256 of the
//! encoded payload under the engine's invite key.

use crate::config::InviteConfig;
use crate::ids::SessionToken;
use crate::permissions::Role;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of a generated invite key.
const KEY_BYTES: usize = 32;

/// What an invite grants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteClaims {
    #[serde(rename = "t")]
    pub token: SessionToken,
    #[serde(rename = "p")]
    pub role: Role,
    #[serde(rename = "e", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl InviteClaims {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Reasons an invite is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InviteError {
    #[error("Malformed invite: {0}")]
    Malformed(String),

    #[error("Invite signature does not match")]
    BadSignature,

    #[error("Invite key rejected: {0}")]
    Key(String),
}

/// Signs and verifies invites with one HMAC key.
#[derive(Clone)]
pub struct InviteSigner {
    key: Vec<u8>,
}

impl fmt::Debug for InviteSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InviteSigner").finish_non_exhaustive()
    }
}

impl InviteSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// A signer with a fresh key from the OS random number generator.
    pub fn random() -> Self {
        let mut key = vec![0u8; KEY_BYTES];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// The configured secret, or a random key when none is set.
    pub fn from_config(config: &InviteConfig) -> Self {
        match &config.secret {
            Some(secret) => Self::new(secret.as_bytes()),
            None => Self::random(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, InviteError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| InviteError::Key(e.to_string()))
    }

    pub fn sign(&self, claims: &InviteClaims) -> Result<String, InviteError> {
        let json = serde_json::to_vec(claims).map_err(|e| InviteError::Malformed(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{payload}.{signature}"))
    }

    /// Check the signature and decode the claims. Expiry is left to the
    /// caller, which knows the current time.
    pub fn verify(&self, invite: &str) -> Result<InviteClaims, InviteError> {
        let (payload, signature) = invite
            .trim()
            .rsplit_once('.')
            .ok_or_else(|| InviteError::Malformed("missing signature".to_string()))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| InviteError::Malformed(e.to_string()))?;

        // Compared in constant time
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| InviteError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| InviteError::Malformed(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| InviteError::Malformed(e.to_string()))
    }
}
