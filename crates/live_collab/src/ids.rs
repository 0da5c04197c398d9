//! Identifiers for sessions, documents and users.
//!
//! Session tokens are the client-facing handle of a collaboration session.
//! They carry 256 bits of entropy drawn from the operating system RNG and are
//! rendered as lowercase hex.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of random bytes in a session token.
const TOKEN_BYTES: usize = 32;

/// Opaque handle identifying a collaboration session.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh token from the OS random number generator.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let mut hex = String::with_capacity(TOKEN_BYTES * 2);
        for byte in bytes {
            hex.push(hex_digit(byte >> 4));
            hex.push(hex_digit(byte & 0x0f));
        }
        Self(hex)
    }

    /// Parse a token previously rendered with [`SessionToken::as_str`].
    ///
    /// Returns `None` unless the input is exactly 64 lowercase hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        let valid = s.len() == TOKEN_BYTES * 2
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    /// The full hex rendering.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A short prefix suitable for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

fn hex_digit(nibble: u8) -> char {
    char::from_digit(u32::from(nibble), 16).unwrap_or('0')
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SessionToken {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SessionToken::from_hex(&value).ok_or_else(|| format!("invalid session token: {value}"))
    }
}

impl From<SessionToken> for String {
    fn from(token: SessionToken) -> Self {
        token.0
    }
}

/// User identifier supplied by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        UserId(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the snippet being edited.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId(s)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A verified caller, as handed over by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_format() {
        let token = SessionToken::generate();
        assert_eq!(token.as_str().len(), 64);
        assert!(token
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(token.short().len(), 8);
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens: HashSet<SessionToken> = (0..1000).map(|_| SessionToken::generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_token_parse() {
        let token = SessionToken::generate();
        assert_eq!(SessionToken::from_hex(token.as_str()), Some(token.clone()));
        assert!(SessionToken::from_hex("abc").is_none());
        assert!(SessionToken::from_hex(&"G".repeat(64)).is_none());
        assert!(SessionToken::from_hex(&"AB".repeat(32)).is_none());
    }

    #[test]
    fn test_token_serde() {
        let token = SessionToken::generate();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, format!("\"{}\"", token));
        let back: SessionToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
        assert!(serde_json::from_str::<SessionToken>("\"nope\"").is_err());
    }

    #[test]
    fn test_identity() {
        let identity = Identity::new("u1", "Ada");
        assert_eq!(identity.user_id, UserId::from("u1"));
        assert_eq!(identity.display_name, "Ada");
        assert_eq!(DocumentId::from("snippet-9").to_string(), "snippet-9");
    }
}
