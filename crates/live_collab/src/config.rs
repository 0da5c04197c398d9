//! Engine configuration.
//!
//! Every field has a default, so a partial JSON document such as
//! `{"session": {"max_participants": 8}}` is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Per-session limits and windows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a new session when the caller gives none
    pub default_ttl_secs: u64,
    /// Maximum number of participants present at once
    pub max_participants: usize,
    /// Committed operations kept for rebasing late submissions
    pub max_retained_ops: usize,
    /// Full-text versions kept for snapshot pushes
    pub history_depth: usize,
    /// Feed events kept for long-poll catch-up
    pub event_buffer: usize,
    /// Age after which an edit lock may be taken over
    pub lock_ttl_secs: u64,
    /// Chat messages kept per session
    pub message_history: usize,
    /// Commits between two snapshots sent to the snippet store
    pub snapshot_every_ops: u64,
    /// Silence after which a participant is no longer shown as present
    pub presence_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 86_400, // 24 hours
            max_participants: 5,
            max_retained_ops: 1_000,
            history_depth: 20,
            event_buffer: 256,
            lock_ttl_secs: 300,
            message_history: 50,
            snapshot_every_ops: 20,
            presence_timeout_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono_seconds(self.lock_ttl_secs)
    }

    pub fn presence_timeout(&self) -> chrono::Duration {
        chrono_seconds(self.presence_timeout_secs)
    }
}

/// Background sweep settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    /// Idle time after which a session nobody is in expires
    pub idle_grace_secs: u64,
    /// How long ended or expired sessions stay in memory
    pub terminal_retention_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            idle_grace_secs: 86_400,
            terminal_retention_secs: 3_600,
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn idle_grace(&self) -> chrono::Duration {
        chrono_seconds(self.idle_grace_secs)
    }

    pub fn terminal_retention(&self) -> chrono::Duration {
        chrono_seconds(self.terminal_retention_secs)
    }
}

/// Long-poll timeouts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub default_timeout_ms: u64,
    /// Upper bound for client-requested timeouts; keep below upstream HTTP timeouts
    pub max_timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 25_000,
            max_timeout_ms: 30_000,
        }
    }
}

impl FeedConfig {
    /// The effective wait for a requested timeout.
    pub fn clamp_timeout(&self, requested: Option<Duration>) -> Duration {
        let max = Duration::from_millis(self.max_timeout_ms);
        requested
            .unwrap_or_else(|| Duration::from_millis(self.default_timeout_ms))
            .min(max)
    }
}

/// Retry policy for snapshot writes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
        }
    }
}

impl PersistenceConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Signing of invite links.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InviteConfig {
    /// HMAC key for invite links. A random key is generated at startup when
    /// unset, so links do not survive a restart.
    pub secret: Option<String>,
    /// Lifetime of an invite when the host gives none; zero uses the default
    pub default_ttl_secs: u64,
}

impl InviteConfig {
    pub fn default_ttl(&self) -> Duration {
        match self.default_ttl_secs {
            0 => Duration::from_secs(86_400),
            secs => Duration::from_secs(secs),
        }
    }
}

/// Seconds as a chrono duration, capped at the largest one chrono holds.
fn chrono_seconds(secs: u64) -> chrono::Duration {
    const MAX_SECS: i64 = i64::MAX / 1_000;
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(MAX_SECS).min(MAX_SECS))
}

/// Complete engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub sweep: SweepConfig,
    pub feed: FeedConfig,
    pub persistence: PersistenceConfig,
    pub invite: InviteConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_sweep(mut self, sweep: SweepConfig) -> Self {
        self.sweep = sweep;
        self
    }

    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_invite(mut self, invite: InviteConfig) -> Self {
        self.invite = invite;
        self
    }

    pub fn with_max_participants(mut self, max: usize) -> Self {
        self.session.max_participants = max;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.session;
        let nonzero = [
            ("session.default_ttl_secs", s.default_ttl_secs),
            ("session.max_participants", s.max_participants as u64),
            ("session.max_retained_ops", s.max_retained_ops as u64),
            ("session.history_depth", s.history_depth as u64),
            ("session.event_buffer", s.event_buffer as u64),
            ("session.message_history", s.message_history as u64),
            ("session.snapshot_every_ops", s.snapshot_every_ops),
            ("session.presence_timeout_secs", s.presence_timeout_secs),
            ("sweep.interval_secs", self.sweep.interval_secs),
            ("feed.max_timeout_ms", self.feed.max_timeout_ms),
            ("persistence.max_attempts", u64::from(self.persistence.max_attempts)),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }

        if self.feed.default_timeout_ms > self.feed.max_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "feed.default_timeout_ms ({}) exceeds feed.max_timeout_ms ({})",
                self.feed.default_timeout_ms, self.feed.max_timeout_ms
            )));
        }
        if matches!(&self.invite.secret, Some(secret) if secret.is_empty()) {
            return Err(ConfigError::Invalid("invite.secret must not be empty".to_string()));
        }
        if self.persistence.initial_backoff_ms > self.persistence.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "persistence.initial_backoff_ms exceeds persistence.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}
