//! Participant presence for a collaboration session.
//!
//! Tracks who is in the session, what role they were granted, where their
//! cursor is and which colour their cursor is drawn in.

use crate::error::{CollabError, CollabResult};
use crate::ids::{Identity, UserId};
use crate::permissions::Role;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A cursor position in line/column coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub line: u32,
    pub column: u32,
}

impl Cursor {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A user's membership in a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    /// Assigned cursor colour (hex)
    pub color: String,
    pub cursor: Cursor,
    pub joined_at: DateTime<Utc>,
    /// Set while the participant is away; cleared on rejoin
    pub left_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
}

impl Participant {
    /// Whether the participant is currently in the session.
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }

    /// Whether the participant is in the session and has been heard from
    /// within `timeout`.
    pub fn is_present(&self, now: DateTime<Utc>, timeout: Option<Duration>) -> bool {
        self.is_active() && timeout.map_or(true, |t| now - self.last_seen_at <= t)
    }

    /// Snapshot for clients. `active` reports presence, not membership.
    pub fn view(&self, now: DateTime<Utc>, timeout: Option<Duration>) -> ParticipantView {
        ParticipantView {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            color: self.color.clone(),
            cursor: self.cursor,
            active: self.is_present(now, timeout),
            last_seen_at: self.last_seen_at,
        }
    }
}

/// Participant as rendered in update batches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    pub color: String,
    pub cursor: Cursor,
    pub active: bool,
    pub last_seen_at: DateTime<Utc>,
}

/// How a join changed the roster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    /// First time in this session
    New,
    /// Came back after leaving
    Rejoined,
    /// Was already active; only the heartbeat moved
    AlreadyActive,
}

/// All participants of one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Roster {
    participants: BTreeMap<UserId, Participant>,
    /// Colours are kept across leave/rejoin
    color_assignments: HashMap<UserId, String>,
    palette: Vec<String>,
    next_color_index: usize,
    /// Silent participants past this are not counted as present
    #[serde(skip)]
    presence_timeout: Option<Duration>,
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl Roster {
    pub fn new() -> Self {
        Self {
            participants: BTreeMap::new(),
            color_assignments: HashMap::new(),
            palette: default_colors(),
            next_color_index: 0,
            presence_timeout: None,
        }
    }

    pub fn with_presence_timeout(mut self, timeout: Duration) -> Self {
        self.presence_timeout = Some(timeout);
        self
    }

    /// Rebuild a roster from persisted participants, keeping their colours.
    pub fn from_participants(participants: impl IntoIterator<Item = Participant>) -> Self {
        let mut roster = Self::new();
        for participant in participants {
            roster
                .color_assignments
                .insert(participant.user_id.clone(), participant.color.clone());
            roster.next_color_index = (roster.next_color_index + 1) % roster.palette.len();
            roster
                .participants
                .insert(participant.user_id.clone(), participant);
        }
        roster
    }

    /// Add or reactivate a participant.
    ///
    /// A returning user keeps the role granted on first join. Fails with
    /// [`CollabError::SessionFull`] when `max_active` others are present.
    pub fn join(
        &mut self,
        identity: &Identity,
        role: Role,
        now: DateTime<Utc>,
        max_active: usize,
    ) -> CollabResult<(JoinKind, &Participant)> {
        let already_active = self
            .participants
            .get(&identity.user_id)
            .map(Participant::is_active);
        if already_active != Some(true) && self.active_count(now) >= max_active {
            return Err(CollabError::SessionFull(max_active));
        }

        let kind = match already_active {
            None => JoinKind::New,
            Some(false) => JoinKind::Rejoined,
            Some(true) => JoinKind::AlreadyActive,
        };

        if kind == JoinKind::New {
            let color = self.assign_color(&identity.user_id);
            self.participants.insert(
                identity.user_id.clone(),
                Participant {
                    user_id: identity.user_id.clone(),
                    display_name: identity.display_name.clone(),
                    role,
                    color,
                    cursor: Cursor::default(),
                    joined_at: now,
                    left_at: None,
                    last_seen_at: now,
                },
            );
        }

        let participant = self
            .participants
            .get_mut(&identity.user_id)
            .ok_or_else(|| CollabError::ParticipantNotFound(identity.user_id.clone()))?;
        if kind == JoinKind::Rejoined {
            participant.left_at = None;
            participant.joined_at = now;
        }
        participant.display_name = identity.display_name.clone();
        participant.last_seen_at = now;
        Ok((kind, &*participant))
    }

    /// Mark a participant as away. Returns `false` if they had already left.
    pub fn leave(&mut self, user_id: &UserId, now: DateTime<Utc>) -> CollabResult<bool> {
        let participant = self
            .participants
            .get_mut(user_id)
            .ok_or_else(|| CollabError::ParticipantNotFound(user_id.clone()))?;
        if !participant.is_active() {
            return Ok(false);
        }
        participant.left_at = Some(now);
        participant.last_seen_at = now;
        Ok(true)
    }

    /// Move a participant's cursor.
    pub fn set_cursor(
        &mut self,
        user_id: &UserId,
        cursor: Cursor,
        now: DateTime<Utc>,
    ) -> CollabResult<()> {
        let participant = self.active_mut(user_id)?;
        participant.cursor = cursor;
        participant.last_seen_at = now;
        Ok(())
    }

    /// Refresh a participant's heartbeat.
    pub fn touch(&mut self, user_id: &UserId, now: DateTime<Utc>) {
        if let Some(participant) = self.participants.get_mut(user_id) {
            participant.last_seen_at = now;
        }
    }

    pub fn get(&self, user_id: &UserId) -> Option<&Participant> {
        self.participants.get(user_id)
    }

    /// An active participant, or an error naming why the user cannot act.
    pub fn active(&self, user_id: &UserId) -> CollabResult<&Participant> {
        match self.participants.get(user_id) {
            Some(p) if p.is_active() => Ok(p),
            Some(_) => Err(CollabError::forbidden(user_id, "participant has left the session")),
            None => Err(CollabError::ParticipantNotFound(user_id.clone())),
        }
    }

    fn active_mut(&mut self, user_id: &UserId) -> CollabResult<&mut Participant> {
        match self.participants.get_mut(user_id) {
            Some(p) if p.is_active() => Ok(p),
            Some(_) => Err(CollabError::forbidden(user_id, "participant has left the session")),
            None => Err(CollabError::ParticipantNotFound(user_id.clone())),
        }
    }

    /// Participants present at `now`.
    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.participants
            .values()
            .filter(|p| p.is_present(now, self.presence_timeout))
            .count()
    }

    pub fn is_empty_of_active(&self, now: DateTime<Utc>) -> bool {
        self.active_count(now) == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn views(&self, now: DateTime<Utc>) -> Vec<ParticipantView> {
        self.participants
            .values()
            .map(|p| p.view(now, self.presence_timeout))
            .collect()
    }

    /// Colour for a user, assigned round-robin on first sight.
    pub fn assign_color(&mut self, user_id: &UserId) -> String {
        if let Some(color) = self.color_assignments.get(user_id) {
            return color.clone();
        }

        let color = self.palette[self.next_color_index].clone();
        self.next_color_index = (self.next_color_index + 1) % self.palette.len();

        self.color_assignments.insert(user_id.clone(), color.clone());
        color
    }
}

/// Cursor colour palette.
pub fn default_colors() -> Vec<String> {
    vec![
        "#E91E63".into(), // Pink
        "#9C27B0".into(), // Purple
        "#3F51B5".into(), // Indigo
        "#2196F3".into(), // Blue
        "#00BCD4".into(), // Cyan
        "#4CAF50".into(), // Green
        "#FF9800".into(), // Orange
        "#795548".into(), // Brown
    ]
}
