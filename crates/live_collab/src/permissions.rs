//! Participant roles within a collaboration session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Roles in order of increasing access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Can follow the session and move a cursor (read-only)
    Viewer = 1,
    /// Can submit edits
    Editor = 2,
    /// Created the session; can edit and end it
    Host = 3,
}

impl Role {
    /// Check if this role may submit operations
    pub fn can_edit(&self) -> bool {
        *self >= Role::Editor
    }

    /// Check if this role may end the session
    pub fn can_end(&self) -> bool {
        *self == Role::Host
    }

    /// Parse a role name, accepting the short permission names
    /// (`edit`, `view`) used by older clients.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" | "owner" => Some(Role::Host),
            "editor" | "edit" => Some(Role::Editor),
            "viewer" | "view" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Host => "host",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Editor
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Viewer < Role::Editor);
        assert!(Role::Editor < Role::Host);
    }

    #[test]
    fn test_role_capabilities() {
        assert!(!Role::Viewer.can_edit());
        assert!(Role::Editor.can_edit());
        assert!(Role::Host.can_edit());

        assert!(!Role::Viewer.can_end());
        assert!(!Role::Editor.can_end());
        assert!(Role::Host.can_end());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("edit"), Some(Role::Editor));
        assert_eq!(Role::parse("Viewer"), Some(Role::Viewer));
        assert_eq!(Role::parse(" view "), Some(Role::Viewer));
        assert_eq!(Role::parse("host"), Some(Role::Host));
        assert_eq!(Role::parse("admin"), None);
    }

    #[test]
    fn test_role_default_and_serde() {
        assert_eq!(Role::default(), Role::Editor);
        assert_eq!(serde_json::to_string(&Role::Viewer).unwrap(), "\"viewer\"");
        let role: Role = serde_json::from_str("\"host\"").unwrap();
        assert_eq!(role, Role::Host);
        assert_eq!(Role::Editor.to_string(), "editor");
    }
}
