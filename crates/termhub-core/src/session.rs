//! Session identifiers and value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Maximum length of a session name, in characters.
pub const MAX_SESSION_NAME_LEN: usize = 64;

/// User-visible name of a session.
///
/// Names are unique within the registry at any instant and may change
/// through rename. Use [`SessionName::parse`] for names arriving from
/// the wire; [`SessionName::new`] does not validate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionName(String);

impl SessionName {
    /// Creates a SessionName without validation.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a SessionName, rejecting blank, overlong, or
    /// control-character names.
    pub fn parse(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        let invalid = |reason: &str| DomainError::InvalidSessionName {
            name: name.chars().take(MAX_SESSION_NAME_LEN).collect(),
            reason: reason.to_string(),
        };

        if name.trim().is_empty() {
            return Err(invalid("must not be empty"));
        }
        if name.chars().count() > MAX_SESSION_NAME_LEN {
            return Err(invalid("too long"));
        }
        if name.chars().any(char::is_control) {
            return Err(invalid("contains control characters"));
        }
        Ok(Self(name))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of one logical viewer (e.g. a browser tab).
///
/// Chosen by the front end; the daemon only uses it as a binding key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a new ClientId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    /// Creates a size, clamping each dimension to at least one cell.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl fmt::Display for TermSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// How a session's process ended.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code, if the process reported one
    pub code: Option<i32>,
    /// Terminating signal name (e.g. "Hangup"), if any
    pub signal: Option<String>,
}

/// Read-only view of a session, as returned by `list-sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub name: SessionName,
    pub pid: Option<u32>,
    pub alive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
    /// Number of client bindings pointing at this session
    pub clients: usize,
    pub cols: u16,
    pub rows: u16,
    pub created_at: DateTime<Utc>,
    /// Advisory: whether the shell has descendant processes.
    /// `None` means unknown (probe failed or timed out).
    #[serde(default)]
    pub has_child_processes: Option<bool>,
}
