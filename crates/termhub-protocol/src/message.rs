//! Protocol message types for daemon communication.
//!
//! Every record on the wire is one JSON object. Incoming objects are either
//! a [`Command`] (no `id`, never answered) or a [`Request`] (`id` present,
//! answered by exactly one [`Response`] carrying the same `id`). Outgoing
//! objects are either a `Response` or a [`BroadcastEvent`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use termhub_core::{ClientId, SessionInfo, SessionName};
use thiserror::Error;

/// Error text sent for a request whose `type` the daemon does not know.
pub const UNKNOWN_MESSAGE_TYPE: &str = "Unknown message type";

// ============================================================================
// Identifiers
// ============================================================================

/// Correlation id chosen by the requester, echoed in the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

// ============================================================================
// Client -> Daemon
// ============================================================================

/// Fire-and-forget messages (no `id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    /// Keystrokes for the session bound to `client_id`
    #[serde(rename_all = "camelCase")]
    Input { client_id: ClientId, data: String },

    /// Viewport size change for the session bound to `client_id`
    #[serde(rename_all = "camelCase")]
    Resize {
        client_id: ClientId,
        cols: u16,
        rows: u16,
    },

    /// Drop the binding for `client_id`
    #[serde(rename_all = "camelCase")]
    Detach { client_id: ClientId },

    /// Any command type this daemon does not know
    #[serde(other)]
    Unknown,
}

/// Body of a correlated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RequestKind {
    ListSessions,

    CreateSession {
        name: String,
    },

    DeleteSession {
        name: SessionName,
    },

    #[serde(rename_all = "camelCase")]
    RenameSession {
        old_name: SessionName,
        new_name: String,
    },

    /// Get-or-create `session` and bind `client_id` to it
    #[serde(rename_all = "camelCase")]
    Attach {
        client_id: ClientId,
        session: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
    },

    #[serde(rename_all = "camelCase")]
    Detach {
        client_id: ClientId,
    },

    GetShortcuts,

    SetShortcuts {
        data: Value,
    },

    /// Any request type this daemon does not know
    #[serde(other)]
    Unknown,
}

/// A correlated request: `{id, type, ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub id: RequestId,
    #[serde(flatten)]
    pub kind: RequestKind,
}

/// Any message a front end sends to the daemon.
///
/// The presence of a non-null `id` field decides the variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Command(Command),
    Request(Request),
}

/// Why an incoming JSON value could not become a [`ClientMessage`].
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("invalid request id")]
    InvalidId,

    /// The message has a usable id but its body is malformed.
    #[error("Invalid request: {reason}")]
    InvalidRequest { id: RequestId, reason: String },

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl DecodeError {
    /// The request id, when the message carried a usable one.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::InvalidRequest { id, .. } => Some(id),
            _ => None,
        }
    }
}

impl ClientMessage {
    /// Decodes one line of JSON.
    pub fn from_slice(line: &[u8]) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_slice(line).map_err(|e| DecodeError::Json(e.to_string()))?;
        Self::from_value(value)
    }

    /// Decodes an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(mut map) = value else {
            return Err(DecodeError::NotAnObject);
        };

        match map.remove("id") {
            None | Some(Value::Null) => serde_json::from_value(Value::Object(map))
                .map(ClientMessage::Command)
                .map_err(|e| DecodeError::InvalidCommand(e.to_string())),
            Some(raw_id) => {
                let id: RequestId =
                    serde_json::from_value(raw_id).map_err(|_| DecodeError::InvalidId)?;
                match serde_json::from_value(Value::Object(map)) {
                    Ok(kind) => Ok(ClientMessage::Request(Request { id, kind })),
                    Err(e) => Err(DecodeError::InvalidRequest {
                        id,
                        reason: e.to_string(),
                    }),
                }
            }
        }
    }

    /// Creates a request message.
    pub fn request(id: impl Into<RequestId>, kind: RequestKind) -> Self {
        Self::Request(Request {
            id: id.into(),
            kind,
        })
    }

    /// Creates an input command.
    pub fn input(client_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Command(Command::Input {
            client_id: ClientId::new(client_id),
            data: data.into(),
        })
    }

    /// Creates a resize command.
    pub fn resize(client_id: impl Into<String>, cols: u16, rows: u16) -> Self {
        Self::Command(Command::Resize {
            client_id: ClientId::new(client_id),
            cols,
            rows,
        })
    }

    /// Creates a detach command.
    pub fn detach(client_id: impl Into<String>) -> Self {
        Self::Command(Command::Detach {
            client_id: ClientId::new(client_id),
        })
    }
}

impl RequestKind {
    /// Creates an attach request body.
    pub fn attach(client_id: impl Into<String>, session: impl Into<String>, cols: u16, rows: u16) -> Self {
        Self::Attach {
            client_id: ClientId::new(client_id),
            session: session.into(),
            cols: Some(cols),
            rows: Some(rows),
        }
    }
}

// ============================================================================
// Daemon -> Client
// ============================================================================

/// Result payload of a response, flattened next to `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Error { error: String },
    Sessions { sessions: Vec<SessionInfo> },
    Attached { buffer: String, alive: bool },
    Shortcuts { shortcuts: Value },
    Name { name: SessionName },
    Ack { ok: bool },
}

impl ResponseBody {
    /// Creates an error body from anything displayable.
    pub fn error(err: impl fmt::Display) -> Self {
        Self::Error {
            error: err.to_string(),
        }
    }

    /// Creates `{ok: true}`.
    pub fn ok() -> Self {
        Self::Ack { ok: true }
    }
}

/// Response to a [`Request`]: `{id, ...body}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    pub fn new(id: RequestId, body: ResponseBody) -> Self {
        Self { id, body }
    }
}

/// Events pushed to every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BroadcastEvent {
    /// PTY output from a session
    Output { session: SessionName, data: String },

    /// A session's process ended
    Exit {
        session: SessionName,
        code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
    },

    /// A session was deleted
    SessionRemoved { session: SessionName },

    /// A session changed name
    #[serde(rename_all = "camelCase")]
    SessionRenamed {
        session: SessionName,
        new_name: SessionName,
    },
}

impl BroadcastEvent {
    /// The session this event concerns (the old name for renames).
    pub fn session(&self) -> &SessionName {
        match self {
            Self::Output { session, .. }
            | Self::Exit { session, .. }
            | Self::SessionRemoved { session }
            | Self::SessionRenamed { session, .. } => session,
        }
    }
}

/// Any message the daemon sends, as seen by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DaemonMessage {
    Event(BroadcastEvent),
    Response(Response),
}
