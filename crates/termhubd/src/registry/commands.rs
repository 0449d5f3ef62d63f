//! Registry actor commands and errors.
//!
//! - `RegistryCommand`: messages sent to the actor
//! - `RegistryError`: failures returned to callers
//! - `Attached`: result of an attach

use termhub_core::{ClientId, DomainError, SessionInfo, SessionName, TermSize};
use termhub_protocol::RequestId;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::broadcaster::{ConnectionId, Outbound};
use crate::session::SessionError;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Request-style commands carry a oneshot `respond_to`; the keystroke path
/// (`Input`, `Resize`) is fire-and-forget.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Get-or-create `session` and bind `client_id` to it.
    ///
    /// # Errors
    /// - `RegistryError::InvalidName` if the name is not usable
    /// - `RegistryError::RegistryFull` if a new session would exceed the cap
    /// - `RegistryError::Spawn` if the process could not be started
    Attach {
        client_id: ClientId,
        session: String,
        /// Client viewport; `None` keeps the current or default size
        size: Option<TermSize>,
        connection: ConnectionId,
        reply: AttachReply,
    },

    /// Remove the binding for `client_id`.
    Detach {
        client_id: ClientId,
        /// `None` for the fire-and-forget command form
        respond_to: Option<oneshot::Sender<bool>>,
    },

    /// Write to the session bound to `client_id`. Dropped if unbound or dead.
    Input { client_id: ClientId, data: String },

    /// Resize the session bound to `client_id`. No-op if unbound or dead.
    Resize { client_id: ClientId, size: TermSize },

    /// Snapshot of every session, in creation order.
    ListSessions {
        respond_to: oneshot::Sender<Vec<SessionInfo>>,
    },

    /// # Errors
    /// - `RegistryError::SessionAlreadyExists` if the name is taken
    /// - `RegistryError::RegistryFull`, `InvalidName`, `Spawn`
    CreateSession {
        name: String,
        respond_to: oneshot::Sender<Result<SessionName, RegistryError>>,
    },

    /// Kill (if alive) and remove a session, dropping its bindings.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound` if no session has this name
    DeleteSession {
        name: SessionName,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// # Errors
    /// - `RegistryError::SessionNotFound` if `old_name` is unknown
    /// - `RegistryError::SessionAlreadyExists` if `new_name` is taken
    /// - `RegistryError::InvalidName` if `new_name` is not usable
    RenameSession {
        old_name: SessionName,
        new_name: String,
        respond_to: oneshot::Sender<Result<SessionName, RegistryError>>,
    },

    /// Start delivering broadcasts to a connection.
    RegisterConnection {
        connection: ConnectionId,
        outbound: Outbound,
    },

    /// Forget a connection and every binding it created.
    ConnectionClosed { connection: ConnectionId },

    /// Kill every alive session. Responds with how many were killed.
    Shutdown { respond_to: oneshot::Sender<usize> },
}

/// Where the actor delivers an attach result.
#[derive(Debug)]
pub enum AttachReply {
    /// Enqueue `{id, buffer, alive}` (or `{id, error}`) on the attaching
    /// connection's outbound queue, ahead of any later output.
    Connection(RequestId),

    /// Hand the result back to the caller.
    Caller(oneshot::Sender<Result<Attached, RegistryError>>),
}

/// Outcome of a successful attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attached {
    pub session: SessionName,
    /// Replay history at the moment of binding
    pub buffer: String,
    pub alive: bool,
    /// Whether this attach created the session
    pub created: bool,
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("session limit reached (max: {max} sessions)")]
    RegistryFull { max: usize },

    #[error("session not found: {0}")]
    SessionNotFound(SessionName),

    #[error("session already exists: {0}")]
    SessionAlreadyExists(SessionName),

    #[error(transparent)]
    InvalidName(#[from] DomainError),

    #[error("failed to start session: {0}")]
    Spawn(#[from] SessionError),

    /// The actor has shut down.
    #[error("response channel closed")]
    ChannelClosed,
}
