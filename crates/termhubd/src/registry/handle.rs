//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` is a cheap-to-clone interface for sending commands
//! to the registry actor. Connections and the server each hold a clone.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use termhub_core::{ClientId, SessionInfo, SessionName, TermSize};
use termhub_protocol::RequestId;
use tokio::sync::{mpsc, oneshot};

use super::commands::{AttachReply, Attached, RegistryCommand, RegistryError};
use crate::broadcaster::{ConnectionId, Outbound};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// All methods are async and communicate with the actor via channels.
/// Dropping every handle stops the actor.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Attach `client_id` to `session`, creating the session if needed.
    ///
    /// # Errors
    ///
    /// - `RegistryError::InvalidName`, `RegistryFull` or `Spawn`
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn attach(
        &self,
        client_id: ClientId,
        session: impl Into<String>,
        size: Option<TermSize>,
        connection: ConnectionId,
    ) -> Result<Attached, RegistryError> {
        let session = session.into();
        self.request(|tx| RegistryCommand::Attach {
            client_id,
            session,
            size,
            connection,
            reply: AttachReply::Caller(tx),
        })
        .await?
    }

    /// Attach on behalf of a connection.
    ///
    /// The actor writes the response (`{id, buffer, alive}` or
    /// `{id, error}`) straight onto the connection's outbound queue, so it
    /// is ordered before any output produced after the binding.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn attach_for_connection(
        &self,
        id: RequestId,
        client_id: ClientId,
        session: String,
        size: Option<TermSize>,
        connection: ConnectionId,
    ) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryCommand::Attach {
                client_id,
                session,
                size,
                connection,
                reply: AttachReply::Connection(id),
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)
    }

    /// Remove a client binding. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn detach(&self, client_id: ClientId) -> Result<bool, RegistryError> {
        self.request(|tx| RegistryCommand::Detach {
            client_id,
            respond_to: Some(tx),
        })
        .await
    }

    /// Fire-and-forget detach.
    pub async fn send_detach(&self, client_id: ClientId) {
        let _ = self
            .sender
            .send(RegistryCommand::Detach {
                client_id,
                respond_to: None,
            })
            .await;
    }

    /// Fire-and-forget keystroke delivery.
    pub async fn send_input(&self, client_id: ClientId, data: String) {
        let _ = self
            .sender
            .send(RegistryCommand::Input { client_id, data })
            .await;
    }

    /// Fire-and-forget resize.
    pub async fn send_resize(&self, client_id: ClientId, size: TermSize) {
        let _ = self
            .sender
            .send(RegistryCommand::Resize { client_id, size })
            .await;
    }

    /// Get all sessions, in creation order.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        self.request(|tx| RegistryCommand::ListSessions { respond_to: tx })
            .await
            .unwrap_or_default()
    }

    /// # Errors
    ///
    /// - `RegistryError::SessionAlreadyExists` if the name is taken
    /// - `RegistryError::InvalidName`, `RegistryFull` or `Spawn`
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn create_session(
        &self,
        name: impl Into<String>,
    ) -> Result<SessionName, RegistryError> {
        let name = name.into();
        self.request(|tx| RegistryCommand::CreateSession {
            name,
            respond_to: tx,
        })
        .await?
    }

    /// # Errors
    ///
    /// - `RegistryError::SessionNotFound` if the session doesn't exist
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn delete_session(&self, name: SessionName) -> Result<(), RegistryError> {
        self.request(|tx| RegistryCommand::DeleteSession {
            name,
            respond_to: tx,
        })
        .await?
    }

    /// # Errors
    ///
    /// - `RegistryError::SessionNotFound` if `old_name` doesn't exist
    /// - `RegistryError::SessionAlreadyExists` if `new_name` is taken
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn rename_session(
        &self,
        old_name: SessionName,
        new_name: impl Into<String>,
    ) -> Result<SessionName, RegistryError> {
        let new_name = new_name.into();
        self.request(|tx| RegistryCommand::RenameSession {
            old_name,
            new_name,
            respond_to: tx,
        })
        .await?
    }

    /// Start broadcasting to a connection's outbound queue.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register_connection(
        &self,
        connection: ConnectionId,
        outbound: Outbound,
    ) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryCommand::RegisterConnection {
                connection,
                outbound,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)
    }

    /// Forget a connection and its bindings. Fire-and-forget.
    pub async fn connection_closed(&self, connection: ConnectionId) {
        let _ = self
            .sender
            .send(RegistryCommand::ConnectionClosed { connection })
            .await;
    }

    /// Kill every alive session. Returns how many were killed.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn shutdown(&self) -> Result<usize, RegistryError> {
        self.request(|tx| RegistryCommand::Shutdown { respond_to: tx })
            .await
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
