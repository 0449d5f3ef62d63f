//! Unix socket server for the termhub daemon.
//!
//! The server:
//! - Refuses to start when another daemon answers on the socket
//! - Replaces a stale socket file left by a crashed daemon
//! - Spawns a ConnectionHandler for each front-end connection
//! - On cancellation, kills every session and removes its files
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   DaemonServer  │
//! │                 │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐  RegistryCommand  ┌─────────────────┐
//! │ConnectionHandler│──────────────────▶│  RegistryActor  │
//! │ (per connection)│◀──────────────────│  (Broadcaster)  │
//! └─────────────────┘  outbound queue   └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broadcaster::ConnectionId;
use crate::config::DEFAULT_CHILD_PROBE_TIMEOUT_MS;
use crate::lifecycle::{probe_socket, restrict_permissions, DaemonState, PidFile, SocketProbe};
use crate::process_tree::ChildProbe;
use crate::registry::RegistryHandle;
use crate::shortcuts::ShortcutStore;

pub use crate::config::DEFAULT_SOCKET_PATH;

/// Unix socket server for the termhub daemon.
pub struct DaemonServer {
    /// Path to the Unix socket
    socket_path: PathBuf,

    /// Handle to the session registry
    registry: RegistryHandle,

    shortcuts: ShortcutStore,

    child_probe: ChildProbe,

    /// Written after bind, removed on shutdown
    pid_file: Option<PidFile>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating connection IDs
    connection_counter: AtomicU64,

    state: watch::Sender<DaemonState>,
}

impl DaemonServer {
    /// Creates a new daemon server.
    ///
    /// # Arguments
    ///
    /// * `socket_path` - Path where the Unix socket will be created
    /// * `registry` - Handle to the session registry
    /// * `shortcuts` - Store answering the shortcuts requests
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(
        socket_path: impl Into<PathBuf>,
        registry: RegistryHandle,
        shortcuts: ShortcutStore,
        cancel_token: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(DaemonState::Idle);
        Self {
            socket_path: socket_path.into(),
            registry,
            shortcuts,
            child_probe: ChildProbe::new(Duration::from_millis(DEFAULT_CHILD_PROBE_TIMEOUT_MS)),
            pid_file: None,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            state,
        }
    }

    /// Writes (and later removes) a PID file.
    pub fn with_pid_file(mut self, pid_file: PidFile) -> Self {
        self.pid_file = Some(pid_file);
        self
    }

    pub fn with_child_probe(mut self, child_probe: ChildProbe) -> Self {
        self.child_probe = child_probe;
        self
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Watches lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: DaemonState) {
        self.state.send_replace(state);
    }

    /// Runs the server.
    ///
    /// Listens for connections until the cancellation token is triggered,
    /// then kills every session and removes the socket and PID files.
    ///
    /// # Errors
    ///
    /// - `ServerError::AlreadyRunning` if another daemon answers on the socket
    /// - `ServerError::SocketSetup` if the socket cannot be created
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                self.set_state(DaemonState::Terminated);
                return Err(e);
            }
        };

        if let Some(pid_file) = &self.pid_file {
            if let Err(e) = pid_file.write() {
                warn!(
                    path = %pid_file.path().display(),
                    error = %e,
                    "Failed to write PID file"
                );
            }
        }

        self.set_state(DaemonState::Listening);
        info!(
            socket = %self.socket_path.display(),
            "Daemon server listening"
        );

        // Accept connections until cancelled
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let n = self.connection_counter.fetch_add(1, Ordering::Relaxed) + 1;
                            self.handle_connection(stream, ConnectionId::new(n));
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.set_state(DaemonState::ShuttingDown);
        drop(listener);
        self.cleanup().await;
        self.set_state(DaemonState::Terminated);
        Ok(())
    }

    /// Probes the socket path, clears a stale socket, binds and restricts
    /// permissions.
    async fn bind(&self) -> Result<UnixListener, ServerError> {
        let setup_err = |error: String| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error,
        };

        self.set_state(DaemonState::Probing);
        match probe_socket(&self.socket_path).await {
            SocketProbe::Absent => {}
            SocketProbe::Live => {
                return Err(ServerError::AlreadyRunning {
                    path: self.socket_path.clone(),
                });
            }
            SocketProbe::Stale => {
                warn!(
                    socket = %self.socket_path.display(),
                    "Removing stale socket"
                );
                std::fs::remove_file(&self.socket_path).map_err(|e| setup_err(e.to_string()))?;
            }
            SocketProbe::NotASocket => {
                return Err(setup_err("path exists and is not a socket".to_string()));
            }
        }

        // Create parent directory if needed
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| setup_err(e.to_string()))?;
            }
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| setup_err(e.to_string()))?;

        if let Err(e) = restrict_permissions(&self.socket_path) {
            let _ = std::fs::remove_file(&self.socket_path);
            return Err(setup_err(format!("failed to restrict permissions: {e}")));
        }

        Ok(listener)
    }

    /// Handles a new connection by spawning a handler task.
    fn handle_connection(&self, stream: tokio::net::UnixStream, id: ConnectionId) {
        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            id,
            reader,
            writer,
            self.registry.clone(),
            self.shortcuts.clone(),
            self.child_probe.clone(),
            self.cancel_token.child_token(),
        );

        tokio::spawn(handler.run());
    }

    /// Performs cleanup on shutdown.
    async fn cleanup(&self) {
        match self.registry.shutdown().await {
            Ok(killed) => info!(killed, "Sessions terminated"),
            Err(e) => warn!(error = %e, "Registry unavailable during shutdown"),
        }

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        if let Some(pid_file) = &self.pid_file {
            pid_file.remove();
        }

        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Another daemon is already listening on {path}")]
    AlreadyRunning { path: PathBuf },

    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}
