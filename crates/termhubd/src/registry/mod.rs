//! Session registry using the Actor pattern.
//!
//! The registry is the single owner of every session, every client binding
//! and every connection's outbound queue. It receives commands from
//! connections over an mpsc channel and PTY events from session I/O threads
//! over a second channel, and applies both one at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  RegistryCommand   ┌─────────────────┐   lines    ┌─────────────────┐
//! │   Connections   │───────────────────▶│  RegistryActor  │───────────▶│ Outbound queues │
//! └─────────────────┘   (mpsc channel)   └─────────────────┘ (Broadcaster)└─────────────────┘
//!                                                ▲
//!                                                │ PtyEvent (mpsc channel)
//!                                        ┌─────────────────┐
//!                                        │ PTY I/O threads │
//!                                        └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;

use termhub_core::{BufferLimits, TermSize};

use crate::config::DaemonConfig;
use crate::session::{EnvDenylist, SpawnOptions};

mod actor;
mod bindings;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use bindings::{Binding, Bindings};
pub use commands::{AttachReply, Attached, RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const PTY_EVENT_BUFFER: usize = 256;

/// What the registry needs to create and manage sessions.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub max_sessions: usize,
    pub buffer: BufferLimits,
    /// Template for new sessions; `size` is the default size
    pub spawn: SpawnOptions,
}

impl RegistrySettings {
    /// Builds settings from the daemon configuration, snapshotting the
    /// daemon's environment through the configured denylist.
    pub fn from_config(config: &DaemonConfig) -> Self {
        let denylist = EnvDenylist::new(&config.env_denylist);
        let mut spawn = SpawnOptions::new(config.shell(), config.working_dir(), &denylist);
        spawn.args = config.shell_args.clone();
        spawn.size = config.default_size();

        Self {
            max_sessions: config.max_sessions,
            buffer: config.buffer,
            spawn,
        }
    }

    pub fn default_size(&self) -> TermSize {
        self.spawn.size
    }
}

/// Spawn the registry actor and return a handle for interaction.
///
/// The actor runs until every handle is dropped.
///
/// # Example
///
/// ```no_run
/// use termhubd::config::DaemonConfig;
/// use termhubd::registry::{spawn_registry, RegistrySettings};
///
/// #[tokio::main]
/// async fn main() {
///     let settings = RegistrySettings::from_config(&DaemonConfig::default());
///     let handle = spawn_registry(settings);
///
///     let sessions = handle.list_sessions().await;
///     assert!(sessions.is_empty());
/// }
/// ```
pub fn spawn_registry(settings: RegistrySettings) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx, mpsc::channel(PTY_EVENT_BUFFER), settings);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
