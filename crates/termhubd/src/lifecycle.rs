//! Daemon lifecycle plumbing: state, socket probing, PID file.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Filesystem failures are returned or logged, never fatal here

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

/// How long a connect probe may take before the peer counts as alive.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Mode applied to the listening socket.
pub const SOCKET_MODE: u32 = 0o600;

// ============================================================================
// Daemon State
// ============================================================================

/// Lifecycle phases of a [`DaemonServer`](crate::server::DaemonServer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Idle,
    /// Checking whether another daemon owns the socket
    Probing,
    Listening,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Probing => "probing",
            Self::Listening => "listening",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Socket Probe
// ============================================================================

/// What currently occupies the socket path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketProbe {
    /// Nothing there
    Absent,
    /// A peer accepted (or did not refuse within [`PROBE_TIMEOUT`])
    Live,
    /// A socket file nobody is listening on
    Stale,
    /// Some other kind of file
    NotASocket,
}

/// Determines whether `path` is free, stale, or owned by a running daemon.
pub async fn probe_socket(path: &Path) -> SocketProbe {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return SocketProbe::Absent,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Socket stat failed");
            return SocketProbe::Stale;
        }
    };

    if !metadata.file_type().is_socket() {
        return SocketProbe::NotASocket;
    }

    match timeout(PROBE_TIMEOUT, UnixStream::connect(path)).await {
        Ok(Ok(_stream)) => SocketProbe::Live,
        Ok(Err(e)) => {
            debug!(path = %path.display(), error = %e, "Socket probe refused");
            SocketProbe::Stale
        }
        // A listener too busy to accept is still a listener
        Err(_) => SocketProbe::Live,
    }
}

/// Restricts the socket to its owner.
pub fn restrict_permissions(path: &Path) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))
}

// ============================================================================
// PID File
// ============================================================================

/// PID file of the running daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current process id, creating parent directories.
    pub fn write(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&self.path)?;
        write!(file, "{}", process::id())
    }

    /// Reads the PID, if the file exists and holds a number.
    pub fn read(&self) -> Option<u32> {
        let mut file = File::open(&self.path).ok()?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).ok()?;
        contents.trim().parse().ok()
    }

    pub fn remove(&self) {
        let _ = fs::remove_file(&self.path);
    }

    /// PID of a running daemon. A stale file is removed.
    pub fn running_pid(&self) -> Option<u32> {
        let pid = self.read()?;
        if is_process_running(pid) {
            return Some(pid);
        }
        self.remove();
        None
    }
}

/// Checks if a process with the given PID is running.
pub fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}
