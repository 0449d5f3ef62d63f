//! PTY-backed sessions.
//!
//! A [`Session`] owns one child process running on a pseudo-terminal plus
//! its replay history. Process output and exit are not delivered through
//! callbacks: the session's I/O threads send typed [`PtyEvent`]s, tagged
//! with the session's immutable [`SessionKey`], to the registry actor,
//! which applies them in arrival order.

mod env;
mod io;

pub use env::EnvDenylist;
pub use io::{Utf8Decoder, EXIT_DRAIN_TIMEOUT};

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;

use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use termhub_core::{BufferLimits, ExitInfo, RingBuffer, SessionInfo, SessionName, TermSize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Stable internal identity of a session.
///
/// Names change on rename; keys never do, so events already in flight
/// still find their session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(u64);

impl SessionKey {
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event produced by a session's I/O threads.
#[derive(Debug, Clone, PartialEq)]
pub enum PtyEvent {
    /// Decoded output, in PTY read order
    Data { key: SessionKey, chunk: String },

    /// The child exited; sent once per spawned process, after all output
    Exit { key: SessionKey, status: ExitInfo },
}

impl PtyEvent {
    pub fn key(&self) -> SessionKey {
        match self {
            Self::Data { key, .. } | Self::Exit { key, .. } => *key,
        }
    }
}

/// How to start a session's process.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Complete environment of the child (already filtered)
    pub env: Vec<(OsString, OsString)>,
    pub size: TermSize,
}

impl SpawnOptions {
    /// Options for `program` with the current environment filtered through
    /// `denylist`.
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>, denylist: &EnvDenylist) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: denylist.filter_current(),
            size: TermSize::default(),
        }
    }

    fn command(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        cmd.cwd(&self.cwd);
        cmd.env_clear();
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd
    }
}

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Errors from session operations.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Failed to open PTY: {0}")]
    OpenPty(String),

    #[error("Failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Failed to start PTY thread: {0}")]
    Thread(String),

    /// The process has exited or was killed.
    #[error("Session is not alive")]
    NotAlive,

    #[error("Failed to resize PTY: {0}")]
    Resize(String),
}

/// One PTY-backed child process and its replay history.
pub struct Session {
    key: SessionKey,
    name: SessionName,
    pid: Option<u32>,
    alive: bool,
    exit: Option<ExitInfo>,
    buffer: RingBuffer,
    size: TermSize,
    created_at: DateTime<Utc>,
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    input: std_mpsc::Sender<Vec<u8>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("alive", &self.alive)
            .field("exit", &self.exit)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Opens a PTY, starts the process, and starts its I/O threads.
    ///
    /// Output and exit are reported on `events`.
    pub fn spawn(
        key: SessionKey,
        name: SessionName,
        options: &SpawnOptions,
        limits: BufferLimits,
        events: mpsc::Sender<PtyEvent>,
    ) -> Result<Self, SessionError> {
        let pair = native_pty_system()
            .openpty(pty_size(options.size))
            .map_err(|e| SessionError::OpenPty(e.to_string()))?;

        let mut child = pair
            .slave
            .spawn_command(options.command())
            .map_err(|e| SessionError::Spawn {
                program: options.program.clone(),
                reason: e.to_string(),
            })?;
        // The child holds its own copy; ours would keep the reader from
        // seeing EOF after exit
        drop(pair.slave);

        let pid = child.process_id();
        let mut killer = child.clone_killer();

        let io_handles = pair
            .master
            .try_clone_reader()
            .and_then(|reader| pair.master.take_writer().map(|writer| (reader, writer)));
        let (reader, writer) = match io_handles {
            Ok(handles) => handles,
            Err(e) => {
                let _ = child.kill();
                return Err(SessionError::OpenPty(e.to_string()));
            }
        };

        let (input_tx, input_rx) = std_mpsc::channel();
        let (done_tx, done_rx) = std_mpsc::channel();

        let started = io::spawn_reader(key, reader, events.clone(), done_tx)
            .and_then(|()| io::spawn_writer(key, writer, input_rx))
            .and_then(|()| io::spawn_waiter(key, child, events, done_rx));
        if let Err(e) = started {
            let _ = killer.kill();
            return Err(SessionError::Thread(e.to_string()));
        }

        info!(
            session = %name,
            session_key = %key,
            pid = ?pid,
            program = %options.program,
            size = %options.size,
            "Session spawned"
        );

        Ok(Self {
            key,
            name,
            pid,
            alive: true,
            exit: None,
            buffer: RingBuffer::with_limits(limits),
            size: options.size,
            created_at: Utc::now(),
            master: pair.master,
            killer,
            input: input_tx,
        })
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn name(&self) -> &SessionName {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: SessionName) {
        self.name = name;
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Exit details, once the process has been reaped.
    pub fn exit(&self) -> Option<&ExitInfo> {
        self.exit.as_ref()
    }

    pub fn size(&self) -> TermSize {
        self.size
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn buffer(&self) -> &RingBuffer {
        &self.buffer
    }

    /// The replay text sent to a newly attached client.
    pub fn replay(&self) -> String {
        self.buffer.contents()
    }

    /// Records process output in the replay history.
    pub fn push_output(&mut self, chunk: &str) {
        self.buffer.push(chunk);
    }

    /// Records the process exit. Returns false if one was already recorded.
    pub fn record_exit(&mut self, status: ExitInfo) -> bool {
        self.alive = false;
        if self.exit.is_some() {
            return false;
        }
        self.exit = Some(status);
        true
    }

    /// Queues bytes for the process.
    pub fn write(&self, bytes: &[u8]) -> Result<(), SessionError> {
        if !self.alive {
            return Err(SessionError::NotAlive);
        }
        self.input
            .send(bytes.to_vec())
            .map_err(|_| SessionError::NotAlive)
    }

    /// Resizes the terminal. Does nothing once the process is dead.
    pub fn resize(&mut self, size: TermSize) -> Result<(), SessionError> {
        if !self.alive {
            return Ok(());
        }
        self.master
            .resize(pty_size(size))
            .map_err(|e| SessionError::Resize(e.to_string()))?;
        self.size = size;
        Ok(())
    }

    /// Terminates the process.
    ///
    /// Returns false if the session was already dead. The exit event still
    /// comes from the waiter thread, so it is reported exactly once.
    pub fn kill(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        self.alive = false;
        if let Err(e) = self.killer.kill() {
            // Usually the process exited on its own a moment ago
            debug!(session = %self.name, error = %e, "Kill failed");
        }
        info!(session = %self.name, pid = ?self.pid, "Session killed");
        true
    }

    /// Listing view. `clients` is the number of bindings to this session.
    pub fn info(&self, clients: usize) -> SessionInfo {
        SessionInfo {
            name: self.name.clone(),
            pid: self.pid,
            alive: self.alive,
            exit_code: self.exit.as_ref().and_then(|e| e.code),
            exit_signal: self.exit.as_ref().and_then(|e| e.signal.clone()),
            clients,
            cols: self.size.cols,
            rows: self.size.rows,
            created_at: self.created_at,
            has_child_processes: None,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.alive {
            let _ = self.killer.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(10);

    fn sh_options() -> SpawnOptions {
        SpawnOptions {
            program: "/bin/sh".to_string(),
            args: Vec::new(),
            cwd: std::env::temp_dir(),
            env: vec![(OsString::from("PATH"), OsString::from("/usr/bin:/bin"))],
            size: TermSize::new(80, 24),
        }
    }

    fn spawn_sh(name: &str) -> (Session, mpsc::Receiver<PtyEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let session = Session::spawn(
            SessionKey::new(1),
            SessionName::new(name),
            &sh_options(),
            BufferLimits::default(),
            tx,
        )
        .unwrap();
        (session, rx)
    }

    /// Collects events until the channel closes.
    async fn drain(rx: &mut mpsc::Receiver<PtyEvent>) -> Vec<PtyEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = timeout(WAIT, rx.recv()).await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_spawn_options_command_sets_terminal_env() {
        let cmd = sh_options().command();
        assert_eq!(cmd.get_env("TERM"), Some(std::ffi::OsStr::new("xterm-256color")));
        assert_eq!(cmd.get_env("COLORTERM"), Some(std::ffi::OsStr::new("truecolor")));
        assert_eq!(cmd.get_env("PATH"), Some(std::ffi::OsStr::new("/usr/bin:/bin")));
        assert!(cmd.get_env("HOME").is_none());
    }

    #[tokio::test]
    async fn test_output_and_exit() {
        let (mut session, mut rx) = spawn_sh("echo");
        assert!(session.is_alive());
        assert!(session.pid().is_some());

        session.write(b"echo termhub-ok; exit 3\n").unwrap();

        let events = drain(&mut rx).await;
        let output: String = events
            .iter()
            .filter_map(|e| match e {
                PtyEvent::Data { chunk, .. } => Some(chunk.as_str()),
                _ => None,
            })
            .collect();
        assert!(output.contains("termhub-ok"), "output was {output:?}");

        let exits: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PtyEvent::Exit { status, .. } => Some(status.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].code, Some(3));
        assert!(matches!(events.last(), Some(PtyEvent::Exit { .. })));

        assert!(session.record_exit(exits[0].clone()));
        assert!(!session.is_alive());
        assert_eq!(session.info(0).exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_kill_is_idempotent_and_exit_fires_once() {
        let (mut session, mut rx) = spawn_sh("victim");

        assert!(session.kill());
        assert!(!session.kill());

        assert!(matches!(session.write(b"ls\n"), Err(SessionError::NotAlive)));
        assert!(session.resize(TermSize::new(100, 30)).is_ok());

        let events = drain(&mut rx).await;
        let exits = events
            .iter()
            .filter(|e| matches!(e, PtyEvent::Exit { .. }))
            .count();
        assert_eq!(exits, 1);
    }

    #[tokio::test]
    async fn test_killed_shell_exits_by_signal_without_code() {
        let (mut session, mut rx) = spawn_sh("hup");
        assert!(session.kill());

        let status = drain(&mut rx)
            .await
            .into_iter()
            .find_map(|e| match e {
                PtyEvent::Exit { status, .. } => Some(status),
                _ => None,
            })
            .unwrap();
        assert_eq!(status.code, None);
        assert!(status.signal.is_some());
    }

    #[tokio::test]
    async fn test_record_exit_only_once() {
        let (mut session, _rx) = spawn_sh("twice");
        session.kill();

        assert!(session.record_exit(ExitInfo {
            code: None,
            signal: Some("Hangup".into()),
        }));
        assert!(!session.record_exit(ExitInfo::default()));
        assert_eq!(session.exit().and_then(|e| e.signal.as_deref()), Some("Hangup"));
    }

    #[tokio::test]
    async fn test_resize_updates_size() {
        let (mut session, _rx) = spawn_sh("sized");
        session.resize(TermSize::new(120, 40)).unwrap();
        assert_eq!(session.size(), TermSize::new(120, 40));

        let info = session.info(2);
        assert_eq!((info.cols, info.rows, info.clients), (120, 40, 2));
        session.kill();
    }

    #[test]
    fn test_spawn_failure_reports_program() {
        let (tx, _rx) = mpsc::channel(4);
        let options = SpawnOptions {
            program: "/nonexistent/termhub-shell".to_string(),
            ..sh_options()
        };
        let err = Session::spawn(
            SessionKey::new(9),
            SessionName::new("bad"),
            &options,
            BufferLimits::default(),
            tx,
        )
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/termhub-shell"));
    }
}
