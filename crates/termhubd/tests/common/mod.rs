//! Shared helpers for the daemon integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`; the panic-free policy covers
//! production code only.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use termhub_protocol::{encode_line, ClientMessage};
use termhubd::config::DaemonConfig;
use termhubd::lifecycle::{DaemonState, PidFile};
use termhubd::process_tree::ChildProbe;
use termhubd::registry::{spawn_registry, RegistryHandle, RegistrySettings};
use termhubd::server::{DaemonServer, ServerError};
use termhubd::shortcuts::ShortcutStore;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
pub const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between socket existence checks
pub const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on any single wait for daemon output
pub const RECV_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Test Server
// ============================================================================

/// Daemon configuration rooted in `dir`, running `/bin/sh`.
pub fn test_config(dir: &TempDir) -> DaemonConfig {
    DaemonConfig {
        socket_path: dir.path().join("test.sock"),
        pid_file: dir.path().join("termhubd.pid"),
        shell: Some("/bin/sh".to_string()),
        working_dir: Some(dir.path().to_path_buf()),
        data_dir: dir.path().join("data"),
        ..DaemonConfig::default()
    }
}

/// Builds a server for `config` without running it.
pub fn build_server(
    config: &DaemonConfig,
    cancel_token: CancellationToken,
) -> (DaemonServer, RegistryHandle) {
    let registry = spawn_registry(RegistrySettings::from_config(config));
    let server = DaemonServer::new(
        &config.socket_path,
        registry.clone(),
        ShortcutStore::new(&config.data_dir),
        cancel_token,
    )
    .with_pid_file(PidFile::new(&config.pid_file))
    .with_child_probe(ChildProbe::new(config.child_probe_timeout()));
    (server, registry)
}

/// Running daemon that lives in its own temp directory.
pub struct TestServer {
    pub config: DaemonConfig,
    pub registry: RegistryHandle,
    pub state: watch::Receiver<DaemonState>,
    cancel_token: CancellationToken,
    task: JoinHandle<Result<(), ServerError>>,
    _temp_dir: TempDir,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawns a server after letting `configure` adjust the config.
    pub async fn spawn_with(configure: impl FnOnce(&mut DaemonConfig)) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let mut config = test_config(&temp_dir);
        configure(&mut config);

        let cancel_token = CancellationToken::new();
        let (server, registry) = build_server(&config, cancel_token.clone());
        let state = server.state();

        let task = tokio::spawn(async move { server.run().await });

        wait_for_socket(&config.socket_path).await;

        Self {
            config,
            registry,
            state,
            cancel_token,
            task,
            _temp_dir: temp_dir,
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.config.socket_path
    }

    pub async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(self.socket_path())
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Cancels the server and waits for `run()` to return.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        self.cancel_token.cancel();
        timeout(RECV_TIMEOUT, self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

/// Polls until `path` exists.
pub async fn wait_for_socket(path: &PathBuf) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < SOCKET_WAIT_TIMEOUT {
        if path.exists() {
            // The PID file follows the bind; give the server a moment
            sleep(SOCKET_POLL_INTERVAL).await;
            return;
        }
        sleep(SOCKET_POLL_INTERVAL).await;
    }
    panic!("Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}");
}

// ============================================================================
// Test Client
// ============================================================================

/// Front-end connection speaking raw JSON lines.
pub struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    pub async fn send_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send_json(&mut self, value: Value) {
        let mut line = serde_json::to_vec(&value).unwrap();
        line.push(b'\n');
        self.send_raw(&line).await;
    }

    pub async fn send(&mut self, msg: &ClientMessage) {
        let line = encode_line(msg).unwrap();
        self.send_raw(line.as_bytes()).await;
    }

    /// Next line from the daemon, parsed.
    pub async fn recv(&mut self) -> Value {
        let line = timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for daemon")
            .unwrap()
            .expect("daemon closed the connection");
        serde_json::from_str(&line).unwrap()
    }

    /// Skips lines until one satisfies `pred`.
    pub async fn recv_until(&mut self, mut pred: impl FnMut(&Value) -> bool) -> Value {
        loop {
            let msg = self.recv().await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    /// Sends a request and returns its response, skipping broadcasts.
    pub async fn request(&mut self, request: Value) -> Value {
        let id = request["id"].clone();
        assert!(!id.is_null(), "request needs an id");
        self.send_json(request).await;
        self.recv_until(|msg| msg["id"] == id).await
    }

    /// Accumulates `output` data for `session` until it contains `needle`.
    pub async fn output_until(&mut self, session: &str, needle: &str) -> String {
        let mut seen = String::new();
        while !seen.contains(needle) {
            let msg = self
                .recv_until(|m| m["type"] == "output" && m["session"] == session)
                .await;
            seen.push_str(msg["data"].as_str().unwrap());
        }
        seen
    }

    pub async fn attach(&mut self, id: u64, client_id: &str, session: &str) -> Value {
        self.request(json!({
            "id": id,
            "type": "attach",
            "clientId": client_id,
            "session": session,
            "cols": 80,
            "rows": 24,
        }))
        .await
    }

    pub async fn input(&mut self, client_id: &str, data: &str) {
        self.send(&ClientMessage::input(client_id, data)).await;
    }

    /// True if the daemon closed the stream (EOF) within `wait`.
    pub async fn is_closed_within(&mut self, wait: Duration) -> bool {
        matches!(timeout(wait, self.lines.next_line()).await, Ok(Ok(None)) | Ok(Err(_)))
    }
}
