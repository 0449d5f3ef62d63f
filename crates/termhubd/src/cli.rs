//! Command-line entry point shared by the `termhubd` binaries.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! termhubd start
//!
//! # Start the daemon (background/daemonized)
//! termhubd start -d
//!
//! # Stop the daemon
//! termhubd stop
//!
//! # List sessions of the running daemon
//! termhubd status
//!
//! # Start with a custom socket path
//! TERMHUB_SOCKET=/run/user/1000/termhub.sock termhubd start
//!
//! # Enable debug logging
//! RUST_LOG=termhubd=debug termhubd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown (sessions are killed, socket and
//!   PID file removed)

use std::fs::{self, File};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use termhub_core::SessionInfo;
use termhub_protocol::{
    encode_line, ClientMessage, DaemonMessage, RequestId, RequestKind, ResponseBody,
};

use crate::config::{log_file_path, DaemonConfig};
use crate::lifecycle::{is_process_running, PidFile};
use crate::process_tree::ChildProbe;
use crate::registry::{spawn_registry, RegistrySettings};
use crate::server::DaemonServer;
use crate::shortcuts::ShortcutStore;

/// How long `status` waits for the daemon to answer.
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// termhub daemon - long-lived PTY sessions behind a Unix socket
#[derive(Parser, Debug)]
#[command(name = "termhubd", version, about)]
pub struct Args {
    /// Config file (default: <config dir>/termhub/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Socket path, overriding config and environment
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status and sessions
    Status,
}

/// Parses arguments and runs the selected command.
pub fn run() -> Result<()> {
    let args = Args::parse();

    let mut config =
        DaemonConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    let pid_file = PidFile::new(&config.pid_file);

    // Default to 'start' if no subcommand given
    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            if let Some(pid) = pid_file.running_pid() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'termhubd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                // Daemonize before starting tokio runtime
                daemonize()?;
            }

            run_daemon(config)
        }
        Command::Stop => {
            let Some(pid) = pid_file.running_pid() else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {pid})...");
            stop_daemon(pid)?;

            // Wait for process to exit (up to 5 seconds)
            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(100));
            }

            eprintln!("Daemon did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => {
            if let Some(pid) = pid_file.running_pid() {
                println!("Daemon is running (PID {pid})");
            }
            match run_status(config.socket_path.clone()) {
                Ok(sessions) => {
                    println!("Socket: {}", config.socket_path.display());
                    print_sessions(&sessions);
                    Ok(())
                }
                Err(e) => {
                    println!("Daemon is not reachable: {e:#}");
                    process::exit(1);
                }
            }
        }
    }
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: u32) -> Result<()> {
    let pid = i32::try_from(pid).context("PID out of range")?;
    // SAFETY: kill(2) has no memory-safety preconditions
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    // Ensure log directory exists
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("termhubd=info".parse()?)
                .add_directive("termhub_core=info".parse()?)
                .add_directive("termhub_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "termhub daemon starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry(RegistrySettings::from_config(&config));
    info!(
        shell = %config.shell(),
        max_sessions = config.max_sessions,
        "Session registry started"
    );

    let server = DaemonServer::new(
        &config.socket_path,
        registry,
        ShortcutStore::new(&config.data_dir),
        cancel_token,
    )
    .with_pid_file(PidFile::new(&config.pid_file))
    .with_child_probe(ChildProbe::new(config.child_probe_timeout()));

    info!(socket = %config.socket_path.display(), "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("termhub daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}

/// Asks the running daemon for its session list.
#[tokio::main(flavor = "current_thread")]
async fn run_status(socket_path: PathBuf) -> Result<Vec<SessionInfo>> {
    timeout(STATUS_TIMEOUT, query_sessions(socket_path))
        .await
        .context("Timed out waiting for the daemon")?
}

async fn query_sessions(socket_path: PathBuf) -> Result<Vec<SessionInfo>> {
    let stream = UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
    let (reader, mut writer) = stream.into_split();

    let request_id = RequestId::from("status");
    let line = encode_line(&ClientMessage::request(
        request_id.clone(),
        RequestKind::ListSessions,
    ))?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        // Broadcast events for other sessions may arrive first
        let Ok(DaemonMessage::Response(response)) = serde_json::from_str(&line) else {
            continue;
        };
        if response.id != request_id {
            continue;
        }
        return match response.body {
            ResponseBody::Sessions { sessions } => Ok(sessions),
            ResponseBody::Error { error } => bail!("Daemon error: {error}"),
            other => bail!("Unexpected response: {other:?}"),
        };
    }

    bail!("Daemon closed the connection")
}

fn print_sessions(sessions: &[SessionInfo]) {
    if sessions.is_empty() {
        println!("No sessions.");
        return;
    }

    println!("Sessions: {}", sessions.len());
    for s in sessions {
        let state = match (s.alive, s.exit_code, &s.exit_signal) {
            (true, _, _) => "running".to_string(),
            (false, _, Some(signal)) => format!("killed ({signal})"),
            (false, Some(code), None) => format!("exited ({code})"),
            (false, None, None) => "exited".to_string(),
        };
        let pid = s.pid.map_or_else(|| "-".to_string(), |p| p.to_string());
        println!(
            "  {:<24} pid {:<8} {:<16} {}x{}  clients {}",
            s.name.as_str(),
            pid,
            state,
            s.cols,
            s.rows,
            s.clients
        );
    }
}
