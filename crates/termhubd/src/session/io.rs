//! Blocking PTY I/O threads.
//!
//! portable-pty exposes plain `Read`/`Write` handles, so each session runs
//! three OS threads that bridge them to the registry's async channel:
//!
//! - reader: PTY output -> [`PtyEvent::Data`]
//! - writer: input queue -> PTY
//! - waiter: child exit -> [`PtyEvent::Exit`], sent exactly once

use std::io::{Read, Write};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use portable_pty::Child;
use termhub_core::ExitInfo;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{PtyEvent, SessionKey};

/// Read size for one PTY read.
const READ_CHUNK: usize = 8 * 1024;

/// How long the waiter lets the reader drain trailing output before
/// reporting the exit.
pub const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Streaming UTF-8 decoder.
///
/// Multi-byte sequences split across reads are carried over to the next
/// call; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `pending + input` as possible.
    pub fn decode(&mut self, input: &[u8]) -> String {
        self.pending.extend_from_slice(input);
        let bytes = std::mem::take(&mut self.pending);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = after.get(len..).unwrap_or_default();
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes any incomplete trailing sequence.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

/// Reads PTY output until EOF or error, then signals `done`.
pub(super) fn spawn_reader(
    key: SessionKey,
    mut reader: Box<dyn Read + Send>,
    events: mpsc::Sender<PtyEvent>,
    done: std_mpsc::Sender<()>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-reader-{key}"))
        .spawn(move || {
            let mut decoder = Utf8Decoder::new();
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO once the slave side is gone is the normal end
                        trace!(session_key = %key, error = %e, "PTY read ended");
                        break;
                    }
                };
                let chunk = decoder.decode(buf.get(..n).unwrap_or_default());
                if chunk.is_empty() {
                    continue;
                }
                if events.blocking_send(PtyEvent::Data { key, chunk }).is_err() {
                    // Registry gone
                    let _ = done.send(());
                    return;
                }
            }

            let tail = decoder.finish();
            if !tail.is_empty() {
                let _ = events.blocking_send(PtyEvent::Data { key, chunk: tail });
            }
            let _ = done.send(());
        })
        .map(|_| ())
}

/// Drains the input queue into the PTY until the queue closes or a write
/// fails.
pub(super) fn spawn_writer(
    key: SessionKey,
    mut writer: Box<dyn Write + Send>,
    input: std_mpsc::Receiver<Vec<u8>>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-writer-{key}"))
        .spawn(move || {
            while let Ok(bytes) = input.recv() {
                if let Err(e) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
                    debug!(session_key = %key, error = %e, "PTY write failed");
                    break;
                }
            }
        })
        .map(|_| ())
}

/// Waits for the child, lets the reader drain, then reports the exit.
pub(super) fn spawn_waiter(
    key: SessionKey,
    mut child: Box<dyn Child + Send + Sync>,
    events: mpsc::Sender<PtyEvent>,
    reader_done: std_mpsc::Receiver<()>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-waiter-{key}"))
        .spawn(move || {
            let status = match child.wait() {
                Ok(status) => exit_info(&status),
                Err(e) => {
                    debug!(session_key = %key, error = %e, "Waiting for child failed");
                    ExitInfo::default()
                }
            };

            // Trailing output must precede the exit event
            let _ = reader_done.recv_timeout(EXIT_DRAIN_TIMEOUT);

            let _ = events.blocking_send(PtyEvent::Exit { key, status });
        })
        .map(|_| ())
}

/// Converts a portable-pty exit status.
///
/// A signal-terminated process has no meaningful exit code.
fn exit_info(status: &portable_pty::ExitStatus) -> ExitInfo {
    match status.signal() {
        Some(signal) => ExitInfo {
            code: None,
            signal: Some(signal.to_string()),
        },
        None => ExitInfo {
            code: i32::try_from(status.exit_code()).ok(),
            signal: None,
        },
    }
}
