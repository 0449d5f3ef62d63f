//! Connection handler for individual front-end connections.
//!
//! Each connection gets its own `ConnectionHandler` that:
//! - Registers an outbound queue with the registry's broadcaster
//! - Runs a writer task draining that queue to the socket
//! - Decodes incoming lines and routes commands and requests
//!
//! Responses and broadcast events share the one outbound queue, so
//! everything a connection receives is in a single, ordered stream. The
//! broadcaster holds the only strong sender; once it drops a connection
//! for falling behind, the writer drains, closes the socket and stops the
//! reader.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Malformed input is logged and dropped; only EOF or an I/O error ends
//!   a connection

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use termhub_core::TermSize;
use termhub_protocol::{
    encode_line, ClientMessage, Command, Frame, FrameError, JsonLinesCodec, Request, RequestId,
    RequestKind, Response, ResponseBody, UNKNOWN_MESSAGE_TYPE,
};

use crate::broadcaster::{outbound_queue, ConnectionId, WeakOutbound};
use crate::process_tree::ChildProbe;
use crate::registry::RegistryHandle;
use crate::shortcuts::ShortcutStore;

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handler for a single front-end connection.
pub struct ConnectionHandler {
    id: ConnectionId,

    /// Taken by [`run`](Self::run) on start
    stream: Option<(OwnedReadHalf, OwnedWriteHalf)>,

    registry: RegistryHandle,

    shortcuts: ShortcutStore,

    child_probe: ChildProbe,

    cancel_token: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(
        id: ConnectionId,
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        registry: RegistryHandle,
        shortcuts: ShortcutStore,
        child_probe: ChildProbe,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            id,
            stream: Some((reader, writer)),
            registry,
            shortcuts,
            child_probe,
            cancel_token,
        }
    }

    /// Runs the connection until EOF, an I/O error, or shutdown.
    pub async fn run(mut self) {
        debug!(connection = %self.id, "New connection");

        let Some((reader, writer)) = self.stream.take() else {
            return;
        };
        let (outbound, queue) = outbound_queue();
        let weak = outbound.downgrade();
        if let Err(e) = self.registry.register_connection(self.id, outbound).await {
            warn!(connection = %self.id, error = %e, "Registry unavailable, closing connection");
            return;
        }
        let writer_done = self.cancel_token.child_token();
        tokio::spawn(write_loop(self.id, writer, queue, writer_done.clone()));

        let result = self.process_messages(reader, &weak, &writer_done).await;
        match result {
            Ok(()) => debug!(connection = %self.id, "Connection closed by peer"),
            Err(e) => debug!(connection = %self.id, error = %e, "Connection closed"),
        }

        self.registry.connection_closed(self.id).await;
        info!(connection = %self.id, "Connection finished");
    }

    /// Main message processing loop.
    async fn process_messages(
        &self,
        reader: OwnedReadHalf,
        outbound: &WeakOutbound,
        writer_done: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        let mut frames = FramedRead::new(reader, JsonLinesCodec::new());

        loop {
            let frame = tokio::select! {
                // Shutdown, or the writer gave up on this connection
                _ = writer_done.cancelled() => return Ok(()),
                frame = frames.next() => frame,
            };

            match frame {
                None => return Ok(()),
                Some(Err(e)) => return Err(ConnectionError::Io(e.to_string())),
                Some(Ok(Frame::Message(msg))) => self.handle_message(msg, outbound).await,
                Some(Ok(Frame::Invalid(err))) => self.handle_invalid(err, outbound),
            }
        }
    }

    async fn handle_message(&self, msg: ClientMessage, outbound: &WeakOutbound) {
        match msg {
            ClientMessage::Command(cmd) => self.handle_command(cmd).await,
            ClientMessage::Request(req) => self.handle_request(req, outbound).await,
        }
    }

    /// Fire-and-forget path. Never produces a response.
    async fn handle_command(&self, cmd: Command) {
        match cmd {
            Command::Input { client_id, data } => {
                trace!(connection = %self.id, client_id = %client_id, bytes = data.len(), "Input");
                self.registry.send_input(client_id, data).await;
            }
            Command::Resize {
                client_id,
                cols,
                rows,
            } => {
                self.registry
                    .send_resize(client_id, TermSize::new(cols, rows))
                    .await;
            }
            Command::Detach { client_id } => {
                self.registry.send_detach(client_id).await;
            }
            Command::Unknown => {
                debug!(connection = %self.id, "Ignoring unknown command type");
            }
        }
    }

    /// Correlated path: exactly one response per request.
    async fn handle_request(&self, req: Request, outbound: &WeakOutbound) {
        let Request { id, kind } = req;
        debug!(connection = %self.id, request_id = %id, "Request received");

        let body = match kind {
            RequestKind::ListSessions => {
                // Snapshot in order; the slow child-process probe runs off the
                // read loop
                let mut sessions = self.registry.list_sessions().await;
                let probe = self.child_probe.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    probe.annotate(&mut sessions).await;
                    respond(&outbound, id, ResponseBody::Sessions { sessions });
                });
                return;
            }
            RequestKind::CreateSession { name } => match self.registry.create_session(name).await
            {
                Ok(name) => ResponseBody::Name { name },
                Err(e) => ResponseBody::error(e),
            },
            RequestKind::DeleteSession { name } => match self.registry.delete_session(name).await
            {
                Ok(()) => ResponseBody::ok(),
                Err(e) => ResponseBody::error(e),
            },
            RequestKind::RenameSession { old_name, new_name } => {
                match self.registry.rename_session(old_name, new_name).await {
                    Ok(name) => ResponseBody::Name { name },
                    Err(e) => ResponseBody::error(e),
                }
            }
            RequestKind::Attach {
                client_id,
                session,
                cols,
                rows,
            } => {
                let size = match (cols, rows) {
                    (Some(cols), Some(rows)) => Some(TermSize::new(cols, rows)),
                    _ => None,
                };
                // The actor enqueues the response itself
                match self
                    .registry
                    .attach_for_connection(id.clone(), client_id, session, size, self.id)
                    .await
                {
                    Ok(()) => return,
                    Err(e) => ResponseBody::error(e),
                }
            }
            RequestKind::Detach { client_id } => match self.registry.detach(client_id).await {
                Ok(_) => ResponseBody::ok(),
                Err(e) => ResponseBody::error(e),
            },
            RequestKind::GetShortcuts => {
                let store = self.shortcuts.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let body = match store.load().await {
                        Ok(shortcuts) => ResponseBody::Shortcuts { shortcuts },
                        Err(e) => {
                            warn!(error = %e, "Failed to load shortcuts");
                            ResponseBody::error(e)
                        }
                    };
                    respond(&outbound, id, body);
                });
                return;
            }
            RequestKind::SetShortcuts { data } => {
                let store = self.shortcuts.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let body = match store.save(&data).await {
                        Ok(()) => ResponseBody::ok(),
                        Err(e) => {
                            warn!(error = %e, "Failed to save shortcuts");
                            ResponseBody::error(e)
                        }
                    };
                    respond(&outbound, id, body);
                });
                return;
            }
            RequestKind::Unknown => {
                debug!(connection = %self.id, request_id = %id, "Unknown request type");
                ResponseBody::error(UNKNOWN_MESSAGE_TYPE)
            }
        };

        respond(outbound, id, body);
    }

    /// A line that did not decode. Answered only when it carried an id.
    fn handle_invalid(&self, err: FrameError, outbound: &WeakOutbound) {
        warn!(connection = %self.id, error = %err, "Dropping invalid message");
        if let Some(id) = err.request_id() {
            respond(outbound, id.clone(), ResponseBody::error(&err));
        }
    }
}

/// Enqueues a response on a connection's outbound queue.
///
/// Dropped silently once the connection has been unregistered; a full
/// queue is left for the broadcaster to prune.
fn respond(outbound: &WeakOutbound, id: RequestId, body: ResponseBody) {
    let Some(outbound) = outbound.upgrade() else {
        return;
    };
    match encode_line(&Response::new(id, body)) {
        Ok(line) => {
            if let Err(TrySendError::Full(_)) = outbound.try_send(line) {
                debug!("Outbound queue full, response dropped");
            }
        }
        Err(e) => error!(error = %e, "Failed to serialize response"),
    }
}

/// Drains the outbound queue to the socket.
///
/// Ends when every sender is gone or a write fails or stalls past
/// [`WRITE_TIMEOUT`]. Dropping the queue then makes the broadcaster prune
/// this connection; cancelling `done` ends the reader.
async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Arc<str>>,
    done: CancellationToken,
) {
    while let Some(line) = queue.recv().await {
        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        })
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(connection = %id, error = %e, "Write failed");
                break;
            }
            Err(_) => {
                warn!(connection = %id, "Write timed out, dropping connection output");
                break;
            }
        }
    }
    drop(queue);
    let _ = writer.shutdown().await;
    done.cancel();
    trace!(connection = %id, "Writer finished");
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::Io("broken pipe".to_string());
        assert!(err.to_string().contains("broken pipe"));
    }

    #[test]
    fn test_respond_writes_one_line() {
        let (tx, mut rx) = outbound_queue();

        respond(&tx.downgrade(), RequestId::from("a"), ResponseBody::error(UNKNOWN_MESSAGE_TYPE));

        assert_eq!(
            &*rx.try_recv().unwrap(),
            "{\"id\":\"a\",\"error\":\"Unknown message type\"}\n"
        );
    }

    #[test]
    fn test_respond_to_closed_queue_is_silent() {
        let (tx, rx) = outbound_queue();
        drop(rx);
        respond(&tx.downgrade(), RequestId::from(1), ResponseBody::ok());
    }

    #[test]
    fn test_respond_after_unregister_is_dropped() {
        let (tx, mut rx) = outbound_queue();
        let weak = tx.downgrade();
        drop(tx);

        respond(&weak, RequestId::from(2), ResponseBody::ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_writer_stops_reader_when_queue_closes() {
        let (tx, queue) = outbound_queue();
        let (_client, server) = tokio::net::UnixStream::pair().unwrap();
        let (_reader, writer) = server.into_split();
        let done = CancellationToken::new();

        let task = tokio::spawn(write_loop(ConnectionId::new(1), writer, queue, done.clone()));
        tx.try_send(Arc::from("{}\n")).unwrap();
        drop(tx);

        timeout(Duration::from_secs(5), done.cancelled()).await.unwrap();
        task.await.unwrap();
    }
}
