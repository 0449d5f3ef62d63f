//! Registry actor - owns all session state and processes commands.
//!
//! The RegistryActor is the single owner of sessions, client bindings and
//! the broadcaster. It merges two inputs: commands from connections and
//! PTY events from session I/O threads. Each is handled to completion
//! before the next, so every handler sees a consistent snapshot and events
//! leave in exactly the order they were applied.

use std::collections::{BTreeMap, HashMap};

use termhub_core::{ClientId, ExitInfo, SessionInfo, SessionName, TermSize};
use termhub_protocol::{BroadcastEvent, Response, ResponseBody};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::bindings::Bindings;
use super::commands::{AttachReply, Attached, RegistryCommand, RegistryError};
use super::RegistrySettings;
use crate::broadcaster::{Broadcaster, ConnectionId};
use crate::session::{PtyEvent, Session, SessionKey, SpawnOptions};

/// The registry actor - owns all session state.
///
/// # Ownership
///
/// - `sessions`: sessions keyed by their immutable [`SessionKey`]; key
///   order is creation order
/// - `names`: index for name -> key lookups
/// - `bindings`: client -> session table
/// - `broadcaster`: outbound queues of every connection
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// PTY events from every session's I/O threads
    pty_events: mpsc::Receiver<PtyEvent>,

    /// Cloned into each spawned session
    pty_sender: mpsc::Sender<PtyEvent>,

    sessions: BTreeMap<SessionKey, Session>,

    names: HashMap<SessionName, SessionKey>,

    bindings: Bindings,

    broadcaster: Broadcaster,

    settings: RegistrySettings,

    next_key: u64,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        pty_channel: (mpsc::Sender<PtyEvent>, mpsc::Receiver<PtyEvent>),
        settings: RegistrySettings,
    ) -> Self {
        let (pty_sender, pty_events) = pty_channel;
        Self {
            receiver,
            pty_events,
            pty_sender,
            sessions: BTreeMap::new(),
            names: HashMap::new(),
            bindings: Bindings::new(),
            broadcaster: Broadcaster::new(),
            settings,
            next_key: 1,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands and PTY events until every command sender is
    /// dropped. Sessions still alive at that point are killed.
    pub async fn run(mut self) {
        info!(max_sessions = self.settings.max_sessions, "Registry actor starting");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                // The actor holds a sender, so this never yields None
                Some(event) = self.pty_events.recv() => {
                    self.handle_pty_event(event);
                }
            }
        }

        let killed = self.kill_all();
        info!(
            sessions = self.sessions.len(),
            killed,
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Attach {
                client_id,
                session,
                size,
                connection,
                reply,
            } => {
                let result = self.handle_attach(client_id, &session, size, connection);
                match reply {
                    AttachReply::Connection(id) => {
                        let body = match result {
                            Ok(attached) => ResponseBody::Attached {
                                buffer: attached.buffer,
                                alive: attached.alive,
                            },
                            Err(e) => ResponseBody::error(e),
                        };
                        self.broadcaster.respond(connection, &Response::new(id, body));
                    }
                    AttachReply::Caller(respond_to) => {
                        // Ignore send error - client may have dropped the receiver
                        let _ = respond_to.send(result);
                    }
                }
            }
            RegistryCommand::Detach {
                client_id,
                respond_to,
            } => {
                let removed = self.handle_detach(&client_id);
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(removed);
                }
            }
            RegistryCommand::Input { client_id, data } => {
                self.handle_input(&client_id, &data);
            }
            RegistryCommand::Resize { client_id, size } => {
                self.handle_resize(&client_id, size);
            }
            RegistryCommand::ListSessions { respond_to } => {
                let _ = respond_to.send(self.handle_list());
            }
            RegistryCommand::CreateSession { name, respond_to } => {
                let result = self.handle_create(&name);
                let _ = respond_to.send(result);
            }
            RegistryCommand::DeleteSession { name, respond_to } => {
                let result = self.handle_delete(&name);
                let _ = respond_to.send(result);
            }
            RegistryCommand::RenameSession {
                old_name,
                new_name,
                respond_to,
            } => {
                let result = self.handle_rename(&old_name, &new_name);
                let _ = respond_to.send(result);
            }
            RegistryCommand::RegisterConnection {
                connection,
                outbound,
            } => {
                self.broadcaster.register(connection, outbound);
            }
            RegistryCommand::ConnectionClosed { connection } => {
                self.handle_connection_closed(connection);
            }
            RegistryCommand::Shutdown { respond_to } => {
                let killed = self.kill_all();
                info!(killed, "Registry shutdown: sessions killed");
                let _ = respond_to.send(killed);
            }
        }
    }

    // ========================================================================
    // PTY Events
    // ========================================================================

    fn handle_pty_event(&mut self, event: PtyEvent) {
        match event {
            PtyEvent::Data { key, chunk } => {
                let Some(session) = self.sessions.get_mut(&key) else {
                    trace!(session_key = %key, "Output for removed session dropped");
                    return;
                };
                // History first, so a snapshot taken later includes this chunk
                session.push_output(&chunk);
                let event = BroadcastEvent::Output {
                    session: session.name().clone(),
                    data: chunk,
                };
                self.broadcaster.broadcast(&event);
            }
            PtyEvent::Exit { key, status } => {
                let Some(session) = self.sessions.get_mut(&key) else {
                    debug!(session_key = %key, "Exit for removed session ignored");
                    return;
                };
                if !session.record_exit(status.clone()) {
                    return;
                }
                info!(
                    session = %session.name(),
                    code = ?status.code,
                    signal = ?status.signal,
                    "Session exited"
                );
                let ExitInfo { code, signal } = status;
                let event = BroadcastEvent::Exit {
                    session: session.name().clone(),
                    code,
                    signal,
                };
                self.broadcaster.broadcast(&event);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Get-or-create, then bind.
    fn handle_attach(
        &mut self,
        client_id: ClientId,
        name: &str,
        size: Option<TermSize>,
        connection: ConnectionId,
    ) -> Result<Attached, RegistryError> {
        let name = SessionName::parse(name)?;

        let created = match self.names.get(&name).copied() {
            Some(key) => {
                if let (Some(size), Some(session)) = (size, self.sessions.get_mut(&key)) {
                    if let Err(e) = session.resize(size) {
                        debug!(session = %name, error = %e, "Resize on attach failed");
                    }
                }
                false
            }
            None => {
                self.spawn_session(name.clone(), size)?;
                true
            }
        };

        let session = self
            .names
            .get(&name)
            .and_then(|key| self.sessions.get(key))
            .ok_or_else(|| RegistryError::SessionNotFound(name.clone()))?;
        let attached = Attached {
            session: name.clone(),
            buffer: session.replay(),
            alive: session.is_alive(),
            created,
        };

        if let Some(previous) = self.bindings.bind(client_id.clone(), name.clone(), connection) {
            debug!(
                client_id = %client_id,
                previous = %previous.session,
                "Replacing existing binding"
            );
        }

        info!(
            client_id = %client_id,
            session = %name,
            connection = %connection,
            created,
            replay_bytes = attached.buffer.len(),
            "Client attached"
        );

        Ok(attached)
    }

    fn handle_detach(&mut self, client_id: &ClientId) -> bool {
        match self.bindings.unbind(client_id) {
            Some(binding) => {
                debug!(client_id = %client_id, session = %binding.session, "Client detached");
                true
            }
            None => false,
        }
    }

    /// Resolves the live session a client is bound to.
    fn bound_session_mut(&mut self, client_id: &ClientId) -> Option<&mut Session> {
        let name = self.bindings.session_for(client_id)?;
        let key = self.names.get(name)?;
        self.sessions.get_mut(key)
    }

    fn handle_input(&mut self, client_id: &ClientId, data: &str) {
        let Some(session) = self.bound_session_mut(client_id) else {
            trace!(client_id = %client_id, "Input for unbound client dropped");
            return;
        };
        // Losing the alive/exit race is expected; the input is just dropped
        if let Err(e) = session.write(data.as_bytes()) {
            trace!(session = %session.name(), error = %e, "Input dropped");
        }
    }

    fn handle_resize(&mut self, client_id: &ClientId, size: TermSize) {
        let Some(session) = self.bound_session_mut(client_id) else {
            trace!(client_id = %client_id, "Resize for unbound client dropped");
            return;
        };
        if let Err(e) = session.resize(size) {
            debug!(session = %session.name(), error = %e, "Resize failed");
        }
    }

    fn handle_list(&self) -> Vec<SessionInfo> {
        self.sessions
            .values()
            .map(|s| s.info(self.bindings.count_for(s.name())))
            .collect()
    }

    fn handle_create(&mut self, name: &str) -> Result<SessionName, RegistryError> {
        let name = SessionName::parse(name)?;
        if self.names.contains_key(&name) {
            return Err(RegistryError::SessionAlreadyExists(name));
        }
        self.spawn_session(name.clone(), None)?;
        Ok(name)
    }

    fn handle_delete(&mut self, name: &SessionName) -> Result<(), RegistryError> {
        let key = self
            .names
            .remove(name)
            .ok_or_else(|| RegistryError::SessionNotFound(name.clone()))?;

        if let Some(mut session) = self.sessions.remove(&key) {
            session.kill();
        }
        let unbound = self.bindings.remove_session(name);

        info!(
            session = %name,
            unbound,
            remaining_sessions = self.sessions.len(),
            "Session removed"
        );

        self.broadcaster.broadcast(&BroadcastEvent::SessionRemoved {
            session: name.clone(),
        });
        Ok(())
    }

    fn handle_rename(
        &mut self,
        old_name: &SessionName,
        new_name: &str,
    ) -> Result<SessionName, RegistryError> {
        let new_name = SessionName::parse(new_name)?;
        let key = self
            .names
            .get(old_name)
            .copied()
            .ok_or_else(|| RegistryError::SessionNotFound(old_name.clone()))?;

        if &new_name == old_name {
            return Ok(new_name);
        }
        if self.names.contains_key(&new_name) {
            return Err(RegistryError::SessionAlreadyExists(new_name));
        }

        self.names.remove(old_name);
        self.names.insert(new_name.clone(), key);
        if let Some(session) = self.sessions.get_mut(&key) {
            session.set_name(new_name.clone());
        }
        let moved = self.bindings.rename_session(old_name, &new_name);

        info!(old = %old_name, new = %new_name, bindings = moved, "Session renamed");

        self.broadcaster.broadcast(&BroadcastEvent::SessionRenamed {
            session: old_name.clone(),
            new_name: new_name.clone(),
        });
        Ok(new_name)
    }

    fn handle_connection_closed(&mut self, connection: ConnectionId) {
        self.broadcaster.unregister(connection);
        let unbound = self.bindings.remove_connection(connection);
        debug!(connection = %connection, unbound, "Connection closed");
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Starts a new session under `name`, enforcing the session cap.
    fn spawn_session(
        &mut self,
        name: SessionName,
        size: Option<TermSize>,
    ) -> Result<SessionKey, RegistryError> {
        let max = self.settings.max_sessions;
        if self.sessions.len() >= max {
            warn!(
                session = %name,
                current = self.sessions.len(),
                max,
                "Registry is full, rejecting session"
            );
            return Err(RegistryError::RegistryFull { max });
        }

        let key = SessionKey::new(self.next_key);
        self.next_key += 1;

        let options = SpawnOptions {
            size: size.unwrap_or(self.settings.spawn.size),
            ..self.settings.spawn.clone()
        };
        let session = Session::spawn(
            key,
            name.clone(),
            &options,
            self.settings.buffer,
            self.pty_sender.clone(),
        )
        .map_err(|e| {
            warn!(session = %name, error = %e, "Failed to spawn session");
            RegistryError::from(e)
        })?;

        self.sessions.insert(key, session);
        self.names.insert(name, key);
        Ok(key)
    }

    /// Kills every alive session. Returns how many were killed.
    fn kill_all(&mut self) -> usize {
        self.sessions
            .values_mut()
            .map(|session| session.kill())
            .filter(|killed| *killed)
            .count()
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of sessions currently registered.
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::time::Duration;
    use termhub_core::BufferLimits;
    use termhub_protocol::RequestId;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(10);

    fn settings(max_sessions: usize) -> RegistrySettings {
        RegistrySettings {
            max_sessions,
            buffer: BufferLimits::default(),
            spawn: SpawnOptions {
                program: "/bin/sh".to_string(),
                args: Vec::new(),
                cwd: std::env::temp_dir(),
                env: vec![(OsString::from("PATH"), OsString::from("/usr/bin:/bin"))],
                size: TermSize::default(),
            },
        }
    }

    fn create_actor(max_sessions: usize) -> (mpsc::Sender<RegistryCommand>, RegistryActor) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let actor = RegistryActor::new(cmd_rx, mpsc::channel(64), settings(max_sessions));
        (cmd_tx, actor)
    }

    fn connect(actor: &mut RegistryActor, n: u64) -> mpsc::Receiver<std::sync::Arc<str>> {
        let (tx, rx) = crate::broadcaster::outbound_queue();
        actor.handle_command(RegistryCommand::RegisterConnection {
            connection: ConnectionId::new(n),
            outbound: tx,
        });
        rx
    }

    async fn create(actor: &mut RegistryActor, name: &str) -> Result<SessionName, RegistryError> {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::CreateSession {
            name: name.to_string(),
            respond_to: tx,
        });
        rx.await.unwrap()
    }

    async fn list(actor: &mut RegistryActor) -> Vec<SessionInfo> {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::ListSessions { respond_to: tx });
        rx.await.unwrap()
    }

    async fn attach(actor: &mut RegistryActor, client: &str, session: &str) -> Attached {
        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Attach {
            client_id: ClientId::from(client),
            session: session.to_string(),
            size: Some(TermSize::new(100, 30)),
            connection: ConnectionId::new(1),
            reply: AttachReply::Caller(tx),
        });
        rx.await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_create_session() {
        let (_, mut actor) = create_actor(10);

        let name = create(&mut actor, "work").await.unwrap();
        assert_eq!(name.as_str(), "work");
        assert_eq!(actor.session_count(), 1);

        let sessions = list(&mut actor).await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].alive);
        assert!(sessions[0].has_child_processes.is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let (_, mut actor) = create_actor(10);

        create(&mut actor, "work").await.unwrap();
        let result = create(&mut actor, "work").await;

        assert!(matches!(result, Err(RegistryError::SessionAlreadyExists(_))));
        let names: Vec<_> = list(&mut actor).await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, [SessionName::from("work")]);
    }

    #[tokio::test]
    async fn test_create_invalid_name_fails() {
        let (_, mut actor) = create_actor(10);
        let result = create(&mut actor, "bad\u{7}name").await;
        assert!(matches!(result, Err(RegistryError::InvalidName(_))));
        assert_eq!(actor.session_count(), 0);
    }

    #[tokio::test]
    async fn test_max_sessions_limit() {
        let (_, mut actor) = create_actor(2);

        create(&mut actor, "a").await.unwrap();
        create(&mut actor, "b").await.unwrap();
        let result = create(&mut actor, "c").await;

        assert!(matches!(result, Err(RegistryError::RegistryFull { max: 2 })));
        assert_eq!(actor.session_count(), 2);
    }

    #[tokio::test]
    async fn test_attach_creates_session_implicitly() {
        let (_, mut actor) = create_actor(10);

        let attached = attach(&mut actor, "c1", "unknown").await;

        assert_eq!(attached.buffer, "");
        assert!(attached.alive);
        assert!(attached.created);

        let sessions = list(&mut actor).await;
        assert_eq!(sessions[0].name.as_str(), "unknown");
        assert_eq!(sessions[0].clients, 1);
        assert_eq!((sessions[0].cols, sessions[0].rows), (100, 30));
    }

    #[tokio::test]
    async fn test_attach_for_connection_enqueues_response() {
        let (_, mut actor) = create_actor(10);
        let mut rx = connect(&mut actor, 1);

        actor.handle_command(RegistryCommand::Attach {
            client_id: ClientId::from("c1"),
            session: "x".to_string(),
            size: None,
            connection: ConnectionId::new(1),
            reply: AttachReply::Connection(RequestId::from(42)),
        });

        let line = rx.try_recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json, serde_json::json!({"id": 42, "buffer": "", "alive": true}));
    }

    #[tokio::test]
    async fn test_output_is_buffered_then_broadcast() {
        let (_, mut actor) = create_actor(10);
        let mut rx_a = connect(&mut actor, 1);
        let mut rx_b = connect(&mut actor, 2);
        create(&mut actor, "x").await.unwrap();
        let key = actor.names[&SessionName::from("x")];

        actor.handle_pty_event(PtyEvent::Data {
            key,
            chunk: "hello".into(),
        });

        for rx in [&mut rx_a, &mut rx_b] {
            let line = rx.try_recv().unwrap();
            assert!(line.contains("\"type\":\"output\""));
            assert!(line.contains("\"session\":\"x\""));
        }
        let attached = attach(&mut actor, "late", "x").await;
        assert_eq!(attached.buffer, "hello");
    }

    #[tokio::test]
    async fn test_exit_broadcast_once_and_session_retained() {
        let (_, mut actor) = create_actor(10);
        let mut rx = connect(&mut actor, 1);
        create(&mut actor, "x").await.unwrap();
        let key = actor.names[&SessionName::from("x")];

        let status = ExitInfo {
            code: Some(0),
            signal: None,
        };
        actor.handle_pty_event(PtyEvent::Exit {
            key,
            status: status.clone(),
        });
        actor.handle_pty_event(PtyEvent::Exit { key, status });

        let line = rx.try_recv().unwrap();
        assert!(line.contains("\"type\":\"exit\""));
        assert!(rx.try_recv().is_err());

        let sessions = list(&mut actor).await;
        assert_eq!(sessions.len(), 1);
        assert!(!sessions[0].alive);
        assert_eq!(sessions[0].exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_events_for_unknown_key_ignored() {
        let (_, mut actor) = create_actor(10);
        let mut rx = connect(&mut actor, 1);

        actor.handle_pty_event(PtyEvent::Data {
            key: SessionKey::new(999),
            chunk: "ghost".into(),
        });
        actor.handle_pty_event(PtyEvent::Exit {
            key: SessionKey::new(999),
            status: ExitInfo::default(),
        });

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rename_moves_bindings() {
        let (_, mut actor) = create_actor(10);
        let mut rx = connect(&mut actor, 1);
        attach(&mut actor, "c1", "work").await;

        let (tx, resp) = oneshot::channel();
        actor.handle_command(RegistryCommand::RenameSession {
            old_name: SessionName::from("work"),
            new_name: "ops".to_string(),
            respond_to: tx,
        });
        assert_eq!(resp.await.unwrap().unwrap().as_str(), "ops");

        assert_eq!(
            actor.bindings.session_for(&ClientId::from("c1")),
            Some(&SessionName::from("ops"))
        );
        let sessions = list(&mut actor).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name.as_str(), "ops");
        assert_eq!(sessions[0].clients, 1);

        let line = rx.try_recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "session-renamed", "session": "work", "newName": "ops"})
        );
    }

    #[tokio::test]
    async fn test_rename_errors() {
        let (_, mut actor) = create_actor(10);
        create(&mut actor, "a").await.unwrap();
        create(&mut actor, "b").await.unwrap();

        let rename = |old: &str, new: &str| {
            let (tx, rx) = oneshot::channel();
            (
                RegistryCommand::RenameSession {
                    old_name: SessionName::from(old),
                    new_name: new.to_string(),
                    respond_to: tx,
                },
                rx,
            )
        };

        let (cmd, rx) = rename("a", "b");
        actor.handle_command(cmd);
        assert!(matches!(
            rx.await.unwrap(),
            Err(RegistryError::SessionAlreadyExists(_))
        ));

        let (cmd, rx) = rename("missing", "c");
        actor.handle_command(cmd);
        assert!(matches!(rx.await.unwrap(), Err(RegistryError::SessionNotFound(_))));

        let (cmd, rx) = rename("a", "a");
        actor.handle_command(cmd);
        assert_eq!(rx.await.unwrap().unwrap().as_str(), "a");
    }

    #[tokio::test]
    async fn test_delete_drops_bindings_and_broadcasts() {
        let (_, mut actor) = create_actor(10);
        let mut rx = connect(&mut actor, 1);
        attach(&mut actor, "c1", "doomed").await;

        let (tx, resp) = oneshot::channel();
        actor.handle_command(RegistryCommand::DeleteSession {
            name: SessionName::from("doomed"),
            respond_to: tx,
        });
        assert!(resp.await.unwrap().is_ok());

        assert_eq!(actor.session_count(), 0);
        assert!(actor.bindings.is_empty());
        let line = rx.try_recv().unwrap();
        assert!(line.contains("\"type\":\"session-removed\""));

        let (tx, resp) = oneshot::channel();
        actor.handle_command(RegistryCommand::DeleteSession {
            name: SessionName::from("doomed"),
            respond_to: tx,
        });
        assert!(matches!(
            resp.await.unwrap(),
            Err(RegistryError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_closed_drops_its_bindings() {
        let (_, mut actor) = create_actor(10);
        let _rx = connect(&mut actor, 1);
        attach(&mut actor, "c1", "x").await;

        actor.handle_command(RegistryCommand::ConnectionClosed {
            connection: ConnectionId::new(1),
        });

        assert!(actor.bindings.is_empty());
        assert_eq!(actor.session_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_kills_alive_sessions() {
        let (_, mut actor) = create_actor(10);
        create(&mut actor, "a").await.unwrap();
        create(&mut actor, "b").await.unwrap();

        let (tx, rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Shutdown { respond_to: tx });
        assert_eq!(rx.await.unwrap(), 2);

        assert!(list(&mut actor).await.iter().all(|s| !s.alive));
    }

    #[tokio::test]
    async fn test_input_reaches_bound_session() {
        let (_, mut actor) = create_actor(10);
        let mut rx = connect(&mut actor, 1);
        attach(&mut actor, "c1", "echo").await;

        actor.handle_command(RegistryCommand::Input {
            client_id: ClientId::from("c1"),
            data: "echo marker-$((40+2))\n".to_string(),
        });

        let mut seen = String::new();
        let found = timeout(WAIT, async {
            while let Some(event) = actor.pty_events.recv().await {
                actor.handle_pty_event(event);
                while let Ok(line) = rx.try_recv() {
                    seen.push_str(&line);
                }
                if seen.contains("marker-42") {
                    return true;
                }
            }
            false
        })
        .await;

        assert_eq!(found, Ok(true), "saw {seen:?}");
    }
}
