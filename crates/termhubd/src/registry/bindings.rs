//! Client bindings: which session each logical client is viewing.

use std::collections::HashMap;

use termhub_core::{ClientId, SessionName};

use crate::broadcaster::ConnectionId;

/// Where one client is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub session: SessionName,
    /// Connection that created the binding
    pub connection: ConnectionId,
}

/// `ClientId -> Binding` table. Many clients may share one session.
#[derive(Debug, Default)]
pub struct Bindings {
    by_client: HashMap<ClientId, Binding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `client` to `session`, replacing and returning any previous
    /// binding.
    pub fn bind(
        &mut self,
        client: ClientId,
        session: SessionName,
        connection: ConnectionId,
    ) -> Option<Binding> {
        self.by_client.insert(client, Binding { session, connection })
    }

    pub fn unbind(&mut self, client: &ClientId) -> Option<Binding> {
        self.by_client.remove(client)
    }

    pub fn get(&self, client: &ClientId) -> Option<&Binding> {
        self.by_client.get(client)
    }

    /// The session `client` is bound to.
    pub fn session_for(&self, client: &ClientId) -> Option<&SessionName> {
        self.by_client.get(client).map(|b| &b.session)
    }

    /// Points every binding on `old` at `new`. Returns how many moved.
    pub fn rename_session(&mut self, old: &SessionName, new: &SessionName) -> usize {
        let mut moved = 0;
        for binding in self.by_client.values_mut() {
            if &binding.session == old {
                binding.session = new.clone();
                moved += 1;
            }
        }
        moved
    }

    /// Drops every binding on `session`. Returns how many were removed.
    pub fn remove_session(&mut self, session: &SessionName) -> usize {
        let before = self.by_client.len();
        self.by_client.retain(|_, b| &b.session != session);
        before - self.by_client.len()
    }

    /// Drops every binding created by `connection`.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> usize {
        let before = self.by_client.len();
        self.by_client.retain(|_, b| b.connection != connection);
        before - self.by_client.len()
    }

    /// Number of clients bound to `session`.
    pub fn count_for(&self, session: &SessionName) -> usize {
        self.by_client
            .values()
            .filter(|b| &b.session == session)
            .count()
    }

    pub fn len(&self) -> usize {
        self.by_client.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_client.is_empty()
    }
}
