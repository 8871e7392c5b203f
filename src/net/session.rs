use std::collections::HashMap;

use crate::game::state::{CharacterId, ConnectionId, PlayerSession};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Session registry full ({0} sessions)")]
pub struct RegistryFull(pub usize);

/// Live sessions keyed by connection, with a character index.
/// A character has at most one live session.
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, PlayerSession>,
    by_character: HashMap<CharacterId, ConnectionId>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            by_character: HashMap::new(),
            max_sessions,
        }
    }

    /// Insert a session, displacing any session that holds the same
    /// character or connection. Displaced sessions are returned.
    pub fn insert(&mut self, session: PlayerSession) -> Result<Vec<PlayerSession>, RegistryFull> {
        let character_id = session.character_id();
        let connection_id = session.connection_id;

        let replaces_character = self.by_character.contains_key(&character_id);
        let replaces_connection = self.sessions.contains_key(&connection_id);
        if !replaces_character && !replaces_connection && self.sessions.len() >= self.max_sessions {
            return Err(RegistryFull(self.max_sessions));
        }

        let mut displaced = Vec::new();
        if let Some(old_connection) = self.by_character.get(&character_id).copied() {
            displaced.extend(self.remove(old_connection));
        }
        displaced.extend(self.remove(connection_id));

        self.by_character.insert(character_id, connection_id);
        self.sessions.insert(connection_id, session);
        Ok(displaced)
    }

    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<PlayerSession> {
        let session = self.sessions.remove(&connection_id)?;
        if self.by_character.get(&session.character_id()) == Some(&connection_id) {
            self.by_character.remove(&session.character_id());
        }
        Some(session)
    }

    #[inline]
    pub fn get(&self, connection_id: ConnectionId) -> Option<&PlayerSession> {
        self.sessions.get(&connection_id)
    }

    #[inline]
    pub fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(&connection_id)
    }

    /// Connection currently playing `character_id`
    pub fn connection_for(&self, character_id: CharacterId) -> Option<ConnectionId> {
        self.by_character.get(&character_id).copied()
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.sessions.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession> {
        self.sessions.values_mut()
    }
}
