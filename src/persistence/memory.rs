//! In-process store used for development and tests

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::game::state::{CharacterId, UserId};
use crate::net::auth::{check_credential_shape, AuthError, Authenticator, VerifiedUser};
use crate::persistence::store::{CharacterRecord, CharacterState, CharacterStore, StoreError};

/// Store that keeps everything in memory
#[derive(Default)]
pub struct MemoryStore {
    characters: RwLock<HashMap<CharacterId, CharacterRecord>>,
    states: RwLock<HashMap<CharacterId, CharacterState>>,
    tokens: RwLock<HashMap<String, VerifiedUser>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a character (normally done by the character-creation API)
    pub fn insert_character(&self, record: CharacterRecord) {
        self.characters.write().insert(record.character_id, record);
    }

    /// Issue a fresh random credential for a user
    pub fn issue_token(&self, user_id: UserId) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);
        self.tokens.write().insert(
            token.clone(),
            VerifiedUser {
                user_id,
                session_id: token.clone(),
            },
        );
        token
    }

    pub fn revoke_token(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }

    /// Latest stored live state for a character
    pub fn state(&self, character_id: CharacterId) -> Option<CharacterState> {
        self.states.read().get(&character_id).cloned()
    }

    /// Number of upserts applied (including ones that lost to a newer write)
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CharacterStore for MemoryStore {
    async fn load_owned_character(
        &self,
        user_id: UserId,
        character_id: CharacterId,
    ) -> Result<Option<CharacterRecord>, StoreError> {
        let record = match self.characters.read().get(&character_id) {
            Some(record) if record.user_id == user_id => record.clone(),
            _ => return Ok(None),
        };

        let merged = match self.states.read().get(&character_id) {
            Some(state) => CharacterRecord {
                vitals: state.vitals,
                gold: state.gold,
                position: Some(state.position),
                ..record
            },
            None => record,
        };
        Ok(Some(merged))
    }

    async fn upsert_state(&self, state: &CharacterState) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut states = self.states.write();
        match states.get(&state.character_id) {
            Some(existing) if existing.updated_at_ms > state.updated_at_ms => {}
            _ => {
                states.insert(state.character_id, state.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Authenticator for MemoryStore {
    async fn verify(&self, credential: &str) -> Result<VerifiedUser, AuthError> {
        let credential = check_credential_shape(credential)?;
        self.tokens
            .read()
            .get(credential)
            .cloned()
            .ok_or(AuthError::Rejected)
    }
}
