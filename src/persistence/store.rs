use async_trait::async_trait;

use crate::game::state::{CharacterId, CharacterProfile, UserId, Vitals};
use crate::util::vec2::Vec2;

/// Errors from a durable store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Query failed: {0}")]
    Query(String),
    #[error("Corrupt row for character {0}: {1}")]
    CorruptRow(CharacterId, String),
}

#[cfg(feature = "mysql")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Character as read on join
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterRecord {
    pub character_id: CharacterId,
    pub user_id: UserId,
    pub profile: CharacterProfile,
    pub vitals: Vitals,
    pub gold: u32,
    /// Last persisted position, `None` for a character that never entered the world
    pub position: Option<Vec2>,
}

/// Live state written back to the store
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterState {
    pub character_id: CharacterId,
    pub position: Vec2,
    pub vitals: Vitals,
    pub gold: u32,
    /// Wall-clock milliseconds; older writes never replace newer ones
    pub updated_at_ms: u64,
}

/// Durable store for character ownership lookups and live-state upserts
#[async_trait]
pub trait CharacterStore: Send + Sync {
    /// Load a character if, and only if, it belongs to `user_id`
    async fn load_owned_character(
        &self,
        user_id: UserId,
        character_id: CharacterId,
    ) -> Result<Option<CharacterRecord>, StoreError>;

    /// Insert or update the live state row keyed by character id (last write by timestamp wins)
    async fn upsert_state(&self, state: &CharacterState) -> Result<(), StoreError>;
}

#[cfg(test)]
impl CharacterRecord {
    pub fn new_for_test(character_id: CharacterId, user_id: UserId) -> Self {
        use crate::game::state::{Realm, Vital};

        Self {
            character_id,
            user_id,
            profile: CharacterProfile {
                name: format!("Char{}", character_id),
                level: 10,
                race: "human".to_string(),
                class: "warrior".to_string(),
                realm: Realm::Alsius,
            },
            vitals: Vitals {
                health: Vital::full(100.0),
                mana: Vital::full(50.0),
                stamina: Vital::full(100.0),
            },
            gold: 25,
            position: None,
        }
    }
}
