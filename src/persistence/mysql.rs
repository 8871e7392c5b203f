//! MySQL-backed store
//!
//! Reads the `characters` and `user_sessions` tables owned by the web API and
//! owns the `character_state` table holding live position and vitals.
//!
//! Web API columns are cast in the query (integers to `SIGNED`, stat maxima
//! to `DOUBLE`, MySQL 8.0.17+) so signed or unsigned `INT` and `FLOAT` or
//! `DECIMAL` schemas decode the same way.

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::game::state::{CharacterId, CharacterProfile, Realm, UserId, Vital, Vitals};
use crate::net::auth::{check_credential_shape, AuthError, Authenticator, VerifiedUser};
use crate::persistence::store::{CharacterRecord, CharacterState, CharacterStore, StoreError};
use crate::util::vec2::Vec2;

const CREATE_STATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS character_state (
    character_id INT UNSIGNED NOT NULL PRIMARY KEY,
    pos_x FLOAT NOT NULL,
    pos_y FLOAT NOT NULL,
    current_health FLOAT NOT NULL,
    max_health FLOAT NOT NULL,
    current_mana FLOAT NOT NULL,
    max_mana FLOAT NOT NULL,
    current_stamina FLOAT NOT NULL,
    max_stamina FLOAT NOT NULL,
    gold INT UNSIGNED NOT NULL,
    updated_at BIGINT UNSIGNED NOT NULL
)"#;

const SELECT_OWNED_CHARACTER: &str = r#"
SELECT CAST(c.id AS SIGNED) AS id, CAST(c.user_id AS SIGNED) AS user_id,
       c.name, CAST(c.level AS SIGNED) AS level, c.race, c.class, c.realm,
       CAST(c.gold AS SIGNED) AS gold,
       CAST(c.max_health AS DOUBLE) AS max_health,
       CAST(c.max_mana AS DOUBLE) AS max_mana,
       CAST(c.max_stamina AS DOUBLE) AS max_stamina,
       s.pos_x, s.pos_y, s.current_health, s.current_mana, s.current_stamina,
       s.gold AS state_gold
FROM characters c
LEFT JOIN character_state s ON s.character_id = c.id
WHERE c.id = ? AND c.user_id = ?"#;

// `updated_at` is assigned last: MySQL evaluates the SET list left to right,
// so every guard above still compares against the stored timestamp.
const UPSERT_STATE: &str = r#"
INSERT INTO character_state
    (character_id, pos_x, pos_y, current_health, max_health, current_mana, max_mana,
     current_stamina, max_stamina, gold, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON DUPLICATE KEY UPDATE
    pos_x = IF(VALUES(updated_at) >= updated_at, VALUES(pos_x), pos_x),
    pos_y = IF(VALUES(updated_at) >= updated_at, VALUES(pos_y), pos_y),
    current_health = IF(VALUES(updated_at) >= updated_at, VALUES(current_health), current_health),
    max_health = IF(VALUES(updated_at) >= updated_at, VALUES(max_health), max_health),
    current_mana = IF(VALUES(updated_at) >= updated_at, VALUES(current_mana), current_mana),
    max_mana = IF(VALUES(updated_at) >= updated_at, VALUES(max_mana), max_mana),
    current_stamina = IF(VALUES(updated_at) >= updated_at, VALUES(current_stamina), current_stamina),
    max_stamina = IF(VALUES(updated_at) >= updated_at, VALUES(max_stamina), max_stamina),
    gold = IF(VALUES(updated_at) >= updated_at, VALUES(gold), gold),
    updated_at = GREATEST(VALUES(updated_at), updated_at)"#;

const SELECT_SESSION_USER: &str =
    "SELECT CAST(user_id AS SIGNED) AS user_id FROM user_sessions WHERE token = ? AND expires_at > ?";

/// Store backed by a MySQL connection pool
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connect and make sure the live-state table exists
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Connected to MySQL (max {} connections)", max_connections);
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_STATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    fn record_from_row(row: &MySqlRow) -> Result<CharacterRecord, StoreError> {
        let raw_id: i64 = row.try_get("id")?;
        let character_id = CharacterId::try_from(raw_id)
            .map_err(|_| StoreError::CorruptRow(0, format!("character id {} out of range", raw_id)))?;
        let int_column = |column: &str| -> Result<u32, StoreError> {
            let value: i64 = row.try_get(column)?;
            u32::try_from(value).map_err(|_| {
                StoreError::CorruptRow(character_id, format!("{} = {} out of range", column, value))
            })
        };
        let realm_name: String = row.try_get("realm")?;
        let realm: Realm = realm_name
            .parse()
            .map_err(|e: crate::game::state::UnknownRealm| {
                StoreError::CorruptRow(character_id, e.to_string())
            })?;

        let max_health = row.try_get::<f64, _>("max_health")? as f32;
        let max_mana = row.try_get::<f64, _>("max_mana")? as f32;
        let max_stamina = row.try_get::<f64, _>("max_stamina")? as f32;

        let pos_x: Option<f32> = row.try_get("pos_x")?;
        let pos_y: Option<f32> = row.try_get("pos_y")?;
        let position = match (pos_x, pos_y) {
            (Some(x), Some(y)) => Some(Vec2::new(x, y)),
            _ => None,
        };

        // Characters that never entered the world start with full vitals
        let current = |column: &str, max: f32| -> Result<Vital, StoreError> {
            let value: Option<f32> = row.try_get(column)?;
            Ok(value.map(|v| Vital::new(v, max)).unwrap_or(Vital::full(max)))
        };

        let base_gold = int_column("gold")?;
        let state_gold: Option<u32> = row.try_get("state_gold")?;

        Ok(CharacterRecord {
            character_id,
            user_id: int_column("user_id")?,
            profile: CharacterProfile {
                name: row.try_get("name")?,
                level: int_column("level")?,
                race: row.try_get("race")?,
                class: row.try_get("class")?,
                realm,
            },
            vitals: Vitals {
                health: current("current_health", max_health)?,
                mana: current("current_mana", max_mana)?,
                stamina: current("current_stamina", max_stamina)?,
            },
            gold: state_gold.unwrap_or(base_gold),
            position,
        })
    }
}

#[async_trait]
impl CharacterStore for MySqlStore {
    async fn load_owned_character(
        &self,
        user_id: UserId,
        character_id: CharacterId,
    ) -> Result<Option<CharacterRecord>, StoreError> {
        let row = sqlx::query(SELECT_OWNED_CHARACTER)
            .bind(character_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn upsert_state(&self, state: &CharacterState) -> Result<(), StoreError> {
        let vitals = &state.vitals;
        sqlx::query(UPSERT_STATE)
            .bind(state.character_id)
            .bind(state.position.x)
            .bind(state.position.y)
            .bind(vitals.health.current)
            .bind(vitals.health.max)
            .bind(vitals.mana.current)
            .bind(vitals.mana.max)
            .bind(vitals.stamina.current)
            .bind(vitals.stamina.max)
            .bind(state.gold)
            .bind(state.updated_at_ms)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Authenticator for MySqlStore {
    async fn verify(&self, credential: &str) -> Result<VerifiedUser, AuthError> {
        let credential = check_credential_shape(credential)?;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let row = sqlx::query(SELECT_SESSION_USER)
            .bind(credential)
            .bind(now_ms)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;

        let Some(row) = row else {
            return Err(AuthError::Rejected);
        };
        let user_id: i64 = row.try_get("user_id").map_err(StoreError::from)?;
        Ok(VerifiedUser {
            user_id: UserId::try_from(user_id).map_err(|_| AuthError::Rejected)?,
            session_id: credential.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_assigns_timestamp_last() {
        let update_clause = UPSERT_STATE
            .split("ON DUPLICATE KEY UPDATE")
            .nth(1)
            .unwrap();
        let last_assignment = update_clause.trim().lines().last().unwrap().trim();
        assert!(last_assignment.starts_with("updated_at ="));
    }

    #[test]
    fn test_upsert_placeholders_match_binds() {
        let values = UPSERT_STATE.split("VALUES (").nth(1).unwrap();
        let placeholders = values.split(')').next().unwrap().matches('?').count();
        assert_eq!(placeholders, 11);
    }

    #[test]
    fn test_web_api_columns_are_cast() {
        for column in ["c.id", "c.user_id", "c.level", "c.gold"] {
            assert!(SELECT_OWNED_CHARACTER.contains(&format!("CAST({} AS SIGNED)", column)));
        }
        for column in ["c.max_health", "c.max_mana", "c.max_stamina"] {
            assert!(SELECT_OWNED_CHARACTER.contains(&format!("CAST({} AS DOUBLE)", column)));
        }
        assert!(SELECT_SESSION_USER.contains("CAST(user_id AS SIGNED)"));
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL pointing at a disposable MySQL instance
    async fn test_upsert_roundtrip_against_database() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let store = MySqlStore::connect(&url, 2).await.unwrap();
        let state = CharacterState {
            character_id: 900_001,
            position: Vec2::new(10.0, 20.0),
            vitals: Vitals {
                health: Vital::full(100.0),
                mana: Vital::full(100.0),
                stamina: Vital::full(100.0),
            },
            gold: 0,
            updated_at_ms: 1,
        };
        store.upsert_state(&state).await.unwrap();
    }
}
