use serde::{Deserialize, Serialize};

use crate::game::state::{
    CharacterId, Key, MovementState, NpcEntity, NpcId, NpcRole, PlayerSession, Realm, VitalKind,
    Vitals,
};
use crate::util::vec2::Vec2;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Enter the world with a character owned by the credential's user
    Join { credential: String, character_id: CharacterId },
    /// Movement key pressed
    KeyDown(Key),
    /// Movement key released
    KeyUp(Key),
    /// Absolute target position (click/drag movement)
    SubmitPosition { position: Vec2 },
    /// Camera zoom changed
    SetZoom { zoom: f32 },
    /// Ping for latency measurement
    Ping { timestamp: u64 },
    /// Leave the world
    Leave,
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Join succeeded
    JoinAccepted {
        character_id: CharacterId,
        position: Vec2,
        vitals: Vitals,
        zoom: f32,
        players: Vec<PlayerSummary>,
    },
    /// Join failed; the connection stays open
    JoinRejected { reason: String },
    /// Session ended by the server
    Kicked { reason: String },
    /// Authoritative position of the receiving player
    PositionEcho { position: Vec2 },
    /// A submitted position was rejected; client must snap back
    MovementCorrected { position: Vec2 },
    /// One vital of the receiving player
    StatUpdate {
        kind: VitalKind,
        current: f32,
        max: f32,
        regen_per_second: f32,
        movement: MovementState,
    },
    /// NPCs that came into view
    NpcsEntered { npcs: Vec<NpcSummary> },
    /// NPCs that went out of view
    NpcsLeft { npc_ids: Vec<NpcId> },
    /// Another player entered the world
    PlayerJoined(PlayerSummary),
    /// Another player moved
    PlayerMoved { character_id: CharacterId, position: Vec2 },
    /// Another player left the world
    PlayerLeft { character_id: CharacterId },
    /// A visible NPC moved
    NpcMoved { npc_id: NpcId, position: Vec2 },
    /// Pong response with server timestamp
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

/// Public view of a player sent to others
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub character_id: CharacterId,
    pub name: String,
    pub level: u32,
    pub race: String,
    pub class: String,
    pub realm: Realm,
    pub position: Vec2,
}

impl PlayerSummary {
    pub fn from_session(session: &PlayerSession) -> Self {
        let profile = &session.character.profile;
        Self {
            character_id: session.character.id,
            name: profile.name.clone(),
            level: profile.level,
            race: profile.race.clone(),
            class: profile.class.clone(),
            realm: profile.realm,
            position: session.position,
        }
    }
}

/// Public view of an NPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcSummary {
    pub id: NpcId,
    pub name: String,
    pub level: u32,
    pub realm: Option<Realm>,
    pub position: Vec2,
    pub roles: Vec<NpcRole>,
}

impl NpcSummary {
    pub fn from_npc(npc: &NpcEntity) -> Self {
        Self {
            id: npc.id,
            name: npc.name.clone(),
            level: npc.level,
            realm: npc.realm,
            position: npc.position,
            roles: npc.roles.clone(),
        }
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers (compatible with the browser client)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
