use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::net::auth::VerifiedUser;
use crate::persistence::store::{CharacterRecord, CharacterState};
use crate::util::vec2::Vec2;

/// Unique identifier for one client connection
pub type ConnectionId = Uuid;

/// Account identifier owned by the login service
pub type UserId = u32;

/// Persistent character identifier
pub type CharacterId = u32;

/// Identifier of a roster NPC
pub type NpcId = u32;

/// The three realms of the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Realm {
    Alsius,
    Ignis,
    Syrtis,
}

impl Realm {
    pub const ALL: [Realm; 3] = [Realm::Alsius, Realm::Ignis, Realm::Syrtis];

    pub fn as_str(&self) -> &'static str {
        match self {
            Realm::Alsius => "alsius",
            Realm::Ignis => "ignis",
            Realm::Syrtis => "syrtis",
        }
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown realm: {0}")]
pub struct UnknownRealm(pub String);

impl FromStr for Realm {
    type Err = UnknownRealm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alsius" => Ok(Realm::Alsius),
            "ignis" => Ok(Realm::Ignis),
            "syrtis" => Ok(Realm::Syrtis),
            _ => Err(UnknownRealm(s.to_string())),
        }
    }
}

/// One regenerating resource
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vital {
    pub current: f32,
    pub max: f32,
}

impl Vital {
    pub fn new(current: f32, max: f32) -> Self {
        Self {
            current: current.clamp(0.0, max),
            max,
        }
    }

    pub fn full(max: f32) -> Self {
        Self { current: max, max }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.current >= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VitalKind {
    Health,
    Mana,
    Stamina,
}

impl VitalKind {
    pub const ALL: [VitalKind; 3] = [VitalKind::Health, VitalKind::Mana, VitalKind::Stamina];

    #[inline]
    fn index(self) -> usize {
        match self {
            VitalKind::Health => 0,
            VitalKind::Mana => 1,
            VitalKind::Stamina => 2,
        }
    }
}

/// Health, mana and stamina of a character
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub health: Vital,
    pub mana: Vital,
    pub stamina: Vital,
}

impl Vitals {
    pub fn get(&self, kind: VitalKind) -> Vital {
        match kind {
            VitalKind::Health => self.health,
            VitalKind::Mana => self.mana,
            VitalKind::Stamina => self.stamina,
        }
    }
}

/// Persistent, non-live attributes of a character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub name: String,
    pub level: u32,
    pub race: String,
    pub class: String,
    pub realm: Realm,
}

/// Character snapshot held by a live session
#[derive(Debug, Clone, PartialEq)]
pub struct Character {
    pub id: CharacterId,
    pub profile: CharacterProfile,
    pub vitals: Vitals,
    pub gold: u32,
}

/// Movement keys a client can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Sprint,
}

impl Key {
    #[inline]
    fn bit(self) -> u8 {
        match self {
            Key::Up => 1 << 0,
            Key::Down => 1 << 1,
            Key::Left => 1 << 2,
            Key::Right => 1 << 3,
            Key::Sprint => 1 << 4,
        }
    }
}

/// Set of currently held movement keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementIntent(u8);

impl MovementIntent {
    pub fn from_keys(keys: &[Key]) -> Self {
        let mut intent = Self::default();
        for key in keys {
            intent.press(*key);
        }
        intent
    }

    pub fn press(&mut self, key: Key) {
        self.0 |= key.bit();
    }

    pub fn release(&mut self, key: Key) {
        self.0 &= !key.bit();
    }

    #[inline]
    pub fn is_held(&self, key: Key) -> bool {
        self.0 & key.bit() != 0
    }

    /// No key held at all
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Unnormalized direction from the held arrow keys; opposing keys cancel
    pub fn direction(&self) -> Vec2 {
        let axis = |negative: Key, positive: Key| -> f32 {
            (self.is_held(positive) as i8 - self.is_held(negative) as i8) as f32
        };
        Vec2::new(axis(Key::Left, Key::Right), axis(Key::Up, Key::Down))
    }

    /// Derive this tick's movement state; sprint needs stamina and a direction
    pub fn classify(&self, stamina: f32) -> MovementState {
        if self.direction() == Vec2::ZERO {
            MovementState::Idle
        } else if self.is_held(Key::Sprint) && stamina > 0.0 {
            MovementState::Sprinting
        } else {
            MovementState::Walking
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MovementState {
    #[default]
    Idle,
    Walking,
    Sprinting,
}

/// Immutable rectangle every position must stay within
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl WorldBounds {
    pub fn new(min_x: f32, max_x: f32, min_y: f32, max_y: f32) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    pub fn clamp(&self, position: Vec2) -> Vec2 {
        Vec2::new(
            position.x.clamp(self.min_x, self.max_x),
            position.y.clamp(self.min_y, self.max_y),
        )
    }

    pub fn contains(&self, position: Vec2) -> bool {
        position.x >= self.min_x
            && position.x <= self.max_x
            && position.y >= self.min_y
            && position.y <= self.max_y
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
        )
    }

    pub fn is_valid(&self) -> bool {
        self.min_x.is_finite()
            && self.max_x.is_finite()
            && self.min_y.is_finite()
            && self.max_y.is_finite()
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        use crate::game::constants::world;
        Self::new(world::MIN_X, world::MAX_X, world::MIN_Y, world::MAX_Y)
    }
}

/// Behaviour tags of a roster NPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NpcRole {
    Merchant,
    Guard,
    Healer,
    Blacksmith,
    QuestGiver,
    Static,
    Roaming,
}

/// Wandering parameters for roaming NPCs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoamParams {
    /// Maximum distance from home
    pub radius: f32,
    /// World units per second
    pub speed: f32,
    /// Return home between waypoints instead of hopping freely
    #[serde(default)]
    pub patrol: bool,
}

/// World actor loaded from static data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcEntity {
    pub id: NpcId,
    pub name: String,
    pub level: u32,
    #[serde(default)]
    pub realm: Option<Realm>,
    pub position: Vec2,
    #[serde(default)]
    pub roles: Vec<NpcRole>,
    #[serde(default)]
    pub roam: Option<RoamParams>,
    /// Anchor for roaming; defaults to the initial position
    #[serde(skip)]
    pub home: Option<Vec2>,
    #[serde(skip)]
    pub waypoint: Option<Vec2>,
}

impl NpcEntity {
    pub fn has_role(&self, role: NpcRole) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_roaming(&self) -> bool {
        self.has_role(NpcRole::Roaming) && self.roam.is_some()
    }

    pub fn home(&self) -> Vec2 {
        self.home.unwrap_or(self.position)
    }
}

/// Value and reported rate of one vital as last sent
#[derive(Debug, Clone, Copy)]
struct SentStat {
    at: Instant,
    value: f32,
    rate: f32,
}

/// Per-vital record of the last stat update sent to the owner
#[derive(Debug, Clone, Default)]
pub struct StatThrottle {
    last_sent: [Option<SentStat>; 3],
}

impl StatThrottle {
    /// True when a full interval has passed since the last send and either the
    /// value or the reported regen rate moved
    pub fn should_send(
        &self,
        kind: VitalKind,
        value: f32,
        rate: f32,
        now: Instant,
        interval: Duration,
    ) -> bool {
        match self.last_sent[kind.index()] {
            None => true,
            Some(sent) => {
                now.saturating_duration_since(sent.at) >= interval
                    && (sent.value != value || sent.rate != rate)
            }
        }
    }

    pub fn mark_sent(&mut self, kind: VitalKind, value: f32, rate: f32, now: Instant) {
        self.last_sent[kind.index()] = Some(SentStat { at: now, value, rate });
    }
}

/// One connected player's live, authoritative state
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    /// Login session the credential resolved to
    pub auth_session_id: String,
    pub character: Character,
    pub position: Vec2,
    pub intent: MovementIntent,
    pub movement_state: MovementState,
    pub zoom: f32,
    /// Last position accepted by the server (speed checks measure from here)
    pub last_accepted_position: Vec2,
    pub last_accepted_at: Instant,
    pub visible_npcs: HashSet<NpcId>,
    pub stat_throttle: StatThrottle,
    /// Recompute visibility next tick even without movement
    pub visibility_dirty: bool,
    /// Position changed during the current tick
    pub moved_this_tick: bool,
    /// State changed since it was last handed to persistence
    pub state_dirty: bool,
}

impl PlayerSession {
    pub fn new(
        connection_id: ConnectionId,
        verified: &VerifiedUser,
        record: CharacterRecord,
        position: Vec2,
        zoom: f32,
        now: Instant,
    ) -> Self {
        Self {
            connection_id,
            user_id: verified.user_id,
            auth_session_id: verified.session_id.clone(),
            character: Character {
                id: record.character_id,
                profile: record.profile,
                vitals: record.vitals,
                gold: record.gold,
            },
            position,
            intent: MovementIntent::default(),
            movement_state: MovementState::Idle,
            zoom,
            last_accepted_position: position,
            last_accepted_at: now,
            visible_npcs: HashSet::new(),
            stat_throttle: StatThrottle::default(),
            visibility_dirty: true,
            moved_this_tick: false,
            state_dirty: false,
        }
    }

    #[inline]
    pub fn character_id(&self) -> CharacterId {
        self.character.id
    }

    /// Record a server-accepted position; the acceptance timestamp never goes backwards
    pub fn accept_position(&mut self, position: Vec2, at: Instant) {
        if position != self.position {
            self.moved_this_tick = true;
            self.visibility_dirty = true;
            self.state_dirty = true;
        }
        self.position = position;
        self.last_accepted_position = position;
        if at > self.last_accepted_at {
            self.last_accepted_at = at;
        }
    }

    /// Durable view of this session
    pub fn to_state(&self, updated_at_ms: u64) -> CharacterState {
        CharacterState {
            character_id: self.character.id,
            position: self.position,
            vitals: self.character.vitals,
            gold: self.character.gold,
            updated_at_ms,
        }
    }
}
