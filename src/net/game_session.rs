//! Live world session: owns every player session and runs the tick
//!
//! The session table is mutated only by the tick (which applies buffered
//! inputs) and by join/leave. Outbound messages are produced as data and
//! dispatched into bounded per-connection queues with `try_send`, so a slow
//! client never stalls a tick.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::anticheat::validator::{MovementValidator, ValidationConfig};
use crate::config::GameConfig;
use crate::game::constants::tick::STATS_LOG_INTERVAL_SECS;
use crate::game::input_buffer::{InputBuffer, InputEvent, InputKind, InputSender};
use crate::game::state::{
    CharacterId, ConnectionId, MovementState, NpcEntity, NpcId, PlayerSession, VitalKind,
};
use crate::game::systems::{movement, regen, roaming};
use crate::game::world::WorldData;
use crate::metrics::Metrics;
use crate::net::aoi::{AoiConfig, AoiManager, VisibilityDiff};
use crate::net::auth::{AuthError, Authenticator, VerifiedUser};
use crate::net::protocol::{NpcSummary, PlayerSummary, ServerMessage};
use crate::net::session::{RegistryFull, SessionRegistry};
use crate::persistence::bridge::PersistenceBridge;
use crate::persistence::store::{CharacterRecord, CharacterState, CharacterStore, StoreError};

/// Milliseconds since the Unix epoch, used to order durable writes
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("Character {0} not found")]
    CharacterNotFound(CharacterId),
    #[error("Character store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Full(#[from] RegistryFull),
}

impl JoinError {
    /// Reason shown to the client; deliberately generic for auth and ownership
    pub fn client_reason(&self) -> &'static str {
        match self {
            JoinError::Auth(_) | JoinError::CharacterNotFound(_) => "Unable to join with this character",
            JoinError::Store(_) => "Service temporarily unavailable",
            JoinError::Full(_) => "Server is full, please try again later",
        }
    }
}

/// Verify the credential and ownership of the requested character
pub async fn authorize_join(
    auth: &dyn Authenticator,
    store: &dyn CharacterStore,
    credential: &str,
    character_id: CharacterId,
) -> Result<(VerifiedUser, CharacterRecord), JoinError> {
    let verified = auth.verify(credential).await?;
    let record = store
        .load_owned_character(verified.user_id, character_id)
        .await?
        .ok_or(JoinError::CharacterNotFound(character_id))?;
    Ok((verified, record))
}

/// Who receives an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Connection(ConnectionId),
    /// Every in-world player except one
    AllExcept(ConnectionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub recipient: Recipient,
    pub message: ServerMessage,
}

impl Outbound {
    pub fn to(connection_id: ConnectionId, message: ServerMessage) -> Self {
        Self {
            recipient: Recipient::Connection(connection_id),
            message,
        }
    }

    pub fn all_except(connection_id: ConnectionId, message: ServerMessage) -> Self {
        Self {
            recipient: Recipient::AllExcept(connection_id),
            message,
        }
    }
}

/// Result of one tick
#[derive(Debug, Default)]
pub struct TickOutput {
    pub outbound: Vec<Outbound>,
    /// Sessions whose state changed and should be written
    pub persist: Vec<CharacterState>,
}

/// Result of a successful join
#[derive(Debug)]
pub struct JoinOutcome {
    pub outbound: Vec<Outbound>,
    /// Final state of sessions replaced by this join
    pub displaced: Vec<CharacterState>,
}

/// Result of a leave
#[derive(Debug)]
pub struct LeaveOutcome {
    pub outbound: Vec<Outbound>,
    pub final_state: CharacterState,
}

/// Counts from one dispatch pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: usize,
    pub dropped: usize,
}

pub struct GameSession {
    config: GameConfig,
    world: WorldData,
    sessions: SessionRegistry,
    connections: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
    input_buffer: InputBuffer,
    aoi: AoiManager,
    validator: MovementValidator,
    rates: regen::RegenRates,
    metrics: Arc<Metrics>,
    tick: u64,
    /// NPC positions changed since the last tick
    npcs_moved: bool,
}

impl GameSession {
    pub fn new(config: GameConfig, world: WorldData, max_sessions: usize, metrics: Arc<Metrics>) -> Self {
        metrics.npc_count.store(world.npcs.len() as u64, Ordering::Relaxed);
        Self {
            sessions: SessionRegistry::new(max_sessions),
            connections: HashMap::new(),
            input_buffer: InputBuffer::new(config.input_buffer_capacity),
            aoi: AoiManager::new(AoiConfig::from_game_config(&config)),
            validator: MovementValidator::new(ValidationConfig::from_game_config(&config)),
            rates: regen::RegenRates::from_config(&config),
            config,
            world,
            metrics,
            tick: 0,
            npcs_moved: false,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn world(&self) -> &WorldData {
        &self.world
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn player_count(&self) -> usize {
        self.sessions.len()
    }

    /// Handle for connection tasks to submit inputs without the session lock
    pub fn input_sender(&self) -> InputSender {
        self.input_buffer.sender()
    }

    /// Attach an outbound queue for a new connection
    pub fn register_connection(&mut self, connection_id: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.connections.insert(connection_id, sender);
    }

    pub fn unregister_connection(&mut self, connection_id: ConnectionId) {
        self.connections.remove(&connection_id);
    }

    /// Create a live session for an authorized character
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        verified: &VerifiedUser,
        record: CharacterRecord,
        now: Instant,
        wall_ms: u64,
    ) -> Result<JoinOutcome, JoinError> {
        let spawn = record
            .position
            .filter(|p| p.is_finite())
            .map(|p| self.world.bounds.clamp(p))
            .unwrap_or_else(|| self.world.spawn_point(record.profile.realm));

        let mut session = PlayerSession::new(
            connection_id,
            verified,
            record,
            spawn,
            self.config.default_zoom,
            now,
        );

        // A live session for the same character is fresher than the store
        let character_id = session.character_id();
        if let Some(live) = self
            .sessions
            .connection_for(character_id)
            .and_then(|conn| self.sessions.get(conn))
        {
            session.position = live.position;
            session.last_accepted_position = live.position;
            session.character.vitals = live.character.vitals;
            session.character.gold = live.character.gold;
        }

        let displaced = self.sessions.insert(session)?;

        let mut outbound = Vec::new();
        let mut displaced_states = Vec::with_capacity(displaced.len());
        for old in displaced {
            if old.connection_id != connection_id {
                outbound.push(Outbound::to(
                    old.connection_id,
                    ServerMessage::Kicked {
                        reason: "Character logged in from another connection".to_string(),
                    },
                ));
            }
            outbound.push(Outbound::all_except(
                connection_id,
                ServerMessage::PlayerLeft {
                    character_id: old.character_id(),
                },
            ));
            displaced_states.push(old.to_state(wall_ms));
        }

        let others: Vec<PlayerSummary> = self
            .sessions
            .iter()
            .filter(|s| s.connection_id != connection_id)
            .map(PlayerSummary::from_session)
            .collect();

        let Some(session) = self.sessions.get_mut(connection_id) else {
            return Ok(JoinOutcome {
                outbound,
                displaced: displaced_states,
            });
        };

        // Initial stats go out with JoinAccepted
        let ticks_per_second = self.config.ticks_per_second();
        for kind in VitalKind::ALL {
            let rate = self.rates.per_second(kind, session.movement_state, ticks_per_second);
            session
                .stat_throttle
                .mark_sent(kind, session.character.vitals.get(kind).current, rate, now);
        }

        outbound.push(Outbound::to(
            connection_id,
            ServerMessage::JoinAccepted {
                character_id: session.character_id(),
                position: session.position,
                vitals: session.character.vitals,
                zoom: session.zoom,
                players: others,
            },
        ));

        let changes = self
            .aoi
            .refresh(&self.world.npcs, session.position, session.zoom, &mut session.visible_npcs);
        session.visibility_dirty = false;
        push_visibility(&mut outbound, connection_id, &changes, &self.world.npcs);

        outbound.push(Outbound::all_except(
            connection_id,
            ServerMessage::PlayerJoined(PlayerSummary::from_session(session)),
        ));

        info!(
            "Character {} ({}) joined on connection {}",
            session.character_id(),
            session.character.profile.name,
            connection_id
        );
        self.metrics
            .sessions_active
            .store(self.sessions.len() as u64, Ordering::Relaxed);

        Ok(JoinOutcome {
            outbound,
            displaced: displaced_states,
        })
    }

    /// Remove a session immediately; later ticks skip it
    pub fn leave(&mut self, connection_id: ConnectionId, wall_ms: u64) -> Option<LeaveOutcome> {
        let session = self.sessions.remove(connection_id)?;
        self.metrics
            .sessions_active
            .store(self.sessions.len() as u64, Ordering::Relaxed);
        info!(
            "Character {} left (connection {})",
            session.character_id(),
            connection_id
        );

        Some(LeaveOutcome {
            outbound: vec![Outbound::all_except(
                connection_id,
                ServerMessage::PlayerLeft {
                    character_id: session.character_id(),
                },
            )],
            final_state: session.to_state(wall_ms),
        })
    }

    /// Tear down a connection: leave the world, notify others, drop the queue.
    /// Returns the final state to persist, if the connection was in the world.
    pub fn disconnect(&mut self, connection_id: ConnectionId, wall_ms: u64) -> Option<CharacterState> {
        let outcome = self.leave(connection_id, wall_ms);
        self.unregister_connection(connection_id);
        let outcome = outcome?;
        self.dispatch(outcome.outbound);
        Some(outcome.final_state)
    }

    /// Apply one buffered input to its session
    fn apply_input(&mut self, input: InputEvent, outbound: &mut Vec<Outbound>) {
        let Some(session) = self.sessions.get_mut(input.connection_id) else {
            debug!("Dropping input for connection {} without a session", input.connection_id);
            return;
        };

        match input.kind {
            InputKind::KeyDown(key) => session.intent.press(key),
            InputKind::KeyUp(key) => session.intent.release(key),
            InputKind::SetZoom(zoom) => {
                session.zoom = self.config.clamp_zoom(zoom);
                session.visibility_dirty = true;
            }
            InputKind::SubmitPosition(position) => {
                match self.validator.validate_submission(
                    session.last_accepted_position,
                    session.last_accepted_at,
                    position,
                    input.received_at,
                    &self.world.bounds,
                ) {
                    Ok(accepted) => session.accept_position(accepted, input.received_at),
                    Err(violation) => {
                        debug!(
                            "Rejected position from character {}: {}",
                            session.character_id(),
                            violation
                        );
                        self.metrics.movement_corrections.fetch_add(1, Ordering::Relaxed);
                        session.position = session.last_accepted_position;
                        outbound.push(Outbound::to(
                            session.connection_id,
                            ServerMessage::MovementCorrected {
                                position: session.last_accepted_position,
                            },
                        ));
                    }
                }
            }
        }
    }

    /// Run one simulation tick at `now`
    pub fn tick(&mut self, now: Instant, wall_ms: u64) -> TickOutput {
        self.tick += 1;
        let mut output = TickOutput::default();

        // Inputs received since the last tick, in arrival order
        for input in self.input_buffer.drain() {
            self.apply_input(input, &mut output.outbound);
        }

        let ticks_per_second = self.config.ticks_per_second();
        let recompute_all = std::mem::take(&mut self.npcs_moved);

        for session in self.sessions.iter_mut() {
            let connection_id = session.connection_id;

            // 1. Classify, 2. regenerate
            let requested = session.intent.classify(session.character.vitals.stamina.current);
            let (vitals, state) = regen::advance_vitals(&session.character.vitals, requested, &self.rates);
            if vitals != session.character.vitals {
                session.character.vitals = vitals;
                session.state_dirty = true;
            }
            session.movement_state = state;

            // 3. Throttled stat updates
            for kind in VitalKind::ALL {
                let vital = vitals.get(kind);
                let rate = self.rates.per_second(kind, state, ticks_per_second);
                if session.stat_throttle.should_send(
                    kind,
                    vital.current,
                    rate,
                    now,
                    self.config.stat_broadcast_interval,
                ) {
                    session.stat_throttle.mark_sent(kind, vital.current, rate, now);
                    output.outbound.push(Outbound::to(
                        connection_id,
                        ServerMessage::StatUpdate {
                            kind,
                            current: vital.current,
                            max: vital.max,
                            regen_per_second: rate,
                            movement: state,
                        },
                    ));
                }
            }

            // 4. Intent movement
            if state != MovementState::Idle {
                let next = movement::apply_intent(
                    session.position,
                    session.intent,
                    state,
                    &self.config,
                    &self.world.bounds,
                );
                session.accept_position(next, now);
            }

            // One echo and one broadcast per tick, whatever moved the player
            if std::mem::take(&mut session.moved_this_tick) {
                output.outbound.push(Outbound::to(
                    connection_id,
                    ServerMessage::PositionEcho {
                        position: session.position,
                    },
                ));
                output.outbound.push(Outbound::all_except(
                    connection_id,
                    ServerMessage::PlayerMoved {
                        character_id: session.character_id(),
                        position: session.position,
                    },
                ));
            }

            // 5. Visibility
            if session.visibility_dirty || recompute_all {
                let changes = self.aoi.refresh(
                    &self.world.npcs,
                    session.position,
                    session.zoom,
                    &mut session.visible_npcs,
                );
                session.visibility_dirty = false;
                push_visibility(&mut output.outbound, connection_id, &changes, &self.world.npcs);
            }

            // 6. Hand changed state to persistence
            if std::mem::take(&mut session.state_dirty) {
                output.persist.push(session.to_state(wall_ms));
            }
        }

        output
    }

    /// Move roaming NPCs and notify the players that can see them
    pub fn roam<R: rand::Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) -> Vec<Outbound> {
        let moved = roaming::roam_step(&mut self.world.npcs, dt, &self.world.bounds, rng);
        if moved.is_empty() {
            return Vec::new();
        }
        self.npcs_moved = true;

        let mut outbound = Vec::new();
        for session in self.sessions.iter() {
            for (npc_id, position) in &moved {
                if session.visible_npcs.contains(npc_id) {
                    outbound.push(Outbound::to(
                        session.connection_id,
                        ServerMessage::NpcMoved {
                            npc_id: *npc_id,
                            position: *position,
                        },
                    ));
                }
            }
        }
        outbound
    }

    /// Durable state of every live session
    pub fn snapshot_states(&self, wall_ms: u64) -> Vec<CharacterState> {
        self.sessions.iter().map(|s| s.to_state(wall_ms)).collect()
    }

    /// Connections an outbound message goes to
    pub fn route(&self, recipient: Recipient) -> Vec<ConnectionId> {
        match recipient {
            Recipient::Connection(id) => vec![id],
            Recipient::AllExcept(excluded) => self
                .sessions
                .iter()
                .map(|s| s.connection_id)
                .filter(|id| *id != excluded)
                .collect(),
        }
    }

    /// Queue messages on their connections without waiting
    pub fn dispatch(&self, outbound: Vec<Outbound>) -> DispatchStats {
        let mut stats = DispatchStats::default();

        for Outbound { recipient, message } in outbound {
            for connection_id in self.route(recipient) {
                // Connection already torn down
                let Some(sender) = self.connections.get(&connection_id) else {
                    continue;
                };
                match sender.try_send(message.clone()) {
                    Ok(()) => stats.sent += 1,
                    Err(TrySendError::Full(_)) => {
                        stats.dropped += 1;
                        debug!("Outbound queue full for {}, dropping message", connection_id);
                    }
                    Err(TrySendError::Closed(_)) => {}
                }
            }
        }

        self.metrics
            .messages_sent
            .fetch_add(stats.sent as u64, Ordering::Relaxed);
        self.metrics
            .messages_dropped
            .fetch_add(stats.dropped as u64, Ordering::Relaxed);
        stats
    }
}

/// Queue non-empty entered/left notifications for one observer
fn push_visibility(
    outbound: &mut Vec<Outbound>,
    connection_id: ConnectionId,
    changes: &VisibilityDiff,
    npcs: &[NpcEntity],
) {
    if !changes.entered.is_empty() {
        let entered: Vec<NpcSummary> = npcs
            .iter()
            .filter(|npc| changes.entered.contains(&npc.id))
            .map(NpcSummary::from_npc)
            .collect();
        outbound.push(Outbound::to(connection_id, ServerMessage::NpcsEntered { npcs: entered }));
    }
    if !changes.left.is_empty() {
        let npc_ids: Vec<NpcId> = changes.left.to_vec();
        outbound.push(Outbound::to(connection_id, ServerMessage::NpcsLeft { npc_ids }));
    }
}

/// Start the simulation loop background task
pub fn start_game_loop(
    session: Arc<RwLock<GameSession>>,
    persistence: Arc<PersistenceBridge>,
    metrics: Arc<Metrics>,
    tick_interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let ticks_per_log = (STATS_LOG_INTERVAL_SECS * 1000 / tick_interval.as_millis().max(1) as u64).max(1);
        info!("Game loop started ({} ms ticks)", tick_interval.as_millis());
        let start = Instant::now();

        loop {
            ticker.tick().await;
            let tick_start = Instant::now();

            let (persist, tick, players) = {
                let mut guard = session.write().await;
                let output = guard.tick(tick_start, unix_millis());
                guard.dispatch(output.outbound);
                (output.persist, guard.current_tick(), guard.player_count())
            };

            // Writes run in their own tasks; the tick never waits on them
            for state in persist {
                persistence.persist(state);
            }

            metrics.record_tick_time(tick_start.elapsed());

            if tick % ticks_per_log == 0 {
                info!(
                    "World: {}s, tick {}, {} players, {} NPCs | p95 tick {}us, {} writes in flight",
                    start.elapsed().as_secs(),
                    tick,
                    players,
                    metrics.npc_count.load(Ordering::Relaxed),
                    metrics.tick_time_p95_us.load(Ordering::Relaxed),
                    persistence.in_flight_count()
                );
            }
        }
    });
}

/// Start the periodic full sync to the durable store
pub fn start_full_sync(
    session: Arc<RwLock<GameSession>>,
    persistence: Arc<PersistenceBridge>,
    sync_interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = interval(sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; nothing to reconcile yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let states = session.read().await.snapshot_states(unix_millis());
            if states.is_empty() {
                continue;
            }
            let report = persistence.full_sync(states).await;
            if report.failed > 0 {
                warn!(
                    "Full sync incomplete: {} written, {} failed",
                    report.written, report.failed
                );
            }
        }
    });
}

/// Start the NPC roaming task
#[cfg(feature = "npc_roaming")]
pub fn start_roaming(session: Arc<RwLock<GameSession>>, roam_interval: Duration) {
    use rand::SeedableRng;

    tokio::spawn(async move {
        let mut rng = rand::rngs::StdRng::from_entropy();
        let mut ticker = interval(roam_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let dt = roam_interval.as_secs_f32();

        loop {
            ticker.tick().await;
            let mut guard = session.write().await;
            let outbound = guard.roam(dt, &mut rng);
            guard.dispatch(outbound);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Key, NpcRole, RoamParams, WorldBounds};
    use crate::net::auth::VerifiedUser;
    use crate::persistence::memory::MemoryStore;
    use crate::util::vec2::Vec2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn npc_at(id: NpcId, x: f32, y: f32) -> NpcEntity {
        NpcEntity {
            id,
            name: format!("npc{}", id),
            level: 5,
            realm: None,
            position: Vec2::new(x, y),
            roles: vec![NpcRole::Static],
            roam: None,
            home: None,
            waypoint: None,
        }
    }

    fn world() -> WorldData {
        WorldData {
            bounds: WorldBounds::new(0.0, 6144.0, 0.0, 6144.0),
            spawn_points: HashMap::new(),
            npcs: vec![npc_at(1, 1000.0, 1000.0), npc_at(2, 5000.0, 5000.0)],
        }
    }

    fn game() -> GameSession {
        GameSession::new(GameConfig::default(), world(), 100, Arc::new(Metrics::new()))
    }

    fn verified(user_id: u32) -> VerifiedUser {
        VerifiedUser {
            user_id,
            session_id: format!("token-{}", user_id),
        }
    }

    fn record_at(character_id: CharacterId, position: Vec2) -> CharacterRecord {
        CharacterRecord {
            position: Some(position),
            ..CharacterRecord::new_for_test(character_id, 1)
        }
    }

    fn join_at(
        game: &mut GameSession,
        character_id: CharacterId,
        position: Vec2,
        now: Instant,
    ) -> (ConnectionId, mpsc::Receiver<ServerMessage>, JoinOutcome) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(64);
        game.register_connection(conn, tx);
        let outcome = game
            .join(conn, &verified(1), record_at(character_id, position), now, 1)
            .unwrap();
        (conn, rx, outcome)
    }

    fn messages_for(game: &GameSession, outbound: &[Outbound], conn: ConnectionId) -> Vec<ServerMessage> {
        outbound
            .iter()
            .filter(|o| game.route(o.recipient).contains(&conn))
            .map(|o| o.message.clone())
            .collect()
    }

    fn press(game: &GameSession, conn: ConnectionId, key: Key, at: Instant) {
        game.input_sender().try_send(conn, InputKind::KeyDown(key), at).unwrap();
    }

    #[test]
    fn test_join_sends_accept_and_initial_npcs() {
        let mut game = game();
        let now = Instant::now();
        let (conn, _rx, outcome) = join_at(&mut game, 10, Vec2::new(1100.0, 1000.0), now);

        let mine = messages_for(&game, &outcome.outbound, conn);
        assert!(matches!(mine[0], ServerMessage::JoinAccepted { character_id: 10, .. }));
        match &mine[1] {
            ServerMessage::NpcsEntered { npcs } => {
                assert_eq!(npcs.len(), 1);
                assert_eq!(npcs[0].id, 1);
            }
            other => panic!("expected NpcsEntered, got {:?}", other),
        }
        assert_eq!(game.player_count(), 1);
    }

    #[test]
    fn test_join_without_position_uses_spawn_point() {
        let mut game = game();
        let conn = Uuid::new_v4();
        let outcome = game
            .join(conn, &verified(1), CharacterRecord::new_for_test(3, 1), Instant::now(), 1)
            .unwrap();
        match &outcome.outbound[0].message {
            ServerMessage::JoinAccepted { position, .. } => {
                assert_eq!(*position, game.world().bounds.center());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_second_join_announced_to_first() {
        let mut game = game();
        let now = Instant::now();
        let (first, _rx1, _) = join_at(&mut game, 10, Vec2::new(100.0, 100.0), now);
        let (second, _rx2, outcome) = join_at(&mut game, 11, Vec2::new(200.0, 100.0), now);

        let to_first = messages_for(&game, &outcome.outbound, first);
        assert!(to_first
            .iter()
            .any(|m| matches!(m, ServerMessage::PlayerJoined(p) if p.character_id == 11)));

        let to_second = messages_for(&game, &outcome.outbound, second);
        match &to_second[0] {
            ServerMessage::JoinAccepted { players, .. } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].character_id, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!to_second.iter().any(|m| matches!(m, ServerMessage::PlayerJoined(_))));
    }

    #[test]
    fn test_duplicate_character_join_kicks_old_connection() {
        let mut game = game();
        let now = Instant::now();
        let (old, _rx1, _) = join_at(&mut game, 10, Vec2::new(100.0, 100.0), now);
        let (new, _rx2, outcome) = join_at(&mut game, 10, Vec2::new(999.0, 999.0), now);

        assert!(outcome
            .outbound
            .iter()
            .any(|o| o.recipient == Recipient::Connection(old)
                && matches!(o.message, ServerMessage::Kicked { .. })));
        assert_eq!(outcome.displaced.len(), 1);
        assert_eq!(game.sessions().connection_for(10), Some(new));
        // Live position carries over instead of the stale stored one
        assert_eq!(game.sessions().get(new).unwrap().position, Vec2::new(100.0, 100.0));
    }

    #[test]
    fn test_idle_full_session_emits_nothing_after_join() {
        let mut game = game();
        let now = Instant::now();
        let (conn, _rx, _) = join_at(&mut game, 10, Vec2::new(3000.0, 3000.0), now);

        let output = game.tick(now + Duration::from_millis(20), 2);
        assert!(messages_for(&game, &output.outbound, conn).is_empty());
        assert!(output.persist.is_empty());
    }

    #[test]
    fn test_key_movement_echoes_to_self_and_broadcasts_to_others() {
        let mut game = game();
        let now = Instant::now();
        let (mover, _rx1, _) = join_at(&mut game, 10, Vec2::new(3000.0, 3000.0), now);
        let (watcher, _rx2, _) = join_at(&mut game, 11, Vec2::new(3100.0, 3000.0), now);

        press(&game, mover, Key::Right, now);
        let output = game.tick(now + Duration::from_millis(20), 2);

        let to_mover = messages_for(&game, &output.outbound, mover);
        let to_watcher = messages_for(&game, &output.outbound, watcher);
        let step = game.config().base_speed_per_tick;

        assert_eq!(
            to_mover
                .iter()
                .filter(|m| matches!(m, ServerMessage::PositionEcho { .. }))
                .count(),
            1
        );
        assert!(!to_mover.iter().any(|m| matches!(m, ServerMessage::PlayerMoved { .. })));
        assert!(to_watcher.contains(&ServerMessage::PlayerMoved {
            character_id: 10,
            position: Vec2::new(3000.0 + step, 3000.0),
        }));
        assert_eq!(output.persist.len(), 1);
        assert_eq!(output.persist[0].character_id, 10);
    }

    #[test]
    fn test_two_movers_only_see_each_other() {
        let mut game = game();
        let now = Instant::now();
        let (a, _rxa, _) = join_at(&mut game, 10, Vec2::new(3000.0, 3000.0), now);
        let (b, _rxb, _) = join_at(&mut game, 11, Vec2::new(3100.0, 3000.0), now);

        press(&game, a, Key::Up, now);
        press(&game, b, Key::Down, now);
        let output = game.tick(now + Duration::from_millis(20), 2);

        for (me, other_id, my_id) in [(a, 11, 10), (b, 10, 11)] {
            let moved: Vec<CharacterId> = messages_for(&game, &output.outbound, me)
                .iter()
                .filter_map(|m| match m {
                    ServerMessage::PlayerMoved { character_id, .. } => Some(*character_id),
                    _ => None,
                })
                .collect();
            assert_eq!(moved, vec![other_id]);
            assert!(!moved.contains(&my_id));
        }
    }

    #[test]
    fn test_coalesced_intent_between_ticks() {
        let mut game = game();
        let now = Instant::now();
        let (conn, _rx, _) = join_at(&mut game, 10, Vec2::new(3000.0, 3000.0), now);

        press(&game, conn, Key::Left, now);
        game.input_sender()
            .try_send(conn, InputKind::KeyUp(Key::Left), now)
            .unwrap();
        let output = game.tick(now + Duration::from_millis(20), 2);

        assert!(!messages_for(&game, &output.outbound, conn)
            .iter()
            .any(|m| matches!(m, ServerMessage::PositionEcho { .. })));
        assert_eq!(game.sessions().get(conn).unwrap().position, Vec2::new(3000.0, 3000.0));
    }

    #[test]
    fn test_sprint_drains_stamina_and_moves_faster() {
        let mut game = game();
        let now = Instant::now();
        let (conn, _rx, _) = join_at(&mut game, 10, Vec2::new(3000.0, 3000.0), now);

        press(&game, conn, Key::Right, now);
        press(&game, conn, Key::Sprint, now);
        game.tick(now + Duration::from_millis(20), 2);

        let session = game.sessions().get(conn).unwrap();
        let config = game.config();
        assert_eq!(session.movement_state, MovementState::Sprinting);
        assert!(session.character.vitals.stamina.current < session.character.vitals.stamina.max);
        let expected = 3000.0 + config.base_speed_per_tick * config.sprint_multiplier;
        assert!((session.position.x - expected).abs() < 1e-3);
    }

    #[test]
    fn test_valid_submission_accepted() {
        let mut game = game();
        let now = Instant::now();
        let (conn, _rx, _) = join_at(&mut game, 10, Vec2::new(3000.0, 3000.0), now);

        let received = now + Duration::from_millis(500);
        game.input_sender()
            .try_send(conn, InputKind::SubmitPosition(Vec2::new(3100.0, 3000.0)), received)
            .unwrap();
        let output = game.tick(received, 2);

        let session = game.sessions().get(conn).unwrap();
        assert_eq!(session.position, Vec2::new(3100.0, 3000.0));
        assert_eq!(session.last_accepted_at, received);
        assert!(messages_for(&game, &output.outbound, conn)
            .contains(&ServerMessage::PositionEcho {
                position: Vec2::new(3100.0, 3000.0)
            }));
    }

    #[test]
    fn test_teleport_submission_corrected() {
        let mut game = game();
        let now = Instant::now();
        let (conn, _rx, _) = join_at(&mut game, 10, Vec2::new(3000.0, 3000.0), now);

        let received = now + Duration::from_millis(100);
        game.input_sender()
            .try_send(conn, InputKind::SubmitPosition(Vec2::new(6000.0, 6000.0)), received)
            .unwrap();
        let output = game.tick(received, 2);

        let mine = messages_for(&game, &output.outbound, conn);
        assert!(mine.contains(&ServerMessage::MovementCorrected {
            position: Vec2::new(3000.0, 3000.0)
        }));
        assert!(!mine.iter().any(|m| matches!(m, ServerMessage::PositionEcho { .. })));
        assert_eq!(game.sessions().get(conn).unwrap().position, Vec2::new(3000.0, 3000.0));
    }

    #[test]
    fn test_zoom_change_recomputes_visibility() {
        let mut game = game();
        let now = Instant::now();
        // Far from both NPCs at default zoom
        let (conn, _rx, outcome) = join_at(&mut game, 10, Vec2::new(3000.0, 3000.0), now);
        assert!(!messages_for(&game, &outcome.outbound, conn)
            .iter()
            .any(|m| matches!(m, ServerMessage::NpcsEntered { .. })));

        game.input_sender()
            .try_send(conn, InputKind::SetZoom(1.0), now)
            .unwrap();
        let output = game.tick(now + Duration::from_millis(20), 2);

        let entered: Vec<NpcId> = messages_for(&game, &output.outbound, conn)
            .iter()
            .flat_map(|m| match m {
                ServerMessage::NpcsEntered { npcs } => npcs.iter().map(|n| n.id).collect(),
                _ => Vec::new(),
            })
            .collect();
        assert_eq!(entered.len(), 2);
        assert_eq!(game.sessions().get(conn).unwrap().visible_npcs.len(), 2);
    }

    #[test]
    fn test_stat_updates_throttled() {
        let mut game = game();
        let now = Instant::now();
        let conn = Uuid::new_v4();
        let mut record = record_at(10, Vec2::new(3000.0, 3000.0));
        record.vitals.health = crate::game::state::Vital::new(50.0, 100.0);
        game.join(conn, &verified(1), record, now, 1).unwrap();

        let count_health = |output: &TickOutput| {
            output
                .outbound
                .iter()
                .filter(|o| {
                    matches!(
                        o.message,
                        ServerMessage::StatUpdate {
                            kind: VitalKind::Health,
                            ..
                        }
                    )
                })
                .count()
        };

        let mut sent = 0;
        // 2 seconds of ticks at 20 ms
        for i in 1..=100u64 {
            let output = game.tick(now + Duration::from_millis(20 * i), 1 + i);
            sent += count_health(&output);
        }
        assert_eq!(sent, 2);
    }

    #[test]
    fn test_full_stamina_reports_new_rate_when_walking() {
        let mut game = game();
        let now = Instant::now();
        let (conn, _rx, _) = join_at(&mut game, 10, Vec2::new(3000.0, 3000.0), now);
        press(&game, conn, Key::Up, now);

        let walk_rate = game
            .rates
            .per_second(VitalKind::Stamina, MovementState::Walking, game.config.ticks_per_second());
        let mut updates = Vec::new();
        for i in 1..=60u64 {
            let output = game.tick(now + Duration::from_millis(20 * i), 1 + i);
            for o in output.outbound {
                if let ServerMessage::StatUpdate {
                    kind: VitalKind::Stamina,
                    current,
                    regen_per_second,
                    movement,
                    ..
                } = o.message
                {
                    updates.push((current, regen_per_second, movement));
                }
            }
        }
        assert_eq!(updates, vec![(100.0, walk_rate, MovementState::Walking)]);
    }

    #[test]
    fn test_leave_removes_session_and_notifies_others() {
        let mut game = game();
        let now = Instant::now();
        let (a, _rxa, _) = join_at(&mut game, 10, Vec2::new(100.0, 100.0), now);
        let (b, _rxb, _) = join_at(&mut game, 11, Vec2::new(200.0, 100.0), now);

        let outcome = game.leave(a, 5).unwrap();
        assert_eq!(outcome.final_state.character_id, 10);
        assert_eq!(outcome.final_state.updated_at_ms, 5);
        assert_eq!(
            messages_for(&game, &outcome.outbound, b),
            vec![ServerMessage::PlayerLeft { character_id: 10 }]
        );
        assert!(game.leave(a, 6).is_none());

        // Inputs for the departed connection are skipped
        press(&game, a, Key::Up, now);
        let output = game.tick(now + Duration::from_millis(20), 7);
        assert!(messages_for(&game, &output.outbound, b).is_empty());
    }

    #[test]
    fn test_disconnect_notifies_and_unregisters() {
        let mut game = game();
        let now = Instant::now();
        let (a, mut rxa, _) = join_at(&mut game, 10, Vec2::new(100.0, 100.0), now);
        let (b, mut rxb, _) = join_at(&mut game, 11, Vec2::new(200.0, 100.0), now);

        let state = game.disconnect(a, 9).unwrap();
        assert_eq!(state.character_id, 10);
        assert_eq!(rxb.try_recv().unwrap(), ServerMessage::PlayerLeft { character_id: 10 });
        assert!(rxa.try_recv().is_err());
        assert!(game.disconnect(a, 10).is_none());
        assert!(game.sessions().contains(b));
    }

    #[test]
    fn test_dispatch_skips_missing_and_counts_full() {
        let metrics = Arc::new(Metrics::new());
        let mut game = GameSession::new(GameConfig::default(), world(), 10, metrics.clone());
        let conn = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(1);
        game.register_connection(conn, tx);

        let stats = game.dispatch(vec![
            Outbound::to(conn, ServerMessage::PlayerLeft { character_id: 1 }),
            Outbound::to(conn, ServerMessage::PlayerLeft { character_id: 2 }),
            Outbound::to(Uuid::new_v4(), ServerMessage::PlayerLeft { character_id: 3 }),
        ]);

        assert_eq!(stats, DispatchStats { sent: 1, dropped: 1 });
        assert_eq!(metrics.messages_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::PlayerLeft { character_id: 1 });
    }

    #[test]
    fn test_positions_stay_in_bounds_at_edges() {
        let mut game = game();
        let now = Instant::now();
        let (conn, _rx, _) = join_at(&mut game, 10, Vec2::new(1.0, 1.0), now);

        press(&game, conn, Key::Up, now);
        press(&game, conn, Key::Left, now);
        for i in 1..=10u64 {
            game.tick(now + Duration::from_millis(20 * i), 1 + i);
        }
        let position = game.sessions().get(conn).unwrap().position;
        assert!(game.world().bounds.contains(position));
        assert_eq!(position, Vec2::new(0.0, 0.0));
    }

    #[test]
    fn test_roaming_npc_notifies_observers() {
        let mut world = world();
        let home = Vec2::new(3000.0, 3000.0);
        world.npcs.push(NpcEntity {
            id: 7,
            name: "Wolf".to_string(),
            level: 3,
            realm: None,
            position: home,
            roles: vec![NpcRole::Roaming],
            roam: Some(RoamParams {
                radius: 50.0,
                speed: 20.0,
                patrol: false,
            }),
            home: Some(home),
            waypoint: None,
        });
        let mut game = GameSession::new(GameConfig::default(), world, 10, Arc::new(Metrics::new()));
        let now = Instant::now();
        let (near, _rx1, _) = join_at(&mut game, 10, Vec2::new(3010.0, 3000.0), now);
        let (far, _rx2, _) = join_at(&mut game, 11, Vec2::new(6000.0, 100.0), now);

        let mut rng = StdRng::seed_from_u64(11);
        let mut outbound = Vec::new();
        for _ in 0..5 {
            outbound.extend(game.roam(0.5, &mut rng));
        }

        assert!(messages_for(&game, &outbound, near)
            .iter()
            .any(|m| matches!(m, ServerMessage::NpcMoved { npc_id: 7, .. })));
        assert!(messages_for(&game, &outbound, far).is_empty());
    }

    #[tokio::test]
    async fn test_authorize_join_checks_ownership() {
        let store = MemoryStore::new();
        store.insert_character(CharacterRecord::new_for_test(10, 1));
        let token = store.issue_token(1);
        let stranger = store.issue_token(2);

        let (user, record) = authorize_join(&store, &store, &token, 10).await.unwrap();
        assert_eq!(user.user_id, 1);
        assert_eq!(record.character_id, 10);

        assert!(matches!(
            authorize_join(&store, &store, &stranger, 10).await,
            Err(JoinError::CharacterNotFound(10))
        ));
        assert!(matches!(
            authorize_join(&store, &store, "bogus", 10).await,
            Err(JoinError::Auth(AuthError::Rejected))
        ));
    }
}
