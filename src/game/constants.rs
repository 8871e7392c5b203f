//! Compile-time defaults for every simulation tunable.
//!
//! Runtime overrides go through [`crate::config::GameConfig`]; nothing in the
//! simulation reads these directly except to build that config.

/// Simulation cadence
pub mod tick {
    /// Simulation ticks per second
    pub const TICK_RATE: u32 = 50;
    /// Tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 1000 / TICK_RATE as u64;
    /// Minimum time between two stat updates for the same vital
    pub const STAT_BROADCAST_INTERVAL_MS: u64 = 1000;
    /// Interval of the reconciling full sync to the durable store
    pub const FULL_SYNC_INTERVAL_SECS: u64 = 30;
    /// Interval of the NPC roaming pass
    pub const ROAM_INTERVAL_MS: u64 = 500;
    /// How often the game loop logs a summary line
    pub const STATS_LOG_INTERVAL_SECS: u64 = 30;
}

/// Per-tick vital regeneration amounts
pub mod regen {
    /// Health restored per tick while below max
    pub const HEALTH_PER_TICK: f32 = 0.05;
    /// Mana restored per tick while below max
    pub const MANA_PER_TICK: f32 = 0.05;
    /// Stamina restored per tick while standing still
    pub const STAMINA_IDLE_PER_TICK: f32 = 0.2;
    /// Stamina restored per tick while walking
    pub const STAMINA_WALK_PER_TICK: f32 = 0.05;
    /// Stamina drained per tick while sprinting
    pub const STAMINA_SPRINT_DRAIN_PER_TICK: f32 = 0.25;
}

/// Movement speeds and the anti-cheat speed ceiling
pub mod movement {
    /// World units travelled per tick while walking (100 u/s at 50 Hz)
    pub const BASE_SPEED_PER_TICK: f32 = 2.0;
    /// Speed multiplier while sprinting with stamina left
    pub const SPRINT_MULTIPLIER: f32 = 1.75;
    /// Highest implied speed (world units / second) a direct submission may have
    pub const MAX_SUBMISSION_SPEED: f32 = 250.0;
    /// Submissions closer than this to the last acceptance are rejected; 0 only rejects zero
    pub const MIN_SUBMISSION_INTERVAL_MS: u64 = 0;
}

/// Camera zoom to view distance: `BASE_VIEW_UNIT * 2^(REFERENCE_ZOOM - zoom)`
pub mod view {
    pub const BASE_VIEW_UNIT: f32 = 256.0;
    pub const REFERENCE_ZOOM: f32 = 6.0;
    pub const MIN_ZOOM: f32 = 1.0;
    pub const MAX_ZOOM: f32 = 9.0;
    /// Zoom assumed until the client reports its camera (1024 units)
    pub const DEFAULT_ZOOM: f32 = 4.0;
}

/// Default world rectangle when the world data file does not define one
pub mod world {
    pub const MIN_X: f32 = 0.0;
    pub const MAX_X: f32 = 6144.0;
    pub const MIN_Y: f32 = 0.0;
    pub const MAX_Y: f32 = 6144.0;
}

/// Network limits
pub mod net {
    /// Maximum reliable message size
    pub const MAX_MESSAGE_SIZE: usize = 65536;
    /// Per-connection outbound queue length
    pub const OUTBOUND_QUEUE_SIZE: usize = 256;
    /// Shared inbound input buffer capacity (all connections)
    pub const INPUT_BUFFER_CAPACITY: usize = 4096;
    /// Inbound events allowed per connection per second
    pub const MAX_EVENTS_PER_SECOND: u32 = 60;
    /// Rate limit violations before the connection is dropped
    pub const MAX_RATE_VIOLATIONS: u32 = 20;
}

/// Session limits
pub mod session {
    /// Maximum concurrent live sessions
    pub const MAX_SESSIONS: usize = 2000;
}
