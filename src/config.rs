use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::constants::{movement, net, regen, session, tick, view};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Port cannot be 0")]
    ZeroPort,
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("Stat broadcast interval must not be shorter than the tick interval")]
    StatIntervalBelowTick,
    #[error("Zoom range invalid: min {min} <= default {default} <= max {max} does not hold")]
    ZoomRange { min: f32, default: f32, max: f32 },
    #[error("TLS_CERT_PATH and TLS_KEY_PATH must be set together")]
    PartialTls,
}

/// Read `name` from the environment and parse it, keeping `current` when the
/// variable is absent, unparseable or rejected by `accept`
fn env_override<T: FromStr>(name: &str, current: &mut T, accept: impl Fn(&T) -> bool) {
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) if accept(&parsed) => *current = parsed,
        Ok(_) => tracing::warn!("{} value '{}' out of range, using default", name, raw),
        Err(_) => tracing::warn!("Invalid {} '{}', using default", name, raw),
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Port of the Prometheus endpoint
    pub metrics_port: u16,
    /// Maximum number of live sessions
    pub max_sessions: usize,
    /// Path to TLS certificate file (PEM); `certs/cert.pem` is tried when absent
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file (PEM)
    pub tls_key_path: Option<String>,
    /// MySQL connection string; the in-memory store is used when absent
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// JSON file with bounds, spawn points and the NPC roster
    pub world_data_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            metrics_port: 9090,
            max_sessions: session::MAX_SESSIONS,
            tls_cert_path: None,
            tls_key_path: None,
            database_url: None,
            database_max_connections: 10,
            world_data_path: Some("data/world.json".to_string()),
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        env_override("BIND_ADDRESS", &mut config.bind_address, |_| true);
        env_override("PORT", &mut config.port, |p| *p > 0);
        env_override("METRICS_PORT", &mut config.metrics_port, |p| *p > 0);
        env_override("MAX_SESSIONS", &mut config.max_sessions, |n| {
            *n > 0 && *n <= 100_000
        });
        env_override("DATABASE_MAX_CONNECTIONS", &mut config.database_max_connections, |n| {
            *n > 0 && *n <= 1000
        });

        if let Some(cert_path) = env_string("TLS_CERT_PATH") {
            config.tls_cert_path = Some(cert_path);
        }
        if let Some(key_path) = env_string("TLS_KEY_PATH") {
            config.tls_key_path = Some(key_path);
        }
        if let Some(url) = env_string("DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Some(path) = env_string("WORLD_DATA_PATH") {
            config.world_data_path = Some(path);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::NotPositive("max_sessions"));
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err(ConfigError::PartialTls);
        }
        Ok(())
    }
}

/// Simulation tunables
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub tick_interval: Duration,
    /// Minimum gap between two stat updates of the same vital
    pub stat_broadcast_interval: Duration,
    pub full_sync_interval: Duration,
    pub roam_interval: Duration,

    pub health_regen_per_tick: f32,
    pub mana_regen_per_tick: f32,
    pub stamina_idle_regen_per_tick: f32,
    pub stamina_walk_regen_per_tick: f32,
    pub stamina_sprint_drain_per_tick: f32,

    /// World units per tick for intent-driven movement
    pub base_speed_per_tick: f32,
    pub sprint_multiplier: f32,
    /// World units per second a direct submission may imply
    pub max_submission_speed: f32,
    /// Minimum elapsed time between a submission and the last acceptance
    pub min_submission_interval: Duration,

    pub base_view_unit: f32,
    pub reference_zoom: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
    pub default_zoom: f32,

    pub max_events_per_second: u32,
    pub max_rate_violations: u32,
    pub outbound_queue_size: usize,
    pub input_buffer_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(tick::TICK_DURATION_MS),
            stat_broadcast_interval: Duration::from_millis(tick::STAT_BROADCAST_INTERVAL_MS),
            full_sync_interval: Duration::from_secs(tick::FULL_SYNC_INTERVAL_SECS),
            roam_interval: Duration::from_millis(tick::ROAM_INTERVAL_MS),
            health_regen_per_tick: regen::HEALTH_PER_TICK,
            mana_regen_per_tick: regen::MANA_PER_TICK,
            stamina_idle_regen_per_tick: regen::STAMINA_IDLE_PER_TICK,
            stamina_walk_regen_per_tick: regen::STAMINA_WALK_PER_TICK,
            stamina_sprint_drain_per_tick: regen::STAMINA_SPRINT_DRAIN_PER_TICK,
            base_speed_per_tick: movement::BASE_SPEED_PER_TICK,
            sprint_multiplier: movement::SPRINT_MULTIPLIER,
            max_submission_speed: movement::MAX_SUBMISSION_SPEED,
            min_submission_interval: Duration::from_millis(movement::MIN_SUBMISSION_INTERVAL_MS),
            base_view_unit: view::BASE_VIEW_UNIT,
            reference_zoom: view::REFERENCE_ZOOM,
            min_zoom: view::MIN_ZOOM,
            max_zoom: view::MAX_ZOOM,
            default_zoom: view::DEFAULT_ZOOM,
            max_events_per_second: net::MAX_EVENTS_PER_SECOND,
            max_rate_violations: net::MAX_RATE_VIOLATIONS,
            outbound_queue_size: net::OUTBOUND_QUEUE_SIZE,
            input_buffer_capacity: net::INPUT_BUFFER_CAPACITY,
        }
    }
}

impl GameConfig {
    /// Load tunables from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        let mut tick_ms = config.tick_interval.as_millis() as u64;
        env_override("TICK_INTERVAL_MS", &mut tick_ms, |ms| (1..=1000).contains(ms));
        config.tick_interval = Duration::from_millis(tick_ms);

        let mut stat_ms = config.stat_broadcast_interval.as_millis() as u64;
        env_override("STAT_BROADCAST_INTERVAL_MS", &mut stat_ms, |ms| *ms > 0);
        config.stat_broadcast_interval = Duration::from_millis(stat_ms);

        let mut sync_secs = config.full_sync_interval.as_secs();
        env_override("FULL_SYNC_INTERVAL_SECS", &mut sync_secs, |s| *s > 0);
        config.full_sync_interval = Duration::from_secs(sync_secs);

        let mut roam_ms = config.roam_interval.as_millis() as u64;
        env_override("ROAM_INTERVAL_MS", &mut roam_ms, |ms| *ms > 0);
        config.roam_interval = Duration::from_millis(roam_ms);

        env_override("MAX_SUBMISSION_SPEED", &mut config.max_submission_speed, |v| {
            v.is_finite() && *v > 0.0
        });

        let mut floor_ms = config.min_submission_interval.as_millis() as u64;
        env_override("MIN_SUBMISSION_INTERVAL_MS", &mut floor_ms, |ms| *ms <= 1000);
        config.min_submission_interval = Duration::from_millis(floor_ms);

        config
    }

    /// Tick rate in ticks per second
    pub fn ticks_per_second(&self) -> f32 {
        1.0 / self.tick_interval.as_secs_f32()
    }

    /// Clamp a requested zoom into the allowed range
    pub fn clamp_zoom(&self, zoom: f32) -> f32 {
        if zoom.is_finite() {
            zoom.clamp(self.min_zoom, self.max_zoom)
        } else {
            self.default_zoom
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::NotPositive("tick_interval"));
        }
        if self.stat_broadcast_interval < self.tick_interval {
            return Err(ConfigError::StatIntervalBelowTick);
        }
        if self.max_submission_speed <= 0.0 {
            return Err(ConfigError::NotPositive("max_submission_speed"));
        }
        if self.base_view_unit <= 0.0 {
            return Err(ConfigError::NotPositive("base_view_unit"));
        }
        if !(self.min_zoom <= self.default_zoom && self.default_zoom <= self.max_zoom) {
            return Err(ConfigError::ZoomRange {
                min: self.min_zoom,
                default: self.default_zoom,
                max: self.max_zoom,
            });
        }
        if self.outbound_queue_size == 0 {
            return Err(ConfigError::NotPositive("outbound_queue_size"));
        }
        if self.input_buffer_capacity == 0 {
            return Err(ConfigError::NotPositive("input_buffer_capacity"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4433);
        assert_eq!(config.metrics_port, 9090);
        assert!(config.database_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = ServerConfig::load_or_default();
        assert!(config.port > 0);
    }

    #[test]
    fn test_partial_tls_rejected() {
        let config = ServerConfig {
            tls_cert_path: Some("cert.pem".to_string()),
            ..ServerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::PartialTls));
    }

    #[test]
    fn test_game_defaults_valid() {
        let config = GameConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval, Duration::from_millis(20));
        assert!((config.ticks_per_second() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_stat_interval_below_tick_rejected() {
        let config = GameConfig {
            stat_broadcast_interval: Duration::from_millis(5),
            ..GameConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::StatIntervalBelowTick));
    }

    #[test]
    fn test_zoom_range_checked() {
        let config = GameConfig {
            default_zoom: 12.0,
            ..GameConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZoomRange { .. })));
    }

    #[test]
    fn test_clamp_zoom() {
        let config = GameConfig::default();
        assert_eq!(config.clamp_zoom(0.0), config.min_zoom);
        assert_eq!(config.clamp_zoom(100.0), config.max_zoom);
        assert_eq!(config.clamp_zoom(f32::NAN), config.default_zoom);
        assert_eq!(config.clamp_zoom(5.0), 5.0);
    }

    #[test]
    fn test_env_override_rejects_out_of_range() {
        let mut value: u64 = 20;
        std::env::set_var("REGNUM_TEST_TICK_OVERRIDE", "0");
        env_override("REGNUM_TEST_TICK_OVERRIDE", &mut value, |ms| *ms > 0);
        assert_eq!(value, 20);

        std::env::set_var("REGNUM_TEST_TICK_OVERRIDE", " 40 ");
        env_override("REGNUM_TEST_TICK_OVERRIDE", &mut value, |ms| *ms > 0);
        assert_eq!(value, 40);
        std::env::remove_var("REGNUM_TEST_TICK_OVERRIDE");
    }
}
