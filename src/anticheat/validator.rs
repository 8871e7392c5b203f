use std::time::{Duration, Instant};

use crate::config::GameConfig;
use crate::game::state::WorldBounds;
use crate::game::systems::movement::clamp_to_bounds;
use crate::util::vec2::Vec2;

/// Violations detected by the speed check
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheatViolation {
    #[error("NaN or Infinity in submitted position")]
    InvalidFloats,
    #[error("Submission arrived {elapsed_ms} ms after the last accepted position")]
    TooSoon { elapsed_ms: u64 },
    #[error("Implied speed {implied:.1} exceeds maximum {max:.1}")]
    SpeedExceeded { implied: f32, max: f32 },
}

/// Configuration for direct position validation
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// World units per second
    pub max_speed: f32,
    /// Submissions arriving sooner than this after the last acceptance are rejected
    pub min_interval: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self::from_game_config(&GameConfig::default())
    }
}

impl ValidationConfig {
    pub fn from_game_config(config: &GameConfig) -> Self {
        Self {
            max_speed: config.max_submission_speed,
            min_interval: config.min_submission_interval,
        }
    }
}

/// Server-side authority for client-submitted absolute positions
#[derive(Debug, Clone)]
pub struct MovementValidator {
    config: ValidationConfig,
}

impl MovementValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate a submitted position against the last accepted one.
    ///
    /// The submission is clamped to bounds first; the implied speed is the
    /// clamped distance over the full elapsed time. Zero elapsed time, or less
    /// than the configured floor, is rejected. Returns the position to accept.
    pub fn validate_submission(
        &self,
        last_position: Vec2,
        last_accepted_at: Instant,
        submitted: Vec2,
        received_at: Instant,
        bounds: &WorldBounds,
    ) -> Result<Vec2, CheatViolation> {
        if !submitted.is_finite() {
            return Err(CheatViolation::InvalidFloats);
        }
        let target = clamp_to_bounds(submitted, bounds, last_position);

        let elapsed = received_at.saturating_duration_since(last_accepted_at);
        if elapsed.is_zero() || elapsed < self.config.min_interval {
            return Err(CheatViolation::TooSoon {
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        let distance = last_position.distance_to(target);
        let implied = distance / elapsed.as_secs_f32();
        if implied > self.config.max_speed {
            return Err(CheatViolation::SpeedExceeded {
                implied,
                max: self.config.max_speed,
            });
        }

        Ok(target)
    }
}

impl Default for MovementValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}
