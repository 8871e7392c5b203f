use crate::config::GameConfig;
use crate::game::state::{MovementState, Vital, VitalKind, Vitals};

/// Per-tick vital deltas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegenRates {
    pub health: f32,
    pub mana: f32,
    pub stamina_idle: f32,
    pub stamina_walk: f32,
    pub stamina_sprint_drain: f32,
}

impl RegenRates {
    pub fn from_config(config: &GameConfig) -> Self {
        Self {
            health: config.health_regen_per_tick,
            mana: config.mana_regen_per_tick,
            stamina_idle: config.stamina_idle_regen_per_tick,
            stamina_walk: config.stamina_walk_regen_per_tick,
            stamina_sprint_drain: config.stamina_sprint_drain_per_tick,
        }
    }

    /// Signed change of `kind` per tick in `state`
    pub fn per_tick(&self, kind: VitalKind, state: MovementState) -> f32 {
        match kind {
            VitalKind::Health => self.health,
            VitalKind::Mana => self.mana,
            VitalKind::Stamina => match state {
                MovementState::Idle => self.stamina_idle,
                MovementState::Walking => self.stamina_walk,
                MovementState::Sprinting => -self.stamina_sprint_drain,
            },
        }
    }

    /// Signed change of `kind` per second, as reported to clients
    pub fn per_second(&self, kind: VitalKind, state: MovementState, ticks_per_second: f32) -> f32 {
        self.per_tick(kind, state) * ticks_per_second
    }
}

impl Default for RegenRates {
    fn default() -> Self {
        Self::from_config(&GameConfig::default())
    }
}

/// Move `vital` toward its max by `amount`; no-op when already full
#[inline]
fn restore(vital: Vital, amount: f32) -> Vital {
    if vital.current >= vital.max {
        return vital;
    }
    Vital {
        current: (vital.current + amount).min(vital.max),
        max: vital.max,
    }
}

#[inline]
fn drain(vital: Vital, amount: f32) -> Vital {
    Vital {
        current: (vital.current - amount).max(0.0),
        max: vital.max,
    }
}

/// Apply one tick of regeneration.
///
/// Sprinting requires stamina; a sprint request with an empty stamina pool is
/// treated as walking. Returns the updated vitals and the state that was
/// actually applied.
pub fn advance_vitals(
    vitals: &Vitals,
    state: MovementState,
    rates: &RegenRates,
) -> (Vitals, MovementState) {
    let state = match state {
        MovementState::Sprinting if vitals.stamina.current <= 0.0 => MovementState::Walking,
        other => other,
    };

    let stamina = match state {
        MovementState::Idle => restore(vitals.stamina, rates.stamina_idle),
        MovementState::Walking => restore(vitals.stamina, rates.stamina_walk),
        MovementState::Sprinting => drain(vitals.stamina, rates.stamina_sprint_drain),
    };

    let updated = Vitals {
        health: restore(vitals.health, rates.health),
        mana: restore(vitals.mana, rates.mana),
        stamina,
    };
    (updated, state)
}
