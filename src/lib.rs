//! Regnum realtime server library
//!
//! Server-authoritative player-state sync for the Regnum map: tick loop,
//! vital regeneration, movement validation, NPC visibility and persistence.
//!
//! # Features
//!
//! - `mysql` - MySQL-backed character store via sqlx (enabled by default)
//! - `npc_roaming` - background wandering for NPCs tagged `roaming` (enabled by default)

pub mod anticheat;
pub mod config;
pub mod game;
pub mod metrics;
pub mod net;
pub mod persistence;
pub mod util;
