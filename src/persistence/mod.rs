//! Durable storage of character state
//!
//! The live session table is authoritative; everything here is eventually
//! consistent with it. [`bridge::PersistenceBridge`] is the only writer the
//! simulation talks to.

pub mod bridge;
pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod store;
