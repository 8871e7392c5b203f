//! Asynchronous bridge from the live simulation to the durable store
//!
//! Writes are fire-and-forget from the tick's point of view. At most one write
//! per character is in flight; a request arriving while one is running is
//! skipped, and the periodic full sync picks up whatever was missed.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::game::state::CharacterId;
use crate::metrics::Metrics;
use crate::persistence::store::{CharacterState, CharacterStore};

/// Outcome of one full sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub written: usize,
    pub failed: usize,
}

pub struct PersistenceBridge {
    store: Arc<dyn CharacterStore>,
    in_flight: Arc<Mutex<HashSet<CharacterId>>>,
    metrics: Arc<Metrics>,
}

/// Releases the in-flight slot when the write task finishes (or unwinds)
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<CharacterId>>>,
    character_id: CharacterId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.character_id);
    }
}

impl PersistenceBridge {
    pub fn new(store: Arc<dyn CharacterStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            metrics,
        }
    }

    /// Queue a write; returns `None` when a write for this character is still running
    pub fn persist(&self, state: CharacterState) -> Option<JoinHandle<()>> {
        let character_id = state.character_id;
        if !self.in_flight.lock().insert(character_id) {
            self.metrics.persistence_skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            character_id,
        };
        Some(self.spawn_write(state, Some(guard)))
    }

    /// Write the last state of a departing session regardless of in-flight writes
    pub fn persist_final(&self, state: CharacterState) -> JoinHandle<()> {
        self.spawn_write(state, None)
    }

    fn spawn_write(&self, state: CharacterState, guard: Option<InFlightGuard>) -> JoinHandle<()> {
        let store = self.store.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let _guard = guard;
            match store.upsert_state(&state).await {
                Ok(()) => {
                    metrics.persistence_writes.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    metrics.persistence_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Failed to persist character {}: {} (will retry on next sync)",
                        state.character_id, e
                    );
                }
            }
        })
    }

    /// Write every given state, one after another
    pub async fn full_sync(&self, states: Vec<CharacterState>) -> SyncReport {
        let mut report = SyncReport::default();

        for state in states {
            match self.store.upsert_state(&state).await {
                Ok(()) => report.written += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Full sync failed for character {}: {}", state.character_id, e);
                }
            }
        }

        self.metrics.full_syncs.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .persistence_writes
            .fetch_add(report.written as u64, Ordering::Relaxed);
        self.metrics
            .persistence_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        debug!(
            "Full sync: {} written, {} failed",
            report.written, report.failed
        );
        report
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}
