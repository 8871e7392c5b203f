//! Area of Interest: which NPCs each player can see
//!
//! The view radius is derived from the camera zoom level:
//! `radius = base_view_unit * 2^(reference_zoom - zoom)`, so zooming out
//! (smaller zoom number) doubles the radius per step.
//!
//! Visibility is recomputed per observer and diffed against the previous set
//! so only changes go over the wire.

use smallvec::SmallVec;
use std::collections::HashSet;

use crate::config::GameConfig;
use crate::game::state::{NpcEntity, NpcId};
use crate::util::vec2::Vec2;

/// Zoom-to-radius parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AoiConfig {
    pub base_view_unit: f32,
    pub reference_zoom: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
}

impl AoiConfig {
    pub fn from_game_config(config: &GameConfig) -> Self {
        Self {
            base_view_unit: config.base_view_unit,
            reference_zoom: config.reference_zoom,
            min_zoom: config.min_zoom,
            max_zoom: config.max_zoom,
        }
    }
}

impl Default for AoiConfig {
    fn default() -> Self {
        Self::from_game_config(&GameConfig::default())
    }
}

/// Entities that came into and went out of view since the last computation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityDiff {
    pub entered: SmallVec<[NpcId; 8]>,
    pub left: SmallVec<[NpcId; 8]>,
}

impl VisibilityDiff {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty()
    }
}

/// Ids of all NPCs within `view_distance` of `observer` (boundary inclusive)
pub fn compute_visible(npcs: &[NpcEntity], observer: Vec2, view_distance: f32) -> HashSet<NpcId> {
    // Squared comparison avoids a sqrt per NPC
    let radius_sq = view_distance * view_distance;
    npcs.iter()
        .filter(|npc| npc.position.distance_sq_to(observer) <= radius_sq)
        .map(|npc| npc.id)
        .collect()
}

/// `entered = current - previous`, `left = previous - current`
pub fn diff(previous: &HashSet<NpcId>, current: &HashSet<NpcId>) -> VisibilityDiff {
    let mut entered: SmallVec<[NpcId; 8]> = current.difference(previous).copied().collect();
    let mut left: SmallVec<[NpcId; 8]> = previous.difference(current).copied().collect();
    // Stable order for clients and tests
    entered.sort_unstable();
    left.sort_unstable();
    VisibilityDiff { entered, left }
}

/// Computes per-observer NPC visibility
#[derive(Debug, Clone)]
pub struct AoiManager {
    config: AoiConfig,
}

impl AoiManager {
    pub fn new(config: AoiConfig) -> Self {
        Self { config }
    }

    /// View radius for a camera zoom (clamped to the allowed range)
    #[inline]
    pub fn view_distance(&self, zoom: f32) -> f32 {
        let zoom = if zoom.is_finite() {
            zoom.clamp(self.config.min_zoom, self.config.max_zoom)
        } else {
            self.config.max_zoom
        };
        self.config.base_view_unit * (self.config.reference_zoom - zoom).exp2()
    }

    /// Recompute what an observer sees and replace `visible` with the result
    pub fn refresh(
        &self,
        npcs: &[NpcEntity],
        observer: Vec2,
        zoom: f32,
        visible: &mut HashSet<NpcId>,
    ) -> VisibilityDiff {
        let current = compute_visible(npcs, observer, self.view_distance(zoom));
        let changes = diff(visible, &current);
        *visible = current;
        changes
    }
}

impl Default for AoiManager {
    fn default() -> Self {
        Self::new(AoiConfig::default())
    }
}
