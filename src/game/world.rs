//! Static world data: bounds, realm spawn points and the NPC roster

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::game::state::{NpcEntity, Realm, WorldBounds};
use crate::util::vec2::Vec2;

#[derive(Debug, thiserror::Error)]
pub enum WorldDataError {
    #[error("Failed to read world data: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse world data: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid world bounds")]
    InvalidBounds,
    #[error("Duplicate NPC id {0}")]
    DuplicateNpc(u32),
    #[error("NPC {0} is outside the world bounds")]
    NpcOutOfBounds(u32),
    #[error("Spawn point for {0} is outside the world bounds")]
    SpawnOutOfBounds(Realm),
}

/// Immutable world description loaded at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldData {
    #[serde(default)]
    pub bounds: WorldBounds,
    #[serde(default)]
    pub spawn_points: HashMap<Realm, Vec2>,
    #[serde(default)]
    pub npcs: Vec<NpcEntity>,
}

impl Default for WorldData {
    fn default() -> Self {
        Self {
            bounds: WorldBounds::default(),
            spawn_points: HashMap::new(),
            npcs: Vec::new(),
        }
    }
}

impl WorldData {
    pub fn from_json_str(json: &str) -> Result<Self, WorldDataError> {
        let mut data: WorldData = serde_json::from_str(json)?;
        data.validate()?;
        for npc in &mut data.npcs {
            npc.home = Some(npc.position);
        }
        Ok(data)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorldDataError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Load from `path` if given, falling back to an empty world
    pub fn load_or_default(path: Option<&str>) -> Self {
        let Some(path) = path else {
            warn!("No world data configured, starting with an empty NPC roster");
            return Self::default();
        };

        match Self::load(path) {
            Ok(data) => {
                info!(
                    "Loaded world data from {}: {} NPCs, bounds {:?}",
                    path,
                    data.npcs.len(),
                    data.bounds
                );
                data
            }
            Err(e) => {
                warn!("Could not load world data from {}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), WorldDataError> {
        if !self.bounds.is_valid() {
            return Err(WorldDataError::InvalidBounds);
        }

        let mut seen = HashSet::with_capacity(self.npcs.len());
        for npc in &self.npcs {
            if !seen.insert(npc.id) {
                return Err(WorldDataError::DuplicateNpc(npc.id));
            }
            if !npc.position.is_finite() || !self.bounds.contains(npc.position) {
                return Err(WorldDataError::NpcOutOfBounds(npc.id));
            }
        }

        for (realm, point) in &self.spawn_points {
            if !self.bounds.contains(*point) {
                return Err(WorldDataError::SpawnOutOfBounds(*realm));
            }
        }
        Ok(())
    }

    /// Where a character without a stored position enters the world
    pub fn spawn_point(&self, realm: Realm) -> Vec2 {
        self.spawn_points
            .get(&realm)
            .copied()
            .unwrap_or_else(|| self.bounds.center())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::NpcRole;

    const SAMPLE: &str = r#"{
        "bounds": { "min_x": 0, "max_x": 6144, "min_y": 0, "max_y": 6144 },
        "spawn_points": { "Ignis": { "x": 5000, "y": 1000 } },
        "npcs": [
            { "id": 1, "name": "Trader", "level": 30, "realm": "Ignis",
              "position": { "x": 4900, "y": 1100 }, "roles": ["merchant", "static"] },
            { "id": 2, "name": "Wolf", "level": 12,
              "position": { "x": 3000, "y": 3000 }, "roles": ["roaming"],
              "roam": { "radius": 150, "speed": 40 } }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let world = WorldData::from_json_str(SAMPLE).unwrap();
        assert_eq!(world.npcs.len(), 2);
        assert!(world.npcs[0].has_role(NpcRole::Merchant));
        assert!(world.npcs[1].is_roaming());
        assert_eq!(world.npcs[1].home(), Vec2::new(3000.0, 3000.0));
        assert!(!world.npcs[1].roam.unwrap().patrol);
    }

    #[test]
    fn test_bundled_world_file_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/world.json");
        let world = WorldData::load(path).unwrap();
        for realm in Realm::ALL {
            assert!(world.spawn_points.contains_key(&realm));
        }
        assert!(world.npcs.iter().any(|npc| npc.is_roaming()));
    }

    #[test]
    fn test_spawn_point_fallback_to_center() {
        let world = WorldData::from_json_str(SAMPLE).unwrap();
        assert_eq!(world.spawn_point(Realm::Ignis), Vec2::new(5000.0, 1000.0));
        assert_eq!(world.spawn_point(Realm::Syrtis), Vec2::new(3072.0, 3072.0));
    }

    #[test]
    fn test_duplicate_npc_rejected() {
        let json = r#"{ "npcs": [
            { "id": 5, "name": "A", "level": 1, "position": { "x": 1, "y": 1 } },
            { "id": 5, "name": "B", "level": 1, "position": { "x": 2, "y": 2 } }
        ] }"#;
        assert!(matches!(
            WorldData::from_json_str(json),
            Err(WorldDataError::DuplicateNpc(5))
        ));
    }

    #[test]
    fn test_npc_outside_bounds_rejected() {
        let json = r#"{ "npcs": [
            { "id": 9, "name": "Lost", "level": 1, "position": { "x": 9000, "y": 1 } }
        ] }"#;
        assert!(matches!(
            WorldData::from_json_str(json),
            Err(WorldDataError::NpcOutOfBounds(9))
        ));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let json = r#"{ "bounds": { "min_x": 100, "max_x": 0, "min_y": 0, "max_y": 10 } }"#;
        assert!(matches!(
            WorldData::from_json_str(json),
            Err(WorldDataError::InvalidBounds)
        ));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let world = WorldData::load_or_default(Some("/nonexistent/world.json"));
        assert!(world.npcs.is_empty());
        assert_eq!(world.bounds, WorldBounds::default());
    }
}
