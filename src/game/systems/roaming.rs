//! Wandering for NPCs tagged `roaming`
//!
//! Runs on its own slower interval. Each pass moves every roaming NPC toward
//! its current waypoint; on arrival a fresh waypoint is picked inside the roam
//! radius around the NPC's home. Patrolling NPCs return home in between.

use rand::Rng;
use std::f32::consts::TAU;

use crate::game::state::{NpcEntity, NpcId, WorldBounds};
use crate::util::vec2::Vec2;

/// Arrival tolerance in world units
const ARRIVAL_EPSILON: f32 = 0.5;

/// Uniform random point in the disc of `radius` around `center`, clamped to bounds
pub fn random_waypoint<R: Rng + ?Sized>(
    rng: &mut R,
    center: Vec2,
    radius: f32,
    bounds: &WorldBounds,
) -> Vec2 {
    if radius <= 0.0 {
        return bounds.clamp(center);
    }
    let angle = rng.gen_range(0.0..TAU);
    // sqrt keeps the distribution uniform over the disc area
    let distance = radius * rng.gen::<f32>().sqrt();
    bounds.clamp(center + Vec2::new(angle.cos(), angle.sin()) * distance)
}

fn next_waypoint<R: Rng + ?Sized>(npc: &NpcEntity, rng: &mut R, bounds: &WorldBounds) -> Option<Vec2> {
    let roam = npc.roam?;
    let home = npc.home();
    let at_home = npc.position.distance_sq_to(home) <= ARRIVAL_EPSILON * ARRIVAL_EPSILON;

    if roam.patrol && !at_home {
        Some(home)
    } else {
        Some(random_waypoint(rng, home, roam.radius, bounds))
    }
}

/// Advance roaming NPCs by `dt` seconds; returns the ones that moved
pub fn roam_step<R: Rng + ?Sized>(
    npcs: &mut [NpcEntity],
    dt: f32,
    bounds: &WorldBounds,
    rng: &mut R,
) -> Vec<(NpcId, Vec2)> {
    let mut moved = Vec::new();

    for npc in npcs.iter_mut().filter(|npc| npc.is_roaming()) {
        let Some(roam) = npc.roam else { continue };

        let target = match npc.waypoint {
            Some(waypoint) => waypoint,
            None => match next_waypoint(npc, rng, bounds) {
                Some(waypoint) => {
                    npc.waypoint = Some(waypoint);
                    waypoint
                }
                None => continue,
            },
        };

        let step = (roam.speed * dt).max(0.0);
        let next = bounds.clamp(npc.position.move_towards(target, step));

        if next.distance_sq_to(target) <= ARRIVAL_EPSILON * ARRIVAL_EPSILON {
            npc.waypoint = None;
        }
        if next != npc.position {
            npc.position = next;
            moved.push((npc.id, next));
        }
    }

    moved
}
