pub mod movement;
pub mod regen;
pub mod roaming;
