pub mod constants;
pub mod input_buffer;
pub mod state;
pub mod systems;
pub mod world;
