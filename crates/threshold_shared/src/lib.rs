pub mod chunk;
pub mod coords;
pub mod physics;
pub mod portal;
pub mod ray_trace;
pub mod teleport;
pub mod worldgen;
