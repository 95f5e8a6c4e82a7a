pub mod chunk_cache;
pub mod controller;
