// Screeps spectator overlay

pub mod client;
pub mod core;
