pub mod api;
pub mod arena;
pub mod behaviors;
pub mod compiler;
pub mod config;
pub mod constants;
pub mod engine;
pub mod fsm;
pub mod geometry;
pub mod navigation;
pub mod projectile;
pub mod protocol;
pub mod rng;
pub mod robot;
pub mod script_api;
pub mod server_utils;
pub mod types;
