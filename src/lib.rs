pub mod client;
pub mod communication;
pub mod config;
pub mod control_system;
pub mod error;
pub mod monitoring;
pub mod server;
pub mod shared_data;
pub mod simulation_engine;
