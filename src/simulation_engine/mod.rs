// simulation_engine/mod.rs
pub mod movement;
pub mod point_to_point;
pub mod route;
pub mod route_vehicle;
pub mod simulation;
pub mod vehicles;
