pub mod admin_console;
pub mod events;
pub mod reports;
pub mod telemetry_sink;
