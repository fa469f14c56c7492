pub mod beacon;
pub mod connection;
pub mod uplink;
