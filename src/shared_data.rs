// src/shared_data.rs

use chrono::Local;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// The kinds of vehicle in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleType {
    Bus,
    Train,
    Shuttle,
    Uber,
}

impl VehicleType {
    /// Generates an id like "B417" or "S7" when none was supplied on the command line.
    pub fn random_id<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        match self {
            VehicleType::Bus => format!("B{}", rng.random_range(101..=999)),
            VehicleType::Train => format!("T{}", rng.random_range(1..=99)),
            VehicleType::Shuttle => format!("S{}", rng.random_range(1..=99)),
            VehicleType::Uber => format!("U{}", rng.random_range(900..=999)),
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VehicleType::Bus => write!(f, "Bus"),
            VehicleType::Train => write!(f, "Train"),
            VehicleType::Shuttle => write!(f, "Shuttle"),
            VehicleType::Uber => write!(f, "Uber"),
        }
    }
}

/// Operational status reported in status updates and beacons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleStatus {
    #[serde(rename = "On Time")]
    OnTime,
    Delayed,
    Active,
    Standby,
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VehicleStatus::OnTime => write!(f, "On Time"),
            VehicleStatus::Delayed => write!(f, "Delayed"),
            VehicleStatus::Active => write!(f, "Active"),
            VehicleStatus::Standby => write!(f, "Standby"),
        }
    }
}

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub long: f64,
}

impl Location {
    pub const fn new(lat: f64, long: f64) -> Self {
        Self { lat, long }
    }

    /// Planar distance in degrees. Good enough for a city-sized simulation.
    pub fn distance_to(&self, other: &Location) -> f64 {
        ((self.lat - other.lat).powi(2) + (self.long - other.long).powi(2)).sqrt()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lat, self.long)
    }
}

/// Wall-clock time of day as carried in wire timestamps ("HH:MM:SS").
pub fn current_time_string() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Full local timestamp used in telemetry rows.
pub fn current_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Shared running flag for one process (a vehicle or the server).
///
/// Cloning is cheap and every clone observes the same flag. Besides the
/// plain boolean it lets sleeping tasks wake up the moment the flag is
/// cleared, so shutdown never waits out a pause or a backoff.
#[derive(Debug, Clone)]
pub struct RunFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl RunFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_running(&self) -> bool {
        *self.tx.borrow()
    }

    /// Clears the flag. Returns true only for the call that actually stopped it.
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|running| {
            let was_running = *running;
            *running = false;
            was_running
        })
    }

    /// Resolves once the flag has been cleared.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Sleeps for `duration` unless stopped first. Returns whether still running.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_running(),
            _ = self.stopped() => false,
        }
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}
