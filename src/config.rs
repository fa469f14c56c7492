//! Fleet configuration
//!
//! One immutable [`FleetConfig`] is built at startup (from the built-in
//! defaults or a TOML file) and handed to every component explicitly.
//! Omitted TOML fields keep their default value.

use crate::error::{FleetError, Result};
use crate::shared_data::Location;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Coordinates returned for any stop name missing from the directory (Times Square).
pub const FALLBACK_COORDS: Location = Location::new(40.7580, -73.9855);

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerEndpoint,
    pub routes: RouteTable,
    pub stops: StopDirectory,
    pub reconnect: ReconnectPolicy,
    pub shuttle: ShuttleSchedule,
    pub congestion: CongestionModel,
    pub dropout: DropoutModel,
    /// Directory the server's telemetry CSV files are written to
    pub telemetry_dir: PathBuf,
}

/// Where the dispatch server listens and vehicles connect.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerEndpoint {
    pub host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
}

impl ServerEndpoint {
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }

    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.host, self.udp_port)
    }
}

/// Stop sequences for every vehicle kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteTable {
    pub bus: Vec<String>,
    pub train: Vec<String>,
    pub shuttle: Vec<String>,
    pub uber_start: String,
    pub uber_end: String,
    /// Where the ride is picked up on the way from `uber_start`
    pub uber_pickup: String,
    pub uber_waypoints: Vec<String>,
}

/// Named stop -> coordinate lookup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct StopDirectory(BTreeMap<String, Location>);

impl StopDirectory {
    pub fn get(&self, stop_name: &str) -> Option<Location> {
        self.0.get(stop_name).copied()
    }

    /// Coordinates for a stop, or [`FALLBACK_COORDS`] when the name is unknown.
    pub fn coords_for(&self, stop_name: &str) -> Location {
        self.get(stop_name).unwrap_or(FALLBACK_COORDS)
    }

    pub fn insert(&mut self, stop_name: impl Into<String>, location: Location) {
        self.0.insert(stop_name.into(), location);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Bounded exponential backoff for the control channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    /// Wait after failed attempt `n` is `backoff_unit_ms * 2^n`
    pub backoff_unit_ms: u64,
}

impl ReconnectPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_unit_ms.saturating_mul(factor))
    }
}

/// Shuttle service window.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShuttleSchedule {
    /// First departure of the day, "HH:MM"
    pub start_time: String,
    pub headway_minutes: i64,
}

impl ShuttleSchedule {
    pub fn start(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.start_time, "%H:%M").map_err(|e| {
            FleetError::Config(format!("invalid shuttle start_time {:?}: {}", self.start_time, e))
        })
    }
}

/// Congestion applied to buses arriving at one busy stop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CongestionModel {
    pub stop: String,
    pub probability: f64,
    pub eta_penalty_minutes: u32,
}

/// Simulated connectivity loss for point-to-point rides.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DropoutModel {
    /// Progress percentage where the dropout window opens
    pub threshold: u32,
    /// Width of the window in progress points
    pub width: u32,
    pub loss_probability: f64,
    /// Cap on back-to-back lost iterations so a trip always finishes
    pub max_consecutive_drops: u32,
}

impl DropoutModel {
    pub fn contains(&self, progress: u32) -> bool {
        progress >= self.threshold && progress < self.threshold + self.width
    }
}

fn names(stops: &[&str]) -> Vec<String> {
    stops.iter().map(|s| s.to_string()).collect()
}

impl Default for ServerEndpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tcp_port: 5000,
            udp_port: 5001,
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            bus: names(&[
                "Port Authority Terminal",
                "Times Square",
                "Flatiron",
                "Union Square",
                "Wall Street",
            ]),
            train: names(&["Queens Plaza", "Herald Square", "Delancey St", "Middle Village"]),
            shuttle: names(&["Penn Station", "JFK Airport"]),
            uber_start: "Washington Square".to_string(),
            uber_end: "Columbia University".to_string(),
            uber_pickup: "Near NYU".to_string(),
            uber_waypoints: names(&[
                "Near NYU",
                "Greenwich Village",
                "Union Square",
                "Near Flatiron",
                "Near Bryant Park",
                "Midtown",
                "Columbus Circle",
                "Upper West Side",
                "Near Columbia University",
            ]),
        }
    }
}

impl StopDirectory {
    /// Approximate NYC coordinates for every stop used by the default routes.
    pub fn nyc() -> Self {
        let mut stops = StopDirectory::default();
        for (name, lat, long) in [
            ("Port Authority Terminal", 40.7577, -73.9901),
            ("Times Square", 40.7580, -73.9855),
            ("Flatiron", 40.7411, -73.9897),
            ("Union Square", 40.7359, -73.9911),
            ("Wall Street", 40.7068, -74.0090),
            ("Queens Plaza", 40.7489, -73.9375),
            ("Herald Square", 40.7497, -73.9876),
            ("Delancey St", 40.7183, -73.9593),
            ("Middle Village", 40.7147, -73.8878),
            ("Penn Station", 40.7506, -73.9939),
            ("JFK Airport", 40.6413, -73.7781),
            ("Washington Square", 40.7308, -73.9973),
            ("Greenwich Village", 40.7336, -74.0027),
            ("Near NYU", 40.7295, -73.9965),
            ("Near Flatiron", 40.7411, -73.9897),
            ("Near Bryant Park", 40.7536, -73.9832),
            ("Midtown", 40.7549, -73.9840),
            ("Columbus Circle", 40.7682, -73.9819),
            ("Upper West Side", 40.7870, -73.9754),
            ("Near Columbia University", 40.8075, -73.9626),
            ("Columbia University", 40.8075, -73.9626),
        ] {
            stops.insert(name, Location::new(lat, long));
        }
        stops
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_unit_ms: 1000,
        }
    }
}

impl Default for ShuttleSchedule {
    fn default() -> Self {
        Self {
            start_time: "08:00".to_string(),
            headway_minutes: 30,
        }
    }
}

impl Default for CongestionModel {
    fn default() -> Self {
        Self {
            stop: "Union Square".to_string(),
            probability: 0.5,
            eta_penalty_minutes: 2,
        }
    }
}

impl Default for DropoutModel {
    fn default() -> Self {
        Self {
            threshold: 50,
            width: 10,
            loss_probability: 0.8,
            max_consecutive_drops: 5,
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            server: ServerEndpoint::default(),
            routes: RouteTable::default(),
            stops: StopDirectory::nyc(),
            reconnect: ReconnectPolicy::default(),
            shuttle: ShuttleSchedule::default(),
            congestion: CongestionModel::default(),
            dropout: DropoutModel::default(),
            telemetry_dir: PathBuf::from("logs"),
        }
    }
}

impl FleetConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)
            .map_err(|e| FleetError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, route) in [
            ("bus", &self.routes.bus),
            ("train", &self.routes.train),
            ("shuttle", &self.routes.shuttle),
        ] {
            if route.is_empty() {
                return Err(FleetError::Config(format!("{} route has no stops", name)));
            }
        }
        if self.routes.uber_waypoints.is_empty() {
            return Err(FleetError::Config("uber route has no waypoints".into()));
        }
        self.shuttle.start()?;
        if self.shuttle.headway_minutes <= 0 {
            return Err(FleetError::Config("shuttle headway_minutes must be positive".into()));
        }
        for (name, p) in [
            ("congestion.probability", self.congestion.probability),
            ("dropout.loss_probability", self.dropout.loss_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(FleetError::Config(format!("{} must be within [0, 1], got {}", name, p)));
            }
        }
        Ok(())
    }
}
