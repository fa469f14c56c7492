use crate::communication::messages::CommandKind;
use crate::config::FleetConfig;
use crate::control_system::commands::{handle_command, CommandExecutor, CommandOutcome, CommandRequest};
use crate::shared_data::{VehicleStatus, VehicleType};
use crate::simulation_engine::movement::interpolate;
use crate::simulation_engine::vehicles::{Clock, Tick, VehicleCore};
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const STEP_PAUSE: Duration = Duration::from_secs(5);
const STATUS_INTERVAL: Duration = Duration::from_secs(30);
/// A status update is also sent each time progress enters a new bucket of this size.
const STATUS_BUCKET_PERCENT: u32 = 20;
const TRIP_ETA_MINUTES: u32 = 15;

/// Progress and connectivity state of one ride.
#[derive(Debug)]
pub struct Trip {
    pub start: String,
    pub end: String,
    pub waypoints: Vec<String>,
    pub current_waypoint: usize,
    /// 0..=100, never decreases
    pub progress: u32,
    pub eta: u32,
    pub in_dropout: bool,
    consecutive_drops: u32,
    started: bool,
    last_status: Option<Instant>,
    last_status_bucket: u32,
}

/// A private ride from a pickup point to one destination (Uber).
#[derive(Debug)]
pub struct PointToPointVehicle {
    pub core: VehicleCore,
    pub trip: Trip,
    config: Arc<FleetConfig>,
}

impl PointToPointVehicle {
    pub fn new(id: String, config: Arc<FleetConfig>, mut rng: StdRng) -> Self {
        let routes = &config.routes;
        let eta = rng.random_range(5..=15);
        let location = config.stops.coords_for(&routes.uber_pickup);
        let core = VehicleCore::new(id, VehicleType::Uber, VehicleStatus::Active, location, rng);
        let trip = Trip {
            start: routes.uber_start.clone(),
            end: routes.uber_end.clone(),
            waypoints: routes.uber_waypoints.clone(),
            current_waypoint: 0,
            progress: 0,
            eta,
            in_dropout: false,
            consecutive_drops: 0,
            started: false,
            last_status: None,
            last_status_bucket: 0,
        };
        Self { core, trip, config }
    }

    pub fn is_complete(&self) -> bool {
        self.trip.progress >= 100
    }

    pub fn tick(&mut self, now: &Clock) -> Tick {
        let mut tick = Tick::default();
        if !self.trip.started {
            self.trip.started = true;
            log::info!(
                "Uber {} starting ride from {} to {}",
                self.core.id,
                self.trip.start,
                self.trip.end
            );
            self.push_status(&mut tick, now);
        } else if self.status_due(now) {
            self.push_status(&mut tick, now);
        }

        if self.is_complete() {
            return self.complete(tick);
        }

        let dropout = &self.config.dropout;
        if dropout.contains(self.trip.progress) {
            self.trip.in_dropout = true;
            if self.trip.consecutive_drops < dropout.max_consecutive_drops
                && self.core.rng.random_bool(dropout.loss_probability)
            {
                self.trip.consecutive_drops += 1;
                log::warn!("Uber {}: Network unstable, retrying...", self.core.id);
                tick.pause = Some(STEP_PAUSE);
                return tick;
            }
        } else if self.trip.in_dropout {
            self.trip.in_dropout = false;
            log::info!("Uber {}: network connection re-established", self.core.id);
        }
        self.trip.consecutive_drops = 0;

        self.advance();
        if self.is_complete() {
            return self.complete(tick);
        }
        tick.beacons.push(
            self.core
                .location_update(Some(self.heading().to_string()), Some(self.trip.eta)),
        );
        log::debug!(
            "[UDP] Uber {} near {} | Progress: {}% | Location: {} | ETA: {} min",
            self.core.id,
            self.trip.waypoints[self.trip.current_waypoint],
            self.trip.progress,
            self.core.location,
            self.trip.eta
        );
        tick.pause = Some(STEP_PAUSE);
        tick
    }

    fn status_due(&self, now: &Clock) -> bool {
        let interval_passed = match self.trip.last_status {
            Some(at) => now.instant.saturating_duration_since(at) >= STATUS_INTERVAL,
            None => true,
        };
        interval_passed || self.trip.progress / STATUS_BUCKET_PERCENT > self.trip.last_status_bucket
    }

    fn push_status(&mut self, tick: &mut Tick, now: &Clock) {
        tick.control.push(self.core.status_update(None));
        self.trip.last_status = Some(now.instant);
        self.trip.last_status_bucket = self.trip.progress / STATUS_BUCKET_PERCENT;
    }

    /// Where the vehicle is currently driving toward.
    fn heading(&self) -> &str {
        self.trip
            .waypoints
            .get(self.trip.current_waypoint + 1)
            .unwrap_or(&self.trip.end)
    }

    fn advance(&mut self) {
        let step = self.core.rng.random_range(2..=5);
        self.trip.progress = (self.trip.progress + step).min(100);
        let remaining = 100 - self.trip.progress;
        self.trip.eta = (TRIP_ETA_MINUTES * remaining / 100).max(1);

        let count = self.trip.waypoints.len();
        if count == 0 {
            return;
        }
        let progress = self.trip.progress as f64;
        let span = 100.0 / count as f64;
        let index = ((progress / span) as usize).min(count - 1);
        self.trip.current_waypoint = index;
        let segment = ((progress - index as f64 * span) / span * 100.0).min(100.0);
        let origin = self.config.stops.coords_for(&self.trip.waypoints[index]);
        let destination = self.heading().to_string();
        self.core.location = interpolate(
            origin,
            &destination,
            segment,
            &self.config.stops,
            &mut self.core.rng,
        );
    }

    fn complete(&mut self, mut tick: Tick) -> Tick {
        self.core.location = self.config.stops.coords_for(&self.trip.end);
        self.core.status = VehicleStatus::OnTime;
        self.trip.eta = 0;
        tick.control.push(self.core.status_update(None));
        tick.beacons
            .push(self.core.location_update(Some(self.trip.end.clone()), Some(0)));
        tick.pause = None;
        tick.leg_complete = true;
        tick.finished = true;
        self.core.arrival(&self.trip.end);
        log::info!("Uber {} completed ride to {}", self.core.id, self.trip.end);
        tick
    }

    pub fn handle_command(&mut self, request: &CommandRequest, now: &Clock) -> CommandOutcome {
        handle_command(self, request, now)
    }
}

impl CommandExecutor for PointToPointVehicle {
    /// A private ride never accepts dispatcher commands.
    fn validate(&self, request: &CommandRequest, _now: &Clock) -> Result<(), String> {
        let reason = match request.kind {
            CommandKind::Shutdown => "Cannot shutdown/cancel private ride - encapsulated rules",
            CommandKind::Reroute => "Cannot reroute private ride - driver autonomy rules",
            CommandKind::Delay => "Cannot artificially delay private ride",
            _ => self.unsupported_reason(),
        };
        log::warn!("Uber {} rejected {}: {}", self.core.id, request.kind, reason);
        Err(reason.to_string())
    }

    fn execute(&mut self, _request: &CommandRequest, _now: &Clock) -> CommandOutcome {
        CommandOutcome::rejected(self.unsupported_reason())
    }

    fn unsupported_reason(&self) -> &'static str {
        "Unknown or unsupported command"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::messages::Message;
    use rand::SeedableRng;

    fn uber(seed: u64, config: FleetConfig) -> PointToPointVehicle {
        PointToPointVehicle::new("U901".into(), Arc::new(config), StdRng::seed_from_u64(seed))
    }

    #[test]
    fn ride_finishes_within_bounded_iterations() {
        let mut config = FleetConfig::default();
        config.dropout.loss_probability = 1.0;
        let max_drops = config.dropout.max_consecutive_drops;
        let mut vehicle = uber(17, config);
        let now = Clock::now();

        let mut last = 0;
        let mut iterations = 0;
        loop {
            let tick = vehicle.tick(&now);
            iterations += 1;
            assert!(vehicle.trip.progress >= last);
            last = vehicle.trip.progress;
            if tick.finished {
                assert_eq!(tick.beacons.len(), 1);
                assert!(!tick.control.is_empty());
                break;
            }
            assert!(iterations < 50 * (max_drops as usize + 1), "ride never finished");
        }
        assert_eq!(vehicle.trip.progress, 100);
        assert_eq!(vehicle.core.status, VehicleStatus::OnTime);
        assert_eq!(vehicle.core.location, vehicle.config.stops.coords_for("Columbia University"));
    }

    #[test]
    fn dropout_window_suppresses_beacons() {
        let mut config = FleetConfig::default();
        config.dropout.loss_probability = 1.0;
        config.dropout.max_consecutive_drops = 3;
        let mut vehicle = uber(5, config);
        vehicle.trip.started = true;
        vehicle.trip.last_status = Some(Instant::now());
        vehicle.trip.last_status_bucket = 2;
        vehicle.trip.progress = 52;
        let now = Clock::now();

        for _ in 0..3 {
            let tick = vehicle.tick(&now);
            assert!(tick.beacons.is_empty());
            assert_eq!(tick.pause, Some(STEP_PAUSE));
            assert!(vehicle.trip.in_dropout);
        }
        let tick = vehicle.tick(&now);
        assert_eq!(tick.beacons.len(), 1);
        assert!(vehicle.trip.progress > 52);
    }

    #[test]
    fn status_on_new_bucket_and_after_thirty_seconds() {
        let mut vehicle = uber(3, FleetConfig::default());
        let t0 = Instant::now();
        let at = |secs: u64| Clock::at(chrono::Local::now().naive_local(), t0 + Duration::from_secs(secs));
        vehicle.trip.started = true;
        vehicle.trip.last_status = Some(t0);
        vehicle.trip.last_status_bucket = 0;
        vehicle.trip.progress = 19;

        // Still in the first bucket when checked; moves past 20 afterwards.
        let tick = vehicle.tick(&at(5));
        assert!(tick.control.is_empty());
        assert!(vehicle.trip.progress >= 20);

        let tick = vehicle.tick(&at(10));
        assert!(matches!(tick.control.as_slice(), [Message::StatusUpdate(_)]));
        assert_eq!(vehicle.trip.last_status, Some(t0 + Duration::from_secs(10)));

        let tick = vehicle.tick(&at(15));
        assert!(tick.control.is_empty());
        assert!(vehicle.trip.progress < 40);

        let tick = vehicle.tick(&at(40));
        assert!(matches!(tick.control.as_slice(), [Message::StatusUpdate(_)]));
    }

    #[test]
    fn eta_tracks_remaining_progress() {
        let mut vehicle = uber(9, FleetConfig::default());
        vehicle.trip.progress = 40;
        vehicle.advance();
        let expected = (15 * (100 - vehicle.trip.progress) / 100).max(1);
        assert_eq!(vehicle.trip.eta, expected);
    }

    #[test]
    fn every_dispatcher_command_is_rejected() {
        let mut vehicle = uber(1, FleetConfig::default());
        let now = Clock::now();
        let cases = [
            (CommandRequest::shutdown("U901"), "Cannot shutdown/cancel private ride - encapsulated rules"),
            (CommandRequest::reroute("U901"), "Cannot reroute private ride - driver autonomy rules"),
            (CommandRequest::delay("U901", 30), "Cannot artificially delay private ride"),
            (CommandRequest::start_route("U901"), "Unknown or unsupported command"),
        ];
        for (request, reason) in cases {
            assert_eq!(vehicle.handle_command(&request, &now), CommandOutcome::rejected(reason));
        }
        assert!(!vehicle.core.is_delayed());
        assert_eq!(vehicle.core.status, VehicleStatus::Active);
    }
}
