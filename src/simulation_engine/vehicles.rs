use crate::communication::messages::{LocationUpdate, Message, StatusUpdate};
use crate::config::FleetConfig;
use crate::control_system::commands::{CommandOutcome, CommandRequest};
use crate::error::Result;
use crate::monitoring::events::{FleetEvent, LogObserver, Subject};
use crate::shared_data::{current_time_string, Location, VehicleStatus, VehicleType};
use crate::simulation_engine::point_to_point::PointToPointVehicle;
use crate::simulation_engine::route_vehicle::RouteVehicle;
use chrono::{Local, NaiveDateTime};
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Both notions of "now" a vehicle needs: wall-clock time for schedules
/// and a monotonic instant for delays and status cadence.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    pub wall: NaiveDateTime,
    pub instant: Instant,
}

impl Clock {
    pub fn now() -> Self {
        Self {
            wall: Local::now().naive_local(),
            instant: Instant::now(),
        }
    }

    pub fn at(wall: NaiveDateTime, instant: Instant) -> Self {
        Self { wall, instant }
    }
}

/// State shared by every vehicle kind.
#[derive(Debug)]
pub struct VehicleCore {
    pub id: String,
    pub vehicle_type: VehicleType,
    pub status: VehicleStatus,
    pub location: Location,
    pub delay_until: Option<Instant>,
    pub events: Subject,
    pub rng: StdRng,
}

impl VehicleCore {
    pub fn new(
        id: String,
        vehicle_type: VehicleType,
        status: VehicleStatus,
        location: Location,
        rng: StdRng,
    ) -> Self {
        Self {
            id,
            vehicle_type,
            status,
            location,
            delay_until: None,
            events: Subject::new(),
            rng,
        }
    }

    pub fn apply_delay(&mut self, duration: Duration, now: Instant) {
        self.delay_until = Some(now + duration);
        self.status = VehicleStatus::Delayed;
        log::info!("{} {} delayed for {} seconds", self.vehicle_type, self.id, duration.as_secs());
    }

    pub fn is_delayed(&self) -> bool {
        self.delay_until.is_some()
    }

    /// True while a delay is set and has not yet run out.
    pub fn delay_pending(&self, now: Instant) -> bool {
        matches!(self.delay_until, Some(until) if now < until)
    }

    /// Clears a delay that has run out. Returns whether one was cleared.
    pub fn take_elapsed_delay(&mut self, now: Instant) -> bool {
        match self.delay_until {
            Some(until) if now >= until => {
                self.delay_until = None;
                true
            }
            _ => false,
        }
    }

    pub fn status_update(&self, network_status: Option<String>) -> Message {
        Message::StatusUpdate(StatusUpdate {
            vehicle_id: self.id.clone(),
            vehicle_type: self.vehicle_type,
            status: self.status,
            location: self.location,
            timestamp: current_time_string(),
            network_status,
        })
    }

    pub fn location_update(&self, next_stop: Option<String>, eta: Option<u32>) -> Message {
        Message::LocationUpdate(LocationUpdate {
            vehicle_id: self.id.clone(),
            vehicle_type: self.vehicle_type,
            status: self.status,
            location: self.location,
            timestamp: current_time_string(),
            next_stop,
            eta,
        })
    }

    pub fn arrival(&self, stop: &str) {
        self.events.notify(
            FleetEvent::Arrival,
            &format!("{} {} arrived at {}", self.vehicle_type, self.id, stop),
        );
    }
}

/// What one unit of movement produced and what the driver should do next.
#[derive(Debug, Default)]
pub struct Tick {
    /// Status updates for the control channel
    pub control: Vec<Message>,
    pub beacons: Vec<Message>,
    pub pause: Option<Duration>,
    /// The current leg ended (arrival or a passive update)
    pub leg_complete: bool,
    /// The vehicle has nothing left to do
    pub finished: bool,
}

/// Every simulated vehicle, as one closed set.
#[derive(Debug)]
pub enum FleetVehicle {
    Route(RouteVehicle),
    PointToPoint(PointToPointVehicle),
}

impl FleetVehicle {
    pub fn build(
        vehicle_type: VehicleType,
        id: String,
        config: Arc<FleetConfig>,
        rng: StdRng,
        now: &Clock,
    ) -> Result<Self> {
        let vehicle = match vehicle_type {
            VehicleType::Bus => FleetVehicle::Route(RouteVehicle::bus(id, config, rng)?),
            VehicleType::Train => FleetVehicle::Route(RouteVehicle::train(id, config, rng)?),
            VehicleType::Shuttle => {
                FleetVehicle::Route(RouteVehicle::shuttle(id, config, rng, now)?)
            }
            VehicleType::Uber => {
                FleetVehicle::PointToPoint(PointToPointVehicle::new(id, config, rng))
            }
        };
        vehicle.core().events.register(Arc::new(LogObserver));
        Ok(vehicle)
    }

    pub fn core(&self) -> &VehicleCore {
        match self {
            FleetVehicle::Route(v) => &v.core,
            FleetVehicle::PointToPoint(v) => &v.core,
        }
    }

    pub fn core_mut(&mut self) -> &mut VehicleCore {
        match self {
            FleetVehicle::Route(v) => &mut v.core,
            FleetVehicle::PointToPoint(v) => &mut v.core,
        }
    }

    pub fn id(&self) -> &str {
        &self.core().id
    }

    pub fn vehicle_type(&self) -> VehicleType {
        self.core().vehicle_type
    }

    /// Runs before each movement step; shuttles use it to start on schedule.
    pub fn pre_step(&mut self, now: &Clock) {
        if let FleetVehicle::Route(v) = self {
            v.pre_step(now);
        }
    }

    pub fn tick(&mut self, now: &Clock) -> Tick {
        match self {
            FleetVehicle::Route(v) => v.tick(now),
            FleetVehicle::PointToPoint(v) => v.tick(now),
        }
    }

    pub fn post_step(&mut self) {
        let core = self.core();
        log::debug!("{} {} at {} ({})", core.vehicle_type, core.id, core.location, core.status);
    }

    /// Applies a command and reports the result as an event.
    pub fn handle_command(&mut self, request: &CommandRequest, now: &Clock) -> CommandOutcome {
        let outcome = match self {
            FleetVehicle::Route(v) => v.handle_command(request, now),
            FleetVehicle::PointToPoint(v) => v.handle_command(request, now),
        };
        let core = self.core();
        match &outcome {
            CommandOutcome::Accepted { message, .. } => core.events.notify(
                FleetEvent::CommandAck,
                &format!("{} {}: {}", core.id, request.kind, message),
            ),
            CommandOutcome::Rejected { reason } => core.events.notify(
                FleetEvent::CommandFailure,
                &format!("{} {}: {}", core.id, request.kind, reason),
            ),
        }
        outcome
    }

    /// Restores the status the vehicle had before it was delayed.
    pub fn resume_after_delay(&mut self) {
        match self {
            FleetVehicle::Route(v) => v.resume_after_delay(),
            FleetVehicle::PointToPoint(v) => v.core.status = VehicleStatus::Active,
        }
        let core = self.core();
        log::info!("{} {}: delay period over, resuming ({})", core.vehicle_type, core.id, core.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn build(vehicle_type: VehicleType, id: &str) -> FleetVehicle {
        FleetVehicle::build(
            vehicle_type,
            id.to_string(),
            Arc::new(FleetConfig::default()),
            StdRng::seed_from_u64(3),
            &Clock::now(),
        )
        .unwrap()
    }

    #[test]
    fn build_picks_variant_and_log_observer() {
        let bus = build(VehicleType::Bus, "B101");
        assert!(matches!(bus, FleetVehicle::Route(_)));
        assert_eq!(bus.core().status, VehicleStatus::OnTime);
        assert_eq!(bus.core().events.len(), 1);

        let uber = build(VehicleType::Uber, "U901");
        assert!(matches!(uber, FleetVehicle::PointToPoint(_)));
        assert_eq!(uber.core().status, VehicleStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_runs_out_on_its_own() {
        let mut bus = build(VehicleType::Bus, "B102");
        let start = Instant::now();
        let outcome = bus.handle_command(&CommandRequest::delay("B102", 60), &Clock::now());
        assert_eq!(outcome, CommandOutcome::accepted("Delayed for 60 seconds"));

        let core = bus.core();
        assert_eq!(core.status, VehicleStatus::Delayed);
        assert_eq!(core.delay_until, Some(start + Duration::from_secs(60)));
        assert!(core.delay_pending(start + Duration::from_secs(59)));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(bus.core_mut().take_elapsed_delay(Instant::now()));
        bus.resume_after_delay();
        assert_eq!(bus.core().status, VehicleStatus::OnTime);
        assert!(!bus.core().is_delayed());
    }
}
