use crate::communication::messages::CommandKind;
use crate::config::FleetConfig;
use crate::control_system::commands::{
    handle_command, CommandExecutor, CommandOutcome, CommandRequest, UNKNOWN_COMMAND,
};
use crate::error::Result;
use crate::shared_data::{Location, VehicleStatus, VehicleType};
use crate::simulation_engine::movement::interpolate;
use crate::simulation_engine::route::{Route, REROUTE_TOO_SHORT};
use crate::simulation_engine::vehicles::{Clock, Tick, VehicleCore};
use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

const BUS_STEP_PERCENT: (f64, f64) = (2.0, 8.0);
const BUS_BEACON_PAUSE: Duration = Duration::from_secs(3);
/// Buses send a status update alongside every third beacon of a leg.
const BUS_STATUS_EVERY: u32 = 3;
const TRAIN_LEG: Duration = Duration::from_secs(15);
const SHUTTLE_LEG: Duration = Duration::from_secs(30);
const TIMED_SAMPLE: Duration = Duration::from_secs(5);
const TRAIN_STANDBY_PAUSE: Duration = Duration::from_secs(5);
const SHUTTLE_PASSIVE_PAUSE: Duration = Duration::from_secs(10);
const SHUTTLE_STATUS_EVERY: u32 = 5;

/// Lazy sequence of (progress percent, pause) pairs for one leg. The last
/// element is always exactly 100 with no pause.
#[derive(Debug)]
pub enum ProgressGenerator {
    /// Random increments, fixed pause (buses)
    Stepped {
        progress: f64,
        step: (f64, f64),
        pause: Duration,
        rng: StdRng,
        done: bool,
    },
    /// Progress follows simulated elapsed time over a fixed travel time
    Timed {
        elapsed: Duration,
        travel: Duration,
        sample: Duration,
        done: bool,
    },
}

impl ProgressGenerator {
    pub fn stepped(step: (f64, f64), pause: Duration, rng: StdRng) -> Self {
        ProgressGenerator::Stepped {
            progress: 0.0,
            step,
            pause,
            rng,
            done: false,
        }
    }

    pub fn timed(travel: Duration, sample: Duration) -> Self {
        ProgressGenerator::Timed {
            elapsed: Duration::ZERO,
            travel,
            sample,
            done: false,
        }
    }
}

impl Iterator for ProgressGenerator {
    type Item = (f64, Duration);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ProgressGenerator::Stepped {
                progress,
                step,
                pause,
                rng,
                done,
            } => {
                if *done {
                    return None;
                }
                *progress += rng.random_range(step.0..step.1);
                if *progress >= 100.0 {
                    *done = true;
                    return Some((100.0, Duration::ZERO));
                }
                Some((*progress, *pause))
            }
            ProgressGenerator::Timed {
                elapsed,
                travel,
                sample,
                done,
            } => {
                if *done {
                    return None;
                }
                if *elapsed >= *travel || sample.is_zero() {
                    *done = true;
                    return Some((100.0, Duration::ZERO));
                }
                let progress = elapsed.as_secs_f64() / travel.as_secs_f64() * 100.0;
                *elapsed += *sample;
                Some((progress, *sample))
            }
        }
    }
}

#[derive(Debug)]
struct ActiveLeg {
    origin: Location,
    destination: String,
    progress: ProgressGenerator,
    beacons_sent: u32,
}

#[derive(Debug)]
enum RouteProfile {
    Bus {
        eta: u32,
        /// Congestion minutes added to every eta until the next arrival
        penalty: u32,
    },
    Train {
        eta: u32,
        standby: bool,
        standby_reported: bool,
    },
    Shuttle {
        start: NaiveTime,
        headway: TimeDelta,
        is_active: bool,
        passive_ticks: u32,
        next_departure: NaiveDateTime,
    },
}

/// A vehicle that cycles through a fixed list of named stops.
#[derive(Debug)]
pub struct RouteVehicle {
    pub core: VehicleCore,
    route: Route,
    config: Arc<FleetConfig>,
    leg: Option<ActiveLeg>,
    profile: RouteProfile,
}

impl RouteVehicle {
    fn with_profile(
        core: VehicleCore,
        stops: Vec<String>,
        config: Arc<FleetConfig>,
        profile: RouteProfile,
    ) -> Result<Self> {
        let route = Route::new(stops)?;
        let mut vehicle = Self {
            core,
            route,
            config,
            leg: None,
            profile,
        };
        vehicle.core.location = vehicle.config.stops.coords_for(vehicle.route.current_stop());
        Ok(vehicle)
    }

    pub fn bus(id: String, config: Arc<FleetConfig>, mut rng: StdRng) -> Result<Self> {
        let eta = rng.random_range(1..=5);
        let core = VehicleCore::new(id, VehicleType::Bus, VehicleStatus::OnTime, Location::new(0.0, 0.0), rng);
        let stops = config.routes.bus.clone();
        Self::with_profile(core, stops, config, RouteProfile::Bus { eta, penalty: 0 })
    }

    pub fn train(id: String, config: Arc<FleetConfig>, mut rng: StdRng) -> Result<Self> {
        let eta = rng.random_range(2..=8);
        let core = VehicleCore::new(id, VehicleType::Train, VehicleStatus::OnTime, Location::new(0.0, 0.0), rng);
        let stops = config.routes.train.clone();
        let profile = RouteProfile::Train {
            eta,
            standby: false,
            standby_reported: false,
        };
        Self::with_profile(core, stops, config, profile)
    }

    /// A shuttle starts in standby; its first departure is today's
    /// scheduled start time.
    pub fn shuttle(id: String, config: Arc<FleetConfig>, rng: StdRng, now: &Clock) -> Result<Self> {
        let start = config.shuttle.start()?;
        let core = VehicleCore::new(id, VehicleType::Shuttle, VehicleStatus::Standby, Location::new(0.0, 0.0), rng);
        let stops = config.routes.shuttle.clone();
        let profile = RouteProfile::Shuttle {
            start,
            headway: TimeDelta::minutes(config.shuttle.headway_minutes.max(1)),
            is_active: false,
            passive_ticks: 0,
            next_departure: now.wall.date().and_time(start),
        };
        Self::with_profile(core, stops, config, profile)
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Whether the vehicle is idling instead of travelling.
    pub fn is_passive(&self) -> bool {
        match &self.profile {
            RouteProfile::Bus { .. } => false,
            RouteProfile::Train { standby, .. } => *standby,
            RouteProfile::Shuttle { is_active, .. } => !*is_active,
        }
    }

    pub fn eta(&self) -> Option<u32> {
        match &self.profile {
            RouteProfile::Bus { eta, .. } | RouteProfile::Train { eta, .. } => Some(*eta),
            RouteProfile::Shuttle { .. } => None,
        }
    }

    pub fn next_departure(&self) -> Option<NaiveDateTime> {
        match &self.profile {
            RouteProfile::Shuttle { next_departure, .. } => Some(*next_departure),
            _ => None,
        }
    }

    pub fn pre_step(&mut self, now: &Clock) {
        if let RouteProfile::Shuttle {
            is_active,
            passive_ticks,
            next_departure,
            ..
        } = &mut self.profile
        {
            if !*is_active && now.wall >= *next_departure {
                *is_active = true;
                *passive_ticks = 0;
                self.core.status = VehicleStatus::Active;
                log::info!(
                    "Scheduled departure {} reached. Shuttle {} activating",
                    next_departure.format("%H:%M"),
                    self.core.id
                );
            }
        }
    }

    pub fn tick(&mut self, now: &Clock) -> Tick {
        if self.is_passive() {
            return self.passive_tick();
        }
        let mut tick = Tick::default();
        let mut leg = match self.leg.take() {
            Some(leg) => leg,
            None => {
                tick.control.push(self.core.status_update(None));
                self.start_leg()
            }
        };
        match leg.progress.next() {
            Some((progress, pause)) if progress < 100.0 => {
                self.core.location = interpolate(
                    leg.origin,
                    &leg.destination,
                    progress,
                    &self.config.stops,
                    &mut self.core.rng,
                );
                self.update_eta(progress);
                tick.beacons
                    .push(self.core.location_update(Some(leg.destination.clone()), self.eta()));
                leg.beacons_sent += 1;
                log::debug!(
                    "[UDP] {} progress {:.1}% to {} | Location: {}",
                    self.core.id,
                    progress,
                    leg.destination,
                    self.core.location
                );
                if matches!(self.profile, RouteProfile::Bus { .. })
                    && leg.beacons_sent % BUS_STATUS_EVERY == 0
                {
                    tick.control.push(self.core.status_update(None));
                }
                tick.pause = Some(pause);
                self.leg = Some(leg);
            }
            _ => {
                self.arrive(&leg.destination, now);
                tick.leg_complete = true;
            }
        }
        tick
    }

    fn start_leg(&mut self) -> ActiveLeg {
        let origin = self.config.stops.coords_for(self.route.current_stop());
        let destination = self.route.next_stop().to_string();
        log::info!(
            "{} {} at {}, heading to {}",
            self.core.vehicle_type,
            self.core.id,
            self.route.current_stop(),
            destination
        );
        let progress = match &self.profile {
            RouteProfile::Bus { .. } => ProgressGenerator::stepped(
                BUS_STEP_PERCENT,
                BUS_BEACON_PAUSE,
                StdRng::from_rng(&mut self.core.rng),
            ),
            RouteProfile::Train { .. } => ProgressGenerator::timed(TRAIN_LEG, TIMED_SAMPLE),
            RouteProfile::Shuttle { .. } => ProgressGenerator::timed(SHUTTLE_LEG, TIMED_SAMPLE),
        };
        ActiveLeg {
            origin,
            destination,
            progress,
            beacons_sent: 0,
        }
    }

    fn update_eta(&mut self, progress: f64) {
        let remaining = 1.0 - progress / 100.0;
        match &mut self.profile {
            RouteProfile::Bus { eta, penalty } => {
                *eta = ((5.0 * remaining) as u32).max(1) + *penalty;
            }
            RouteProfile::Train { eta, .. } => {
                *eta = ((8.0 * remaining) as u32).max(1);
            }
            RouteProfile::Shuttle { .. } => {}
        }
    }

    fn arrive(&mut self, destination: &str, now: &Clock) {
        let stop = self.route.arrive_at(destination).to_string();
        self.core.location = self.config.stops.coords_for(&stop);
        self.core.arrival(&stop);
        log::info!("{} {} arrived at {}, next stop: {}", self.core.vehicle_type, self.core.id, stop, self.route.next_stop());

        let at_first_stop = self.route.current_index() == 0;
        let delayed = self.core.is_delayed();
        let core = &mut self.core;
        match &mut self.profile {
            RouteProfile::Bus { eta, penalty } => {
                let congestion = &self.config.congestion;
                *eta = core.rng.random_range(1..=5);
                if stop == congestion.stop && core.rng.random_bool(congestion.probability) {
                    *penalty = congestion.eta_penalty_minutes;
                    *eta += *penalty;
                    core.status = VehicleStatus::Delayed;
                    log::warn!("Bus {} experiencing congestion at {}", core.id, stop);
                } else {
                    *penalty = 0;
                    if !delayed {
                        core.status = VehicleStatus::OnTime;
                    }
                }
            }
            RouteProfile::Train { eta, .. } => {
                *eta = core.rng.random_range(2..=8);
            }
            RouteProfile::Shuttle {
                headway,
                is_active,
                passive_ticks,
                next_departure,
                ..
            } => {
                if at_first_stop {
                    *is_active = false;
                    *passive_ticks = 0;
                    core.status = VehicleStatus::Standby;
                    let mut departure = *next_departure + *headway;
                    while departure <= now.wall {
                        departure += *headway;
                    }
                    *next_departure = departure;
                    log::info!(
                        "Shuttle {} completed route, next scheduled departure {}",
                        core.id,
                        departure.format("%H:%M")
                    );
                }
            }
        }
    }

    fn passive_tick(&mut self) -> Tick {
        let mut tick = Tick {
            leg_complete: true,
            ..Tick::default()
        };
        let core = &self.core;
        match &mut self.profile {
            RouteProfile::Shuttle {
                passive_ticks,
                next_departure,
                ..
            } => {
                *passive_ticks += 1;
                if *passive_ticks % SHUTTLE_STATUS_EVERY == 0 {
                    tick.control.push(core.status_update(None));
                }
                tick.beacons.push(core.location_update(None, None));
                log::info!(
                    "Shuttle {} | Status: {} | Next Departure: {}",
                    core.id,
                    core.status,
                    next_departure.format("%H:%M")
                );
                tick.pause = Some(SHUTTLE_PASSIVE_PAUSE);
            }
            RouteProfile::Train {
                standby_reported, ..
            } => {
                if !*standby_reported {
                    tick.control.push(core.status_update(None));
                    *standby_reported = true;
                }
                tick.beacons.push(core.location_update(None, None));
                log::info!("Train {} is in standby mode", core.id);
                tick.pause = Some(TRAIN_STANDBY_PAUSE);
            }
            RouteProfile::Bus { .. } => {}
        }
        tick
    }

    pub fn handle_command(&mut self, request: &CommandRequest, now: &Clock) -> CommandOutcome {
        handle_command(self, request, now)
    }

    pub fn resume_after_delay(&mut self) {
        self.core.status = match &self.profile {
            RouteProfile::Bus { .. } => VehicleStatus::OnTime,
            RouteProfile::Train { standby: true, .. } => VehicleStatus::Standby,
            RouteProfile::Train { .. } => VehicleStatus::OnTime,
            RouteProfile::Shuttle { is_active: true, .. } => VehicleStatus::Active,
            RouteProfile::Shuttle { .. } => VehicleStatus::Standby,
        };
    }
}

impl CommandExecutor for RouteVehicle {
    fn validate(&self, request: &CommandRequest, now: &Clock) -> std::result::Result<(), String> {
        match (&request.kind, &self.profile) {
            (CommandKind::Delay, _) | (CommandKind::Shutdown, _) => Ok(()),
            (CommandKind::Reroute, RouteProfile::Shuttle { .. }) => Err(UNKNOWN_COMMAND.into()),
            (CommandKind::Reroute, _) if self.route.len() <= 3 => Err(REROUTE_TOO_SHORT.into()),
            (CommandKind::Reroute, _) => Ok(()),
            (CommandKind::StartRoute, RouteProfile::Bus { .. }) => Err(UNKNOWN_COMMAND.into()),
            (CommandKind::StartRoute, RouteProfile::Train { .. }) => Ok(()),
            (CommandKind::StartRoute, RouteProfile::Shuttle { start, .. }) => {
                if now.wall.time() >= *start {
                    Ok(())
                } else {
                    Err(format!("Cannot start before scheduled time ({})", start.format("%H:%M")))
                }
            }
            (CommandKind::Other(_), _) => Err(UNKNOWN_COMMAND.into()),
        }
    }

    fn execute(&mut self, request: &CommandRequest, now: &Clock) -> CommandOutcome {
        let id = self.core.id.clone();
        match &request.kind {
            CommandKind::Delay => {
                let duration = request.delay_duration();
                self.core.apply_delay(duration, now.instant);
                CommandOutcome::accepted(format!("Delayed for {} seconds", duration.as_secs()))
            }
            CommandKind::Reroute => match self.route.reroute(&mut self.core.rng) {
                Ok(()) => {
                    log::info!("{} rerouted: {}", id, self.route.stops().join(" -> "));
                    CommandOutcome::accepted("Route changed")
                }
                Err(reason) => CommandOutcome::rejected(reason),
            },
            CommandKind::Shutdown => match &mut self.profile {
                RouteProfile::Train {
                    standby,
                    standby_reported,
                    ..
                } => {
                    *standby = true;
                    *standby_reported = false;
                    self.core.status = VehicleStatus::Standby;
                    log::info!("Train {} entering standby mode", id);
                    CommandOutcome::accepted("Entering standby mode")
                }
                _ => {
                    log::info!("{} {} received shutdown command", self.core.vehicle_type, id);
                    CommandOutcome::stopping("Shutting down")
                }
            },
            CommandKind::StartRoute => match &mut self.profile {
                RouteProfile::Train { standby, .. } if *standby => {
                    *standby = false;
                    self.core.status = VehicleStatus::OnTime;
                    log::info!("Train {} resuming route", id);
                    CommandOutcome::accepted("Resuming route")
                }
                RouteProfile::Train { .. } => CommandOutcome::accepted("Already active"),
                RouteProfile::Shuttle {
                    is_active,
                    passive_ticks,
                    ..
                } => {
                    *is_active = true;
                    *passive_ticks = 0;
                    self.core.status = VehicleStatus::Active;
                    log::info!("Shuttle {} activated", id);
                    CommandOutcome::accepted("Starting route")
                }
                RouteProfile::Bus { .. } => CommandOutcome::rejected(UNKNOWN_COMMAND),
            },
            CommandKind::Other(_) => CommandOutcome::rejected(UNKNOWN_COMMAND),
        }
    }
}
