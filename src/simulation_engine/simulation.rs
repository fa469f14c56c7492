use crate::client::beacon::BeaconChannel;
use crate::client::connection::ConnectionManager;
use crate::client::uplink::{LiveUplink, Uplink};
use crate::communication::messages::CommandMessage;
use crate::config::FleetConfig;
use crate::control_system::commands::CommandRequest;
use crate::error::Result;
use crate::shared_data::RunFlag;
use crate::simulation_engine::vehicles::{Clock, FleetVehicle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// How often a delayed vehicle checks whether its delay has run out.
const DELAY_POLL: Duration = Duration::from_secs(1);

/// Runs one vehicle's movement loop. The driver is the only owner of the
/// vehicle state; commands reach it through `commands` and are applied
/// between steps or while a pause is in progress.
pub struct VehicleDriver<U: Uplink> {
    vehicle: FleetVehicle,
    uplink: U,
    run: RunFlag,
    commands: mpsc::UnboundedReceiver<CommandMessage>,
    commands_open: bool,
}

impl<U: Uplink> VehicleDriver<U> {
    pub fn new(
        vehicle: FleetVehicle,
        uplink: U,
        run: RunFlag,
        commands: mpsc::UnboundedReceiver<CommandMessage>,
    ) -> Self {
        Self {
            vehicle,
            uplink,
            run,
            commands,
            commands_open: true,
        }
    }

    pub fn vehicle(&self) -> &FleetVehicle {
        &self.vehicle
    }

    pub fn into_vehicle(self) -> FleetVehicle {
        self.vehicle
    }

    /// Loops until the run flag is cleared.
    pub async fn simulate(&mut self) {
        while self.run.is_running() {
            let now = Instant::now();
            if self.vehicle.core().delay_pending(now) {
                self.pause(DELAY_POLL).await;
                continue;
            }
            if self.vehicle.core_mut().take_elapsed_delay(now) {
                self.vehicle.resume_after_delay();
            }
            self.vehicle.pre_step(&Clock::now());
            self.movement_step().await;
            self.vehicle.post_step();
        }
    }

    /// One unit of travel: returns after a leg completes, a passive update,
    /// a new delay, or shutdown.
    pub async fn movement_step(&mut self) {
        while self.run.is_running() {
            if self.vehicle.core().delay_pending(Instant::now()) {
                return;
            }
            let tick = self.vehicle.tick(&Clock::now());
            for message in tick.control {
                self.uplink.send_control(message).await;
            }
            for message in tick.beacons {
                self.uplink.send_beacon(message).await;
            }
            if tick.finished {
                log::info!("{} finished its trip", self.vehicle.id());
                self.run.stop();
                return;
            }
            if let Some(pause) = tick.pause {
                if !self.pause(pause).await {
                    return;
                }
            }
            if tick.leg_complete {
                return;
            }
        }
    }

    /// Waits for `duration`, applying any command that arrives meanwhile.
    /// Returns false if the run was stopped.
    async fn pause(&mut self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return self.run.is_running(),
                _ = self.run.stopped() => return false,
                received = self.commands.recv(), if self.commands_open => match received {
                    Some(command) => self.apply_command(command).await,
                    None => self.commands_open = false,
                },
            }
        }
    }

    async fn apply_command(&mut self, command: CommandMessage) {
        let request = CommandRequest::from_message(self.vehicle.id(), &command);
        let outcome = self.vehicle.handle_command(&request, &Clock::now());
        let core = self.vehicle.core();
        let reply = outcome.to_message(&core.id, &request.kind, core.status);
        self.uplink.send_control(reply).await;
        if outcome.stops_vehicle() {
            log::info!("{} stopping on {} command", self.vehicle.id(), request.kind);
            self.run.stop();
        }
    }
}

/// Vehicle process lifecycle: connect, listen for commands, drive, close.
#[derive(Debug)]
pub struct VehicleClient {
    config: Arc<FleetConfig>,
    run: RunFlag,
    connection: Option<Arc<ConnectionManager>>,
    closed: AtomicBool,
}

impl VehicleClient {
    pub fn new(config: Arc<FleetConfig>, run: RunFlag) -> Self {
        Self {
            config,
            run,
            connection: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Runs the vehicle until it stops, then closes. Returns the final
    /// vehicle state.
    pub async fn start(&mut self, vehicle: FleetVehicle) -> Result<FleetVehicle> {
        let connection = Arc::new(ConnectionManager::new(
            vehicle.id(),
            vehicle.vehicle_type(),
            self.config.server.tcp_addr(),
            self.config.reconnect.clone(),
            self.run.clone(),
        ));
        self.connection = Some(connection.clone());
        let result = self.drive(connection, vehicle).await;
        self.close().await;
        result
    }

    async fn drive(
        &self,
        connection: Arc<ConnectionManager>,
        vehicle: FleetVehicle,
    ) -> Result<FleetVehicle> {
        let reader = connection.connect().await?;
        let beacon = BeaconChannel::open(&self.config.server.udp_addr()).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = tokio::spawn(connection.clone().listen_for_commands(reader, tx));

        let mut driver = VehicleDriver::new(vehicle, LiveUplink::new(connection, beacon), self.run.clone(), rx);
        driver.simulate().await;

        self.run.stop();
        if let Err(e) = listener.await {
            log::warn!("command listener ended abnormally: {}", e);
        }
        Ok(driver.into_vehicle())
    }

    /// Closes sockets and clears the run flag. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.run.stop();
        if let Some(connection) = &self.connection {
            connection.disconnect().await;
        }
        log::info!("Vehicle client shutting down");
    }
}
