use crate::communication::framing::{read_frame, write_frame};
use crate::communication::messages::{LocationUpdate, Message, StatusUpdate};
use crate::config::FleetConfig;
use crate::control_system::commands::CommandRequest;
use crate::error::{FleetError, Result};
use crate::monitoring::events::{FleetEvent, LogObserver, Subject};
use crate::monitoring::telemetry_sink::{
    CommandDispatchStatus, CommandRecord, EventRecord, LocationRecord, TelemetrySink,
    VehicleStatusRecord,
};
use crate::server::registry::{Registry, RegistryEntry};
use crate::shared_data::{current_timestamp, RunFlag};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Largest UDP payload accepted on the beacon channel.
const MAX_DATAGRAM: usize = 64 * 1024;

/// The server's two bound sockets.
#[derive(Debug)]
pub struct Listeners {
    pub tcp: TcpListener,
    pub udp: UdpSocket,
}

impl Listeners {
    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }
}

/// Accepts vehicle connections, tracks them in the registry, receives
/// beacons and routes admin commands to live vehicles.
pub struct DispatchServer {
    config: Arc<FleetConfig>,
    registry: Registry,
    events: Subject,
    sink: Arc<dyn TelemetrySink>,
    run: RunFlag,
}

impl DispatchServer {
    pub fn new(config: Arc<FleetConfig>, sink: Arc<dyn TelemetrySink>, run: RunFlag) -> Self {
        let events = Subject::new();
        events.register(Arc::new(LogObserver));
        Self {
            config,
            registry: Registry::new(),
            events,
            sink,
            run,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn events(&self) -> &Subject {
        &self.events
    }

    pub fn run_flag(&self) -> &RunFlag {
        &self.run
    }

    pub async fn bind(&self) -> Result<Listeners> {
        let tcp = TcpListener::bind(self.config.server.tcp_addr()).await?;
        let udp = UdpSocket::bind(self.config.server.udp_addr()).await?;
        log::info!(
            "Dispatch server listening on {} (TCP) and {} (UDP)",
            tcp.local_addr()?,
            udp.local_addr()?
        );
        Ok(Listeners { tcp, udp })
    }

    /// Spawns the accept and beacon loops. The handle resolves once both
    /// have stopped with the run flag.
    pub fn serve(self: &Arc<Self>, listeners: Listeners) -> JoinHandle<()> {
        let accept = tokio::spawn(self.clone().accept_loop(listeners.tcp));
        let beacons = tokio::spawn(self.clone().udp_loop(listeners.udp));
        tokio::spawn(async move {
            let (a, b) = tokio::join!(accept, beacons);
            if let Err(e) = a.and(b) {
                log::error!("server loop ended abnormally: {}", e);
            }
        })
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(self.clone().handle_connection(stream, peer));
                    }
                    Err(e) => log::error!("Failed to accept connection: {}", e),
                },
                _ = self.run.stopped() => break,
            }
        }
        log::info!("Accept loop stopped");
    }

    async fn udp_loop(self: Arc<Self>, socket: UdpSocket) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let received = tokio::select! {
                received = socket.recv_from(&mut buf) => received,
                _ = self.run.stopped() => break,
            };
            match received {
                Ok((len, peer)) => {
                    if let Err(e) = self.process_beacon(&buf[..len]) {
                        log::warn!("Dropping beacon from {}: {}", peer, e);
                    }
                }
                Err(e) => log::warn!("UDP receive failed: {}", e),
            }
        }
        log::info!("Beacon loop stopped");
    }

    /// One vehicle connection from registration to disconnect.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let (mut reader, writer) = stream.into_split();
        let first = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = self.run.stopped() => return,
        };
        let registration = match first {
            Ok(Some(Message::Registration(registration))) => registration,
            Ok(Some(other)) => {
                log::warn!("{} sent {} before registering, closing", peer, other.kind());
                return;
            }
            Ok(None) => {
                log::info!("{} closed before registering", peer);
                return;
            }
            Err(e) => {
                log::warn!("Invalid registration from {}: {}", peer, e);
                return;
            }
        };
        let vehicle_id = registration.vehicle_id;
        let vehicle_type = registration.vehicle_type;

        let (outbox, inbox) = mpsc::unbounded_channel();
        let connection_id = self.registry.next_connection_id();
        let writer_task = tokio::spawn(drain_outbox(writer, inbox, vehicle_id.clone()));
        let entry = RegistryEntry {
            connection_id,
            vehicle_type,
            outbox,
        };
        if self.registry.insert(&vehicle_id, entry).is_some() {
            log::warn!("{} registered again, replacing its previous connection", vehicle_id);
        }
        self.events.notify(
            FleetEvent::VehicleConnected,
            &format!("{} {} connected from {}", vehicle_type, vehicle_id, peer),
        );
        self.sink.record_event(EventRecord::now(
            FleetEvent::VehicleConnected.as_str(),
            vehicle_id.as_str(),
            format!("{} from {}", vehicle_type, peer),
        ));

        loop {
            let frame = tokio::select! {
                frame = read_frame(&mut reader) => frame,
                _ = self.run.stopped() => break,
            };
            match frame {
                Ok(Some(message)) => self.process_control_message(&vehicle_id, message),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Dropping connection to {}: {}", vehicle_id, e);
                    break;
                }
            }
        }

        self.registry.remove(&vehicle_id, connection_id);
        writer_task.abort();
        self.events.notify(
            FleetEvent::VehicleDisconnected,
            &format!("{} {} disconnected", vehicle_type, vehicle_id),
        );
        self.sink.record_event(EventRecord::now(
            FleetEvent::VehicleDisconnected.as_str(),
            vehicle_id.as_str(),
            vehicle_type.to_string(),
        ));
    }

    pub fn process_control_message(&self, vehicle_id: &str, message: Message) {
        match message {
            Message::StatusUpdate(update) => self.record_status_update(update),
            Message::CommandAck(ack) => {
                let details = format!("{} acknowledged: {} ({})", ack.command, ack.message, ack.status);
                self.events
                    .notify(FleetEvent::CommandAck, &format!("{} {}", ack.vehicle_id, details));
                self.sink.record_event(EventRecord::now(
                    FleetEvent::CommandAck.as_str(),
                    ack.vehicle_id,
                    details,
                ));
            }
            Message::CommandRejected(rejected) => {
                let details = format!("{} rejected: {}", rejected.command, rejected.reason);
                self.events.notify(
                    FleetEvent::CommandFailure,
                    &format!("{} {}", rejected.vehicle_id, details),
                );
                self.sink.record_event(EventRecord::now(
                    FleetEvent::CommandFailure.as_str(),
                    rejected.vehicle_id,
                    details,
                ));
            }
            other => log::warn!(
                "Ignoring {} from {} on the control channel",
                other.kind(),
                vehicle_id
            ),
        }
    }

    fn record_status_update(&self, update: StatusUpdate) {
        self.sink.record_location(LocationRecord {
            timestamp: current_timestamp(),
            vehicle_id: update.vehicle_id.clone(),
            vehicle_type: update.vehicle_type.to_string(),
            lat: update.location.lat,
            long: update.location.long,
            status: update.status.to_string(),
            network_status: update
                .network_status
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
        });
        self.sink.record_status(VehicleStatusRecord {
            timestamp: current_timestamp(),
            vehicle_id: update.vehicle_id.clone(),
            vehicle_type: update.vehicle_type.to_string(),
            status: update.status.to_string(),
        });
        self.events.notify(
            FleetEvent::StatusUpdate,
            &format!(
                "{} {} is {} at {}",
                update.vehicle_type, update.vehicle_id, update.status, update.location
            ),
        );
    }

    /// Decodes one datagram. Anything but a LocationUpdate is an error.
    pub fn process_beacon(&self, bytes: &[u8]) -> Result<()> {
        match Message::decode(bytes)? {
            Message::LocationUpdate(update) => {
                self.record_beacon(update);
                Ok(())
            }
            other => Err(FleetError::UnexpectedMessage(format!(
                "{} on the beacon channel",
                other.kind()
            ))),
        }
    }

    fn record_beacon(&self, update: LocationUpdate) {
        let mut details = format!("{} {} at {}", update.vehicle_type, update.vehicle_id, update.location);
        if let Some(next_stop) = &update.next_stop {
            details.push_str(&format!(" -> {}", next_stop));
        }
        if let Some(eta) = update.eta {
            details.push_str(&format!(" (ETA {} min)", eta));
        }
        self.events.notify(FleetEvent::LocationUpdate, &details);
        self.sink.record_location(LocationRecord {
            timestamp: current_timestamp(),
            vehicle_id: update.vehicle_id,
            vehicle_type: update.vehicle_type.to_string(),
            lat: update.location.lat,
            long: update.location.long,
            status: update.status.to_string(),
            network_status: "UDP".to_string(),
        });
    }

    /// Queues a command for a registered vehicle.
    pub fn send_command(&self, request: &CommandRequest) -> CommandDispatchStatus {
        let status = match self.registry.lookup(&request.vehicle_id) {
            None => {
                log::warn!("{}", FleetError::VehicleNotFound(request.vehicle_id.clone()));
                CommandDispatchStatus::NotFound
            }
            Some(entry) => match entry.deliver(&request.vehicle_id, request.to_message()) {
                Ok(()) => {
                    self.events.notify(
                        FleetEvent::CommandSent,
                        &format!("{} -> {}", request.kind, request.vehicle_id),
                    );
                    CommandDispatchStatus::Sent
                }
                Err(e) => {
                    log::warn!("{}", e);
                    CommandDispatchStatus::Failed
                }
            },
        };
        let params = request
            .params
            .as_ref()
            .and_then(|p| p.duration)
            .map(|d| format!("duration={}", d))
            .unwrap_or_default();
        self.sink.record_command(CommandRecord {
            timestamp: current_timestamp(),
            vehicle_id: request.vehicle_id.clone(),
            command: request.kind.to_string(),
            params,
            status,
        });
        status
    }
}

/// Writes queued frames to one vehicle until the queue closes or the
/// socket fails.
async fn drain_outbox(
    mut writer: OwnedWriteHalf,
    mut inbox: mpsc::UnboundedReceiver<Message>,
    vehicle_id: String,
) {
    while let Some(message) = inbox.recv().await {
        if let Err(e) = write_frame(&mut writer, &message).await {
            log::warn!("Failed to write {} to {}: {}", message.kind(), vehicle_id, e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::events::Observer;
    use crate::monitoring::telemetry_sink::NullTelemetrySink;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(FleetEvent, String)>>);

    impl Observer for Collect {
        fn update(&self, event: FleetEvent, data: &str) {
            self.0.lock().unwrap().push((event, data.to_string()));
        }
    }

    fn server() -> DispatchServer {
        DispatchServer::new(
            Arc::new(FleetConfig::default()),
            Arc::new(NullTelemetrySink),
            RunFlag::new(),
        )
    }

    #[test]
    fn command_for_unknown_vehicle_is_not_found() {
        let server = server();
        let status = server.send_command(&CommandRequest::reroute("B404"));
        assert_eq!(status, CommandDispatchStatus::NotFound);
    }

    #[test]
    fn beacon_fans_out_location_event() {
        let server = server();
        let seen = Arc::new(Collect::default());
        server.events().register(seen.clone());
        let beacon = br#"{"type":"LOCATION_UPDATE","vehicle_id":"B101","vehicle_type":"Bus","status":"On Time","location":{"lat":40.75,"long":-73.98},"timestamp":"08:00:00","next_stop":"Flatiron","eta":3}"#;
        server.process_beacon(beacon).unwrap();
        let events = seen.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, FleetEvent::LocationUpdate);
        assert!(events[0].1.contains("Flatiron"));
    }

    #[test]
    fn malformed_or_misrouted_beacons_are_errors() {
        let server = server();
        assert!(matches!(server.process_beacon(b"\x00\x01"), Err(FleetError::Codec(_))));
        let registration = br#"{"type":"REGISTRATION","vehicle_id":"B1","vehicle_type":"Bus"}"#;
        assert!(matches!(
            server.process_beacon(registration),
            Err(FleetError::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn queued_command_reaches_outbox() {
        let server = server();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.registry().insert(
            "T3",
            RegistryEntry {
                connection_id: server.registry().next_connection_id(),
                vehicle_type: crate::shared_data::VehicleType::Train,
                outbox: tx,
            },
        );
        let status = server.send_command(&CommandRequest::start_route("T3"));
        assert_eq!(status, CommandDispatchStatus::Sent);
        assert!(matches!(rx.try_recv(), Ok(Message::Command(_))));
    }
}
