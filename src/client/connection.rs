use crate::communication::framing::{read_frame, write_frame};
use crate::communication::messages::{CommandMessage, Message, Registration};
use crate::config::ReconnectPolicy;
use crate::error::{FleetError, Result};
use crate::shared_data::{RunFlag, VehicleType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Registering,
    Connected,
    Reconnecting,
    Terminated,
}

/// Owns the vehicle's control-channel socket: registration, reconnect with
/// backoff, and the command receive loop.
#[derive(Debug)]
pub struct ConnectionManager {
    vehicle_id: String,
    vehicle_type: VehicleType,
    server_addr: String,
    policy: ReconnectPolicy,
    run: RunFlag,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    state: Mutex<ConnectionState>,
    server_shutdown_detected: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        vehicle_id: impl Into<String>,
        vehicle_type: VehicleType,
        server_addr: impl Into<String>,
        policy: ReconnectPolicy,
        run: RunFlag,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            vehicle_type,
            server_addr: server_addr.into(),
            policy,
            run,
            writer: tokio::sync::Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            server_shutdown_detected: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn server_shutdown_detected(&self) -> bool {
        self.server_shutdown_detected.load(Ordering::SeqCst)
    }

    /// Opens the control channel and registers, retrying with exponential
    /// backoff. On exhaustion the connection is terminated and the run flag
    /// cleared. A stop while connecting or backing off ends the attempt
    /// with `Cancelled`. Returns the read half for the command listener.
    pub async fn connect(&self) -> Result<OwnedReadHalf> {
        let attempts = self.policy.max_retries.max(1);
        for attempt in 1..=attempts {
            if !self.run.is_running() {
                return Err(self.cancelled());
            }
            self.set_state(if attempt == 1 && !self.server_shutdown_detected() {
                ConnectionState::Registering
            } else {
                ConnectionState::Reconnecting
            });
            let registered = tokio::select! {
                registered = self.try_register() => registered,
                _ = self.run.stopped() => return Err(self.cancelled()),
            };
            match registered {
                Ok(reader) => {
                    self.server_shutdown_detected.store(false, Ordering::SeqCst);
                    self.set_state(ConnectionState::Connected);
                    log::info!(
                        "{} {} registered with dispatch server at {}",
                        self.vehicle_type,
                        self.vehicle_id,
                        self.server_addr
                    );
                    return Ok(reader);
                }
                Err(e) => {
                    log::warn!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt,
                        attempts,
                        self.server_addr,
                        e
                    );
                    if attempt < attempts {
                        let wait = self.policy.backoff(attempt);
                        log::warn!("Retrying in {:.1}s...", wait.as_secs_f64());
                        if !self.run.sleep(wait).await {
                            return Err(self.cancelled());
                        }
                    }
                }
            }
        }
        self.set_state(ConnectionState::Terminated);
        self.run.stop();
        log::error!(
            "{} giving up on the dispatch server after {} attempts",
            self.vehicle_id,
            attempts
        );
        Err(FleetError::ConnectionExhausted { attempts })
    }

    fn cancelled(&self) -> FleetError {
        self.set_state(ConnectionState::Disconnected);
        log::info!("{} stopped before reaching the dispatch server", self.vehicle_id);
        FleetError::Cancelled
    }

    async fn try_register(&self) -> Result<OwnedReadHalf> {
        let stream = TcpStream::connect(&self.server_addr).await?;
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();
        let registration = Message::Registration(Registration {
            vehicle_id: self.vehicle_id.clone(),
            vehicle_type: self.vehicle_type,
        });
        write_frame(&mut writer, &registration).await?;
        *self.writer.lock().await = Some(writer);
        Ok(reader)
    }

    /// Best-effort send on the control channel. A failure marks the server
    /// as gone; reconnecting is left to the listener.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(FleetError::NotConnected);
        };
        match write_frame(writer, message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.server_shutdown_detected.store(true, Ordering::SeqCst);
                log::warn!("{} failed to send {}: {}", self.vehicle_id, message.kind(), e);
                Err(e)
            }
        }
    }

    /// Closes the write half. Idempotent.
    pub async fn disconnect(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if self.state() != ConnectionState::Terminated {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Reads commands until the run flag clears. A closed or broken socket
    /// triggers a reconnect; if that fails the loop ends.
    pub async fn listen_for_commands(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        commands: mpsc::UnboundedSender<CommandMessage>,
    ) {
        loop {
            let frame = tokio::select! {
                frame = read_frame(&mut reader) => frame,
                _ = self.run.stopped() => break,
            };
            let cause = match frame {
                Ok(Some(Message::Command(command))) => {
                    log::info!("{} received command {}", self.vehicle_id, command.command);
                    if commands.send(command).is_err() {
                        break;
                    }
                    continue;
                }
                Ok(Some(other)) => {
                    log::warn!("{} ignoring unexpected {} on control channel", self.vehicle_id, other.kind());
                    continue;
                }
                Ok(None) => "server closed the connection".to_string(),
                Err(e) => e.to_string(),
            };

            self.server_shutdown_detected.store(true, Ordering::SeqCst);
            log::warn!("{} lost the dispatch server ({}), reconnecting", self.vehicle_id, cause);
            self.disconnect().await;
            match self.connect().await {
                Ok(fresh) => reader = fresh,
                Err(FleetError::Cancelled) => break,
                Err(e) => {
                    log::error!("{} command listener stopping: {}", self.vehicle_id, e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::messages::CommandKind;
    use crate::control_system::commands::CommandRequest;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn fast_policy(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries,
            backoff_unit_ms: 1,
        }
    }

    #[tokio::test]
    async fn connect_registers_and_receives_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let run = RunFlag::new();
        let manager = Arc::new(ConnectionManager::new("B101", VehicleType::Bus, addr, fast_policy(3), run.clone()));

        let (connected, accepted) = tokio::join!(manager.connect(), listener.accept());
        let reader = connected.unwrap();
        let (mut server_side, _) = accepted.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);

        match read_frame(&mut server_side).await.unwrap() {
            Some(Message::Registration(r)) => {
                assert_eq!(r.vehicle_id, "B101");
                assert_eq!(r.vehicle_type, VehicleType::Bus);
            }
            other => panic!("expected registration, got {:?}", other),
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener_task = tokio::spawn(manager.clone().listen_for_commands(reader, tx));
        write_frame(&mut server_side, &CommandRequest::reroute("B101").to_message())
            .await
            .unwrap();
        let command = rx.recv().await.unwrap();
        assert_eq!(command.command, CommandKind::Reroute);

        run.stop();
        tokio::time::timeout(Duration::from_secs(5), listener_task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn exhausted_retries_terminate_and_clear_run_flag() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let run = RunFlag::new();
        let manager = ConnectionManager::new("T9", VehicleType::Train, addr, fast_policy(2), run.clone());

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, FleetError::ConnectionExhausted { attempts: 2 }));
        assert_eq!(manager.state(), ConnectionState::Terminated);
        assert!(!run.is_running());
    }

    #[tokio::test]
    async fn stopped_run_cancels_without_attempting() {
        let run = RunFlag::new();
        run.stop();
        let manager = ConnectionManager::new("B6", VehicleType::Bus, "127.0.0.1:9", fast_policy(5), run);
        assert!(matches!(manager.connect().await, Err(FleetError::Cancelled)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn stop_during_backoff_cancels_promptly() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let run = RunFlag::new();
        let policy = ReconnectPolicy {
            max_retries: 5,
            backoff_unit_ms: 60_000,
        };
        let manager = ConnectionManager::new("T10", VehicleType::Train, addr, policy, run.clone());

        let stopper = run.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.stop();
        });
        let result = tokio::time::timeout(Duration::from_secs(5), manager.connect())
            .await
            .unwrap();
        assert!(matches!(result, Err(FleetError::Cancelled)));
        assert_ne!(manager.state(), ConnectionState::Terminated);
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let manager = ConnectionManager::new("S1", VehicleType::Shuttle, "127.0.0.1:9", fast_policy(1), RunFlag::new());
        let msg = CommandRequest::shutdown("S1").to_message();
        assert!(matches!(manager.send(&msg).await, Err(FleetError::NotConnected)));
    }

    #[tokio::test]
    async fn server_hangup_triggers_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let run = RunFlag::new();
        let manager = Arc::new(ConnectionManager::new("B5", VehicleType::Bus, addr, fast_policy(5), run.clone()));

        let (connected, accepted) = tokio::join!(manager.connect(), listener.accept());
        let reader = connected.unwrap();
        drop(accepted.unwrap());

        let (tx, _rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(manager.clone().listen_for_commands(reader, tx));

        let (mut second, _) = listener.accept().await.unwrap();
        assert!(matches!(read_frame(&mut second).await.unwrap(), Some(Message::Registration(_))));

        run.stop();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
