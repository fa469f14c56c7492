use crate::client::beacon::BeaconChannel;
use crate::client::connection::ConnectionManager;
use crate::communication::messages::Message;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Everything a vehicle transmits goes through here.
pub trait Uplink: Send + Sync {
    /// Best-effort control-channel send.
    fn send_control(&self, message: Message) -> impl Future<Output = ()> + Send;

    fn send_beacon(&self, message: Message) -> impl Future<Output = ()> + Send;
}

/// The real sockets.
#[derive(Debug)]
pub struct LiveUplink {
    connection: Arc<ConnectionManager>,
    beacon: BeaconChannel,
}

impl LiveUplink {
    pub fn new(connection: Arc<ConnectionManager>, beacon: BeaconChannel) -> Self {
        Self { connection, beacon }
    }
}

impl Uplink for LiveUplink {
    async fn send_control(&self, message: Message) {
        // Errors are logged by the connection manager; the listener reconnects.
        let _ = self.connection.send(&message).await;
    }

    async fn send_beacon(&self, message: Message) {
        self.beacon.send(&message).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Control(Message),
    Beacon(Message),
}

/// Keeps every message in memory, in send order.
#[derive(Debug, Default)]
pub struct RecordingUplink {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingUplink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn control(&self) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Control(m) => Some(m),
                Sent::Beacon(_) => None,
            })
            .collect()
    }

    pub fn beacons(&self) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Beacon(m) => Some(m),
                Sent::Control(_) => None,
            })
            .collect()
    }

    fn push(&self, sent: Sent) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(sent);
    }
}

impl Uplink for RecordingUplink {
    async fn send_control(&self, message: Message) {
        self.push(Sent::Control(message));
    }

    async fn send_beacon(&self, message: Message) {
        self.push(Sent::Beacon(message));
    }
}

impl<U: Uplink> Uplink for Arc<U> {
    async fn send_control(&self, message: Message) {
        (**self).send_control(message).await
    }

    async fn send_beacon(&self, message: Message) {
        (**self).send_beacon(message).await
    }
}
