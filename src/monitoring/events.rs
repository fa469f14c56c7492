use std::fmt;
use std::sync::{Arc, RwLock};

/// Domain events fanned out to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FleetEvent {
    VehicleConnected,
    VehicleDisconnected,
    LocationUpdate,
    StatusUpdate,
    CommandSent,
    CommandAck,
    CommandFailure,
    Arrival,
}

impl FleetEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            FleetEvent::VehicleConnected => "VEHICLE_CONNECTED",
            FleetEvent::VehicleDisconnected => "VEHICLE_DISCONNECTED",
            FleetEvent::LocationUpdate => "LOCATION_UPDATE",
            FleetEvent::StatusUpdate => "STATUS_UPDATE",
            FleetEvent::CommandSent => "COMMAND_SENT",
            FleetEvent::CommandAck => "COMMAND_ACK",
            FleetEvent::CommandFailure => "COMMAND_FAILURE",
            FleetEvent::Arrival => "ARRIVAL",
        }
    }
}

impl fmt::Display for FleetEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Observer: Send + Sync {
    fn update(&self, event: FleetEvent, data: &str);
}

/// Ordered, duplicate-free list of observers.
///
/// Notification is synchronous: every observer sees the event once, in
/// registration order, before `notify` returns.
#[derive(Default)]
pub struct Subject {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl Subject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if this exact observer was already registered.
    pub fn register(&self, observer: Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        if observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            return false;
        }
        observers.push(observer);
        true
    }

    pub fn remove(&self, observer: &Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    pub fn notify(&self, event: FleetEvent, data: &str) {
        // Snapshot so an observer may register or remove without deadlocking.
        let observers = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer.update(event, data);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Subject")
            .field("observers", &self.len())
            .finish()
    }
}

/// Writes every event to the process log.
#[derive(Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn update(&self, event: FleetEvent, data: &str) {
        log::info!("[LOG] {}: {}", event, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Observer for Recorder {
        fn update(&self, event: FleetEvent, data: &str) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}:{}", self.name, event, data));
        }
    }

    #[test]
    fn notifies_in_registration_order_once_each() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subject = Subject::new();
        let first: Arc<dyn Observer> = Arc::new(Recorder { name: "a", seen: seen.clone() });
        let second: Arc<dyn Observer> = Arc::new(Recorder { name: "b", seen: seen.clone() });

        assert!(subject.register(first.clone()));
        assert!(subject.register(second));
        assert!(!subject.register(first));

        subject.notify(FleetEvent::Arrival, "Bus B101 arrived at Flatiron");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "a:ARRIVAL:Bus B101 arrived at Flatiron".to_string(),
                "b:ARRIVAL:Bus B101 arrived at Flatiron".to_string(),
            ]
        );
    }

    #[test]
    fn removed_observer_stops_receiving() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subject = Subject::new();
        let observer: Arc<dyn Observer> = Arc::new(Recorder { name: "a", seen: seen.clone() });
        subject.register(observer.clone());
        assert!(subject.remove(&observer));
        assert!(!subject.remove(&observer));
        subject.notify(FleetEvent::CommandSent, "DELAY -> B101");
        assert!(seen.lock().unwrap().is_empty());
        assert!(subject.is_empty());
    }
}
