use crate::communication::messages::Message;
use crate::error::{FleetError, Result};
use crate::shared_data::VehicleType;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One live vehicle connection.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub connection_id: u64,
    pub vehicle_type: VehicleType,
    /// Frames queued here are written by the connection's writer task.
    pub outbox: mpsc::UnboundedSender<Message>,
}

impl RegistryEntry {
    pub fn deliver(&self, vehicle_id: &str, message: Message) -> Result<()> {
        self.outbox
            .send(message)
            .map_err(|_| FleetError::CommandDelivery(vehicle_id.to_string()))
    }
}

/// Vehicle id -> live connection. The lock is only held for the map
/// operation itself, never across I/O.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
    next_connection: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Adds or replaces the entry for `vehicle_id`. Returns the replaced entry.
    pub fn insert(&self, vehicle_id: &str, entry: RegistryEntry) -> Option<RegistryEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(vehicle_id.to_string(), entry)
    }

    /// Removes the entry only if it still belongs to `connection_id`, so a
    /// stale connection cannot evict the vehicle's newer one.
    pub fn remove(&self, vehicle_id: &str, connection_id: u64) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(vehicle_id) {
            Some(entry) if entry.connection_id == connection_id => {
                entries.remove(vehicle_id);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, vehicle_id: &str) -> Option<RegistryEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(vehicle_id)
            .cloned()
    }

    /// (vehicle id, type) pairs sorted by id.
    pub fn snapshot(&self) -> Vec<(String, VehicleType)> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.vehicle_type))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(registry: &Registry, vehicle_type: VehicleType) -> (RegistryEntry, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let entry = RegistryEntry {
            connection_id: registry.next_connection_id(),
            vehicle_type,
            outbox: tx,
        };
        (entry, rx)
    }

    #[test]
    fn reregistration_replaces_and_stale_removal_is_ignored() {
        let registry = Registry::new();
        let (old, _old_rx) = entry(&registry, VehicleType::Bus);
        let (new, _new_rx) = entry(&registry, VehicleType::Bus);
        let old_id = old.connection_id;
        let new_id = new.connection_id;

        assert!(registry.insert("B101", old).is_none());
        assert!(registry.insert("B101", new).is_some());
        assert!(!registry.remove("B101", old_id));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("B101", new_id));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = Registry::new();
        for (id, t) in [("T2", VehicleType::Train), ("B101", VehicleType::Bus), ("U950", VehicleType::Uber)] {
            let (e, _rx) = entry(&registry, t);
            registry.insert(id, e);
        }
        let ids: Vec<String> = registry.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["B101", "T2", "U950"]);
    }

    #[test]
    fn delivery_to_closed_outbox_fails() {
        let registry = Registry::new();
        let (e, rx) = entry(&registry, VehicleType::Shuttle);
        drop(rx);
        let msg = crate::control_system::commands::CommandRequest::shutdown("S1").to_message();
        assert!(matches!(e.deliver("S1", msg), Err(FleetError::CommandDelivery(_))));
    }
}
