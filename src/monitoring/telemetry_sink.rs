use crate::error::Result;
use crate::shared_data::current_timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const LOCATION_FILE: &str = "location_updates.csv";
pub const EVENT_FILE: &str = "event_logs.csv";
pub const COMMAND_FILE: &str = "admin_commands.csv";
pub const VEHICLE_FILE: &str = "vehicles.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub timestamp: String,
    pub vehicle_id: String,
    pub vehicle_type: String,
    pub lat: f64,
    pub long: f64,
    pub status: String,
    pub network_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: String,
    pub event_type: String,
    pub vehicle_id: String,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandDispatchStatus {
    Sent,
    Failed,
    NotFound,
}

impl fmt::Display for CommandDispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommandDispatchStatus::Sent => write!(f, "SENT"),
            CommandDispatchStatus::Failed => write!(f, "FAILED"),
            CommandDispatchStatus::NotFound => write!(f, "NOT_FOUND"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub timestamp: String,
    pub vehicle_id: String,
    pub command: String,
    pub params: String,
    pub status: CommandDispatchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatusRecord {
    pub timestamp: String,
    pub vehicle_id: String,
    pub vehicle_type: String,
    pub status: String,
}

/// Write-only destination for server telemetry. Implementations must not
/// block the caller.
pub trait TelemetrySink: Send + Sync {
    fn record_location(&self, record: LocationRecord);
    fn record_event(&self, record: EventRecord);
    fn record_command(&self, record: CommandRecord);
    fn record_status(&self, record: VehicleStatusRecord);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn record_location(&self, _record: LocationRecord) {}
    fn record_event(&self, _record: EventRecord) {}
    fn record_command(&self, _record: CommandRecord) {}
    fn record_status(&self, _record: VehicleStatusRecord) {}
}

impl EventRecord {
    pub fn now(event_type: impl Into<String>, vehicle_id: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            event_type: event_type.into(),
            vehicle_id: vehicle_id.into(),
            details: details.into(),
        }
    }
}

enum Row {
    Location(LocationRecord),
    Event(EventRecord),
    Command(CommandRecord),
    Status(VehicleStatusRecord),
}

/// Appends rows to CSV files in one directory from a dedicated blocking
/// writer task.
#[derive(Debug, Clone)]
pub struct CsvTelemetrySink {
    tx: mpsc::UnboundedSender<Row>,
    dir: PathBuf,
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Row::Location(r) => write!(f, "Location({})", r.vehicle_id),
            Row::Event(r) => write!(f, "Event({})", r.event_type),
            Row::Command(r) => write!(f, "Command({})", r.command),
            Row::Status(r) => write!(f, "Status({})", r.vehicle_id),
        }
    }
}

impl CsvTelemetrySink {
    /// Creates the directory and starts the writer. The returned handle
    /// finishes once every clone of the sink has been dropped and all
    /// queued rows are on disk.
    pub fn spawn<P: AsRef<Path>>(dir: P) -> Result<(Self, JoinHandle<()>)> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Row>();
        let out = dir.clone();
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(row) = rx.blocking_recv() {
                let written = match &row {
                    Row::Location(r) => log_to_csv(&out.join(LOCATION_FILE), r),
                    Row::Event(r) => log_to_csv(&out.join(EVENT_FILE), r),
                    Row::Command(r) => log_to_csv(&out.join(COMMAND_FILE), r),
                    Row::Status(r) => log_to_csv(&out.join(VEHICLE_FILE), r),
                };
                if let Err(e) = written {
                    log::error!("Error logging {:?}: {}", row, e);
                }
            }
        });
        Ok((Self { tx, dir }, handle))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn push(&self, row: Row) {
        if self.tx.send(row).is_err() {
            log::warn!("Telemetry writer has stopped; row dropped");
        }
    }
}

impl TelemetrySink for CsvTelemetrySink {
    fn record_location(&self, record: LocationRecord) {
        self.push(Row::Location(record));
    }

    fn record_event(&self, record: EventRecord) {
        self.push(Row::Event(record));
    }

    fn record_command(&self, record: CommandRecord) {
        self.push(Row::Command(record));
    }

    fn record_status(&self, record: VehicleStatusRecord) {
        self.push(Row::Status(record));
    }
}

/// Appends one record, writing the header row only when the file is new.
fn log_to_csv<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let file_exists = path.exists();
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    wtr.serialize(record)?;
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rows_land_in_their_files_with_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, writer) = CsvTelemetrySink::spawn(dir.path()).unwrap();

        for lat in [40.75, 40.76] {
            sink.record_location(LocationRecord {
                timestamp: current_timestamp(),
                vehicle_id: "B101".into(),
                vehicle_type: "Bus".into(),
                lat,
                long: -73.98,
                status: "On Time".into(),
                network_status: "UDP".into(),
            });
        }
        sink.record_command(CommandRecord {
            timestamp: current_timestamp(),
            vehicle_id: "U901".into(),
            command: "SHUTDOWN".into(),
            params: String::new(),
            status: CommandDispatchStatus::NotFound,
        });
        drop(sink);
        writer.await.unwrap();

        let locations = fs::read_to_string(dir.path().join(LOCATION_FILE)).unwrap();
        assert_eq!(locations.lines().count(), 3);
        assert!(locations.starts_with("timestamp,vehicle_id"));

        let commands = fs::read_to_string(dir.path().join(COMMAND_FILE)).unwrap();
        assert!(commands.contains("NOT_FOUND"));
        assert!(!dir.path().join(EVENT_FILE).exists());
    }
}
