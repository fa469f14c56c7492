use crate::error::Result;
use crate::shared_data::{Location, VehicleStatus, VehicleType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every message exchanged between vehicles and the dispatch server.
///
/// The `type` field carries the discriminator on the wire, e.g.
/// `{"type":"REGISTRATION","vehicle_id":"B101","vehicle_type":"Bus"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Registration(Registration),
    StatusUpdate(StatusUpdate),
    LocationUpdate(LocationUpdate),
    Command(CommandMessage),
    CommandAck(CommandAck),
    CommandRejected(CommandRejected),
}

/// Which socket a message travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Control,
    Beacon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub vehicle_id: String,
    pub vehicle_type: VehicleType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub vehicle_id: String,
    pub vehicle_type: VehicleType,
    pub status: VehicleStatus,
    pub location: Location,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub vehicle_id: String,
    pub vehicle_type: VehicleType,
    pub status: VehicleStatus,
    pub location: Location,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_stop: Option<String>,
    /// Minutes to the next stop or destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<u32>,
}

/// Server to vehicle. The target is implied by the connection it is written to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub command: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<CommandParams>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParams {
    /// Delay length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub vehicle_id: String,
    pub command: CommandKind,
    pub message: String,
    pub status: VehicleStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRejected {
    pub vehicle_id: String,
    pub command: CommandKind,
    pub reason: String,
}

/// Command names as they appear on the wire.
///
/// Names outside the known set decode to `Other` so vehicles can reject
/// them instead of dropping the connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandKind {
    Delay,
    Reroute,
    Shutdown,
    StartRoute,
    Other(String),
}

impl CommandKind {
    pub fn as_str(&self) -> &str {
        match self {
            CommandKind::Delay => "DELAY",
            CommandKind::Reroute => "REROUTE",
            CommandKind::Shutdown => "SHUTDOWN",
            CommandKind::StartRoute => "START_ROUTE",
            CommandKind::Other(name) => name,
        }
    }
}

impl From<String> for CommandKind {
    fn from(name: String) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "DELAY" => CommandKind::Delay,
            "REROUTE" => CommandKind::Reroute,
            "SHUTDOWN" => CommandKind::Shutdown,
            "START_ROUTE" => CommandKind::StartRoute,
            _ => CommandKind::Other(name),
        }
    }
}

impl From<CommandKind> for String {
    fn from(kind: CommandKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    /// The wire discriminator, e.g. "STATUS_UPDATE".
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Registration(_) => "REGISTRATION",
            Message::StatusUpdate(_) => "STATUS_UPDATE",
            Message::LocationUpdate(_) => "LOCATION_UPDATE",
            Message::Command(_) => "COMMAND",
            Message::CommandAck(_) => "COMMAND_ACK",
            Message::CommandRejected(_) => "COMMAND_REJECTED",
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Message::LocationUpdate(_) => Channel::Beacon,
            _ => Channel::Control,
        }
    }

    /// Sending vehicle, if the message carries one. Commands do not.
    pub fn vehicle_id(&self) -> Option<&str> {
        match self {
            Message::Registration(m) => Some(&m.vehicle_id),
            Message::StatusUpdate(m) => Some(&m.vehicle_id),
            Message::LocationUpdate(m) => Some(&m.vehicle_id),
            Message::CommandAck(m) => Some(&m.vehicle_id),
            Message::CommandRejected(m) => Some(&m.vehicle_id),
            Message::Command(_) => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn sample_beacon() -> Message {
        Message::LocationUpdate(LocationUpdate {
            vehicle_id: "B101".into(),
            vehicle_type: VehicleType::Bus,
            status: VehicleStatus::OnTime,
            location: Location::new(40.7580, -73.9855),
            timestamp: "08:15:00".into(),
            next_stop: Some("Flatiron".into()),
            eta: Some(4),
        })
    }

    #[test]
    fn registration_wire_shape() {
        let msg = Message::Registration(Registration {
            vehicle_id: "B101".into(),
            vehicle_type: VehicleType::Bus,
        });
        let value: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "REGISTRATION", "vehicle_id": "B101", "vehicle_type": "Bus"})
        );
    }

    #[test]
    fn location_update_carries_optional_fields() {
        let value: Value = serde_json::from_slice(&sample_beacon().encode().unwrap()).unwrap();
        assert_eq!(value["type"], "LOCATION_UPDATE");
        assert_eq!(value["status"], "On Time");
        assert_eq!(value["location"]["lat"], 40.7580);
        assert_eq!(value["next_stop"], "Flatiron");
        assert_eq!(value["eta"], 4);
        assert_eq!(sample_beacon().channel(), Channel::Beacon);
    }

    #[test]
    fn absent_optionals_are_omitted() {
        let msg = Message::StatusUpdate(StatusUpdate {
            vehicle_id: "T7".into(),
            vehicle_type: VehicleType::Train,
            status: VehicleStatus::Standby,
            location: Location::new(40.7489, -73.9375),
            timestamp: "09:00:00".into(),
            network_status: None,
        });
        let value: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert!(value.get("network_status").is_none());
        assert_eq!(msg.channel(), Channel::Control);
    }

    #[test]
    fn command_decodes_from_server_json() {
        let raw = br#"{"type":"COMMAND","command":"DELAY","params":{"duration":60},"timestamp":"10:00:00"}"#;
        match Message::decode(raw).unwrap() {
            Message::Command(cmd) => {
                assert_eq!(cmd.command, CommandKind::Delay);
                assert_eq!(cmd.params.and_then(|p| p.duration), Some(60));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn unknown_command_name_is_preserved() {
        let raw = br#"{"type":"COMMAND","command":"FLY","timestamp":"10:00:00"}"#;
        let Message::Command(cmd) = Message::decode(raw).unwrap() else {
            panic!("expected a command");
        };
        assert_eq!(cmd.command, CommandKind::Other("FLY".into()));
        assert_eq!(cmd.command.to_string(), "FLY");
        assert!(Message::decode(raw).unwrap().vehicle_id().is_none());
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(Message::decode(b"{not json").is_err());
        assert!(Message::decode(br#"{"type":"TELEPORT"}"#).is_err());
    }
}
