use crate::communication::messages::{
    CommandAck, CommandKind, CommandMessage, CommandParams, CommandRejected, Message,
};
use crate::shared_data::{current_time_string, VehicleStatus};
use crate::simulation_engine::vehicles::Clock;
use std::time::Duration;

/// Delay applied when a DELAY command carries no duration.
pub const DEFAULT_DELAY_SECS: u64 = 30;

pub const UNKNOWN_COMMAND: &str = "Unknown command";

/// A command addressed to one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub kind: CommandKind,
    pub vehicle_id: String,
    pub params: Option<CommandParams>,
}

impl CommandRequest {
    pub fn new(kind: CommandKind, vehicle_id: impl Into<String>) -> Self {
        Self {
            kind,
            vehicle_id: vehicle_id.into(),
            params: None,
        }
    }

    pub fn delay(vehicle_id: impl Into<String>, seconds: u64) -> Self {
        Self {
            params: Some(CommandParams {
                duration: Some(seconds),
            }),
            ..Self::new(CommandKind::Delay, vehicle_id)
        }
    }

    pub fn reroute(vehicle_id: impl Into<String>) -> Self {
        Self::new(CommandKind::Reroute, vehicle_id)
    }

    pub fn shutdown(vehicle_id: impl Into<String>) -> Self {
        Self::new(CommandKind::Shutdown, vehicle_id)
    }

    pub fn start_route(vehicle_id: impl Into<String>) -> Self {
        Self::new(CommandKind::StartRoute, vehicle_id)
    }

    /// Rebuilds the request on the vehicle side, where the target is itself.
    pub fn from_message(vehicle_id: impl Into<String>, message: &CommandMessage) -> Self {
        Self {
            kind: message.command.clone(),
            vehicle_id: vehicle_id.into(),
            params: message.params.clone(),
        }
    }

    /// The wire form, stamped with the current time.
    pub fn to_message(&self) -> Message {
        Message::Command(CommandMessage {
            command: self.kind.clone(),
            params: self.params.clone(),
            timestamp: current_time_string(),
        })
    }

    pub fn delay_duration(&self) -> Duration {
        let secs = self
            .params
            .as_ref()
            .and_then(|p| p.duration)
            .unwrap_or(DEFAULT_DELAY_SECS);
        Duration::from_secs(secs)
    }
}

/// Result of handling a command on the vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Accepted {
        message: String,
        /// The vehicle ends its run after acknowledging
        stop: bool,
    },
    Rejected {
        reason: String,
    },
}

impl CommandOutcome {
    pub fn accepted(message: impl Into<String>) -> Self {
        CommandOutcome::Accepted {
            message: message.into(),
            stop: false,
        }
    }

    pub fn stopping(message: impl Into<String>) -> Self {
        CommandOutcome::Accepted {
            message: message.into(),
            stop: true,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        CommandOutcome::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandOutcome::Accepted { .. })
    }

    pub fn stops_vehicle(&self) -> bool {
        matches!(self, CommandOutcome::Accepted { stop: true, .. })
    }

    /// CommandAck or CommandRejected for the control channel.
    pub fn to_message(&self, vehicle_id: &str, kind: &CommandKind, status: VehicleStatus) -> Message {
        match self {
            CommandOutcome::Accepted { message, .. } => Message::CommandAck(CommandAck {
                vehicle_id: vehicle_id.to_string(),
                command: kind.clone(),
                message: message.clone(),
                status,
            }),
            CommandOutcome::Rejected { reason } => Message::CommandRejected(CommandRejected {
                vehicle_id: vehicle_id.to_string(),
                command: kind.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Per-vehicle-kind command rules: check applicability, then apply.
pub trait CommandExecutor {
    fn validate(&self, request: &CommandRequest, now: &Clock) -> Result<(), String>;

    /// Only called after `validate` succeeded.
    fn execute(&mut self, request: &CommandRequest, now: &Clock) -> CommandOutcome;

    fn unsupported_reason(&self) -> &'static str {
        UNKNOWN_COMMAND
    }
}

pub fn handle_command<E>(executor: &mut E, request: &CommandRequest, now: &Clock) -> CommandOutcome
where
    E: CommandExecutor + ?Sized,
{
    if let CommandKind::Other(name) = &request.kind {
        log::warn!("{} rejected unsupported command {}", request.vehicle_id, name);
        return CommandOutcome::rejected(executor.unsupported_reason());
    }
    match executor.validate(request, now) {
        Ok(()) => executor.execute(request, now),
        Err(reason) => CommandOutcome::rejected(reason),
    }
}
