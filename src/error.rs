//! Error types for the fleet protocol stack

/// Result type alias
pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Socket or file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON on either channel
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Control-channel frame above the size limit
    #[error("Frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    /// A well-formed message arrived where it is not allowed
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// No control connection is currently open
    #[error("Not connected to the dispatch server")]
    NotConnected,

    /// Reconnection retries exhausted
    #[error("Connection failed after {attempts} attempts")]
    ConnectionExhausted { attempts: u32 },

    /// The run was stopped before a connection was established
    #[error("Connection attempt cancelled by shutdown")]
    Cancelled,

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Vehicle {0} not found in registry")]
    VehicleNotFound(String),

    /// The vehicle's connection closed before the command could be queued
    #[error("Could not deliver command to {0}")]
    CommandDelivery(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Plot error: {0}")]
    Plot(String),
}
