pub mod framing;
pub mod messages;
