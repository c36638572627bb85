pub mod message;
pub mod sensor;

pub use message::{
    AccelSample, AckResult, CommandAck, CommandId, Inbound, InboundMessage, Outbound,
    OutboundCommand, SessionId, Severity, StatusText,
};
pub use sensor::{BodyPosition, SensorKind};
