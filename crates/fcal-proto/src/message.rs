use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sensor::{BodyPosition, SensorKind};

/// Identifies one calibration session; rendered as 16 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// MAVLink severity ladder, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Emergency => "EMERGENCY",
            Severity::Alert => "ALERT",
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }
}

/// Numeric MAVLink command id as carried in COMMAND_LONG / COMMAND_ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub u16);

impl CommandId {
    pub const PREFLIGHT_CALIBRATION: CommandId = CommandId(241);
    pub const ACCELCAL_VEHICLE_POS: CommandId = CommandId(42429);

    pub fn name(&self) -> Option<&'static str> {
        match *self {
            Self::PREFLIGHT_CALIBRATION => Some("PREFLIGHT_CALIBRATION"),
            Self::ACCELCAL_VEHICLE_POS => Some("ACCELCAL_VEHICLE_POS"),
            _ => None,
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(n) => f.write_str(n),
            None => write!(f, "CMD#{}", self.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckResult {
    Accepted,
    TemporarilyRejected,
    Denied,
    Unsupported,
    Failed,
    InProgress,
    Cancelled,
}

impl AckResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AckResult::Accepted)
    }

    /// Anything that is neither accepted nor still running is a refusal.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, AckResult::Accepted | AckResult::InProgress)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AckResult::Accepted => "accepted",
            AckResult::TemporarilyRejected => "temporarily rejected",
            AckResult::Denied => "denied",
            AckResult::Unsupported => "unsupported",
            AckResult::Failed => "failed",
            AckResult::InProgress => "in progress",
            AckResult::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    pub command: CommandId,
    pub result: AckResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusText {
    pub severity: Severity,
    pub text: String,
}

/// One body-frame specific-force sample, m/s².
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    /// FC clock, milliseconds since boot.
    pub time_ms: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelSample {
    pub fn new(time_ms: u64, x: f64, y: f64, z: f64) -> Self {
        Self { time_ms, x, y, z }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InboundMessage {
    Ack(CommandAck),
    StatusText(StatusText),
    Sample(AccelSample),
}

/// Inbound traffic as handed over by the transport. `session` is set only
/// when the transport can attribute the message to a specific session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    #[serde(default)]
    pub session: Option<SessionId>,
    pub message: InboundMessage,
}

impl Inbound {
    pub fn untagged(message: InboundMessage) -> Self {
        Self { session: None, message }
    }

    pub fn tagged(session: SessionId, message: InboundMessage) -> Self {
        Self { session: Some(session), message }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum OutboundCommand {
    StartCalibration { sensor: SensorKind },
    ConfirmPosition { position: BodyPosition },
    /// Local abort notice; never encoded for the firmware.
    Abort { sensor: SensorKind },
}

impl OutboundCommand {
    /// The id the firmware will echo in its COMMAND_ACK, if any.
    pub fn command_id(&self) -> Option<CommandId> {
        match self {
            OutboundCommand::StartCalibration { .. } => Some(CommandId::PREFLIGHT_CALIBRATION),
            OutboundCommand::ConfirmPosition { .. } => Some(CommandId::ACCELCAL_VEHICLE_POS),
            OutboundCommand::Abort { .. } => None,
        }
    }

    pub fn is_local_only(&self) -> bool {
        self.command_id().is_none()
    }
}

impl fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundCommand::StartCalibration { sensor } => write!(f, "start {} calibration", sensor),
            OutboundCommand::ConfirmPosition { position } => write!(f, "confirm position {}", position),
            OutboundCommand::Abort { sensor } => write!(f, "abort {} calibration (local)", sensor),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    pub session: SessionId,
    pub command: OutboundCommand,
}
