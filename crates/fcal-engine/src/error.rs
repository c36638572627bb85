use fcal_proto::SessionId;
use thiserror::Error;

/// Misuse of the engine API. Protocol outcomes (rejections, failures,
/// cancellations) are states, never errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("calibration session {0} is still active")]
    SessionActive(SessionId),

    #[error("no calibration session has been started")]
    NoSession,

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("calibration service has shut down")]
    ServiceClosed,
}
