pub mod calibrator;
pub mod diagnostics;
pub mod doctor;
pub mod error;
pub mod machine;
pub mod orientation;
pub mod service;
pub mod session;
pub mod snapshot;
pub mod statustext;

use serde::Deserialize;

pub use calibrator::Calibrator;
pub use error::EngineError;
pub use machine::{CalState, StateTag};
pub use service::{CalibrationHandle, CalibrationService};
pub use session::{CalResult, CalibrationSession, PositionAttempt};
pub use snapshot::{Alert, AlertStyle, StateSnapshot};

/// Engine tuning as read from the `[validator]` and `[phrases]` config sections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub validator: orientation::ValidatorConfig,
    #[serde(default)]
    pub phrases: statustext::PhraseTable,
}

impl EngineConfig {
    pub fn check(&self) -> anyhow::Result<()> {
        doctor::check_validator(&self.validator)?;
        doctor::check_phrases(&self.phrases)?;
        Ok(())
    }
}
