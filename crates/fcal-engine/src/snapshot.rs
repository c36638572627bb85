use fcal_proto::{BodyPosition, SensorKind, SessionId};
use serde::Serialize;

use crate::machine::{CalState, StateTag};
use crate::session::{CalResult, CalibrationSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStyle {
    /// Correction shown next to the instruction; no acknowledgement needed.
    Inline,
    /// Blocking alert the user has to dismiss.
    Modal,
    Notice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub style: AlertStyle,
    pub text: String,
}

/// Read-only projection of the engine for the UI, recomputed after every
/// transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub session: Option<SessionId>,
    pub sensor: Option<SensorKind>,
    pub state: StateTag,
    pub instruction: String,
    pub progress: u8,
    pub confirm_enabled: bool,
    pub active_position: Option<BodyPosition>,
    pub result: Option<CalResult>,
    pub alert: Option<Alert>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            session: None,
            sensor: None,
            state: StateTag::Idle,
            instruction: "Select a sensor and start calibration.".into(),
            progress: 0,
            confirm_enabled: false,
            active_position: None,
            result: None,
            alert: None,
        }
    }
}

const PER_POSITION_PCT: usize = 15;

fn progress(session: &CalibrationSession) -> u8 {
    let state = session.state();
    if matches!(state, CalState::Completed) {
        return 100;
    }
    if session.sensor().uses_positions() {
        return (session.accepted_positions().min(BodyPosition::COUNT) * PER_POSITION_PCT) as u8;
    }
    match state {
        CalState::Idle | CalState::AwaitingAcknowledgement => 0,
        CalState::Rotating | CalState::HoldingStill => 50,
        _ => 0,
    }
}

fn instruction_and_alert(session: &CalibrationSession) -> (String, Option<Alert>) {
    let sensor = session.sensor();
    let inline = |text: &str| Some(Alert { style: AlertStyle::Inline, text: text.to_string() });
    let modal = |text: String| Some(Alert { style: AlertStyle::Modal, text });

    match session.state() {
        CalState::Idle => ("Select a sensor and start calibration.".into(), None),
        CalState::AwaitingAcknowledgement => (
            format!("Waiting for the flight controller to accept the {} calibration request...", sensor),
            None,
        ),
        CalState::AwaitingInstruction => (
            "Calibration started; waiting for the flight controller to request the first position.".into(),
            None,
        ),
        CalState::AwaitingUserPosition { position, correction } => (
            format!("Place the vehicle {} and confirm once it is still.", position.name()),
            correction.as_deref().and_then(inline),
        ),
        CalState::Sampling { position, retry } => (
            if *retry {
                format!("Re-checking orientation for {}...", position)
            } else {
                format!("Checking orientation for {}...", position)
            },
            None,
        ),
        CalState::AwaitingSampling { position } => (
            format!("Position {} sent; keep the vehicle still while the flight controller samples it.", position),
            None,
        ),
        CalState::PositionAccepted { position } => (
            format!("Position {} accepted; waiting for the next instruction.", position),
            None,
        ),
        CalState::PositionRejected { position, result } => (
            format!("Re-place the vehicle {} and confirm to retry.", position.name()),
            modal(format!("The flight controller rejected position {} ({}).", position, result)),
        ),
        CalState::Rotating => (
            "Rotate the vehicle slowly around every axis until the flight controller reports completion.".into(),
            None,
        ),
        CalState::HoldingStill => (
            format!("Keep the vehicle still while the flight controller calibrates the {}.", sensor),
            None,
        ),
        CalState::Completed => (
            format!("{} calibration completed.", sensor),
            Some(Alert { style: AlertStyle::Notice, text: format!("{} calibration successful.", sensor) }),
        ),
        CalState::Failed { reason } => ("Calibration failed.".into(), modal(format!("Calibration failed: {}.", reason))),
        CalState::Rejected { reason } => (
            "Calibration request refused.".into(),
            modal(format!("Calibration request rejected: {}.", reason)),
        ),
        CalState::TimedOut { reason } => ("Calibration timed out.".into(), modal(format!("Calibration timed out: {}.", reason))),
        CalState::Cancelled => ("Calibration cancelled.".into(), None),
    }
}

impl StateSnapshot {
    pub fn project(session: Option<&CalibrationSession>) -> Self {
        let Some(session) = session else {
            return Self::default();
        };
        let state = session.state();
        let (instruction, alert) = instruction_and_alert(session);
        Self {
            session: Some(session.id()),
            sensor: Some(session.sensor()),
            state: state.tag(),
            instruction,
            progress: progress(session),
            confirm_enabled: state.confirm_enabled(),
            active_position: state.active_position(),
            result: Some(session.result()),
            alert,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
