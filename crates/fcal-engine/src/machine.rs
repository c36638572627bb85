//! Pure transition function of the calibration protocol.
//!
//! `transition` maps (state, sensor, event) to the next state plus a list of
//! effects for the driver to carry out. It never reads a clock: completion,
//! failure and timeout are only ever reached from firmware-originated events.

use fcal_proto::{AckResult, BodyPosition, CommandAck, CommandId, OutboundCommand, SensorKind, Severity};
use serde::Serialize;

use crate::orientation::{Vec3, Verdict};
use crate::session::CalResult;
use crate::statustext::StatusIntent;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum CalState {
    Idle,
    AwaitingAcknowledgement,
    AwaitingInstruction,
    AwaitingUserPosition {
        position: BodyPosition,
        /// Last local orientation complaint, shown inline until the next confirm.
        correction: Option<String>,
    },
    /// Transient: the orientation check for `position` is running.
    Sampling { position: BodyPosition, retry: bool },
    AwaitingSampling { position: BodyPosition },
    PositionAccepted { position: BodyPosition },
    PositionRejected { position: BodyPosition, result: AckResult },
    Rotating,
    HoldingStill,
    Completed,
    Failed { reason: String },
    Rejected { reason: String },
    TimedOut { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateTag {
    Idle,
    AwaitingAcknowledgement,
    AwaitingInstruction,
    AwaitingUserPosition,
    Sampling,
    AwaitingSampling,
    PositionAccepted,
    PositionRejected,
    Rotating,
    HoldingStill,
    Completed,
    Failed,
    Rejected,
    TimedOut,
    Cancelled,
}

impl StateTag {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StateTag::Completed | StateTag::Failed | StateTag::Rejected | StateTag::TimedOut | StateTag::Cancelled
        )
    }
}

impl CalState {
    pub fn tag(&self) -> StateTag {
        match self {
            CalState::Idle => StateTag::Idle,
            CalState::AwaitingAcknowledgement => StateTag::AwaitingAcknowledgement,
            CalState::AwaitingInstruction => StateTag::AwaitingInstruction,
            CalState::AwaitingUserPosition { .. } => StateTag::AwaitingUserPosition,
            CalState::Sampling { .. } => StateTag::Sampling,
            CalState::AwaitingSampling { .. } => StateTag::AwaitingSampling,
            CalState::PositionAccepted { .. } => StateTag::PositionAccepted,
            CalState::PositionRejected { .. } => StateTag::PositionRejected,
            CalState::Rotating => StateTag::Rotating,
            CalState::HoldingStill => StateTag::HoldingStill,
            CalState::Completed => StateTag::Completed,
            CalState::Failed { .. } => StateTag::Failed,
            CalState::Rejected { .. } => StateTag::Rejected,
            CalState::TimedOut { .. } => StateTag::TimedOut,
            CalState::Cancelled => StateTag::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.tag().is_terminal()
    }

    pub fn active_position(&self) -> Option<BodyPosition> {
        match self {
            CalState::AwaitingUserPosition { position, .. }
            | CalState::Sampling { position, .. }
            | CalState::AwaitingSampling { position }
            | CalState::PositionAccepted { position }
            | CalState::PositionRejected { position, .. } => Some(*position),
            _ => None,
        }
    }

    pub fn confirm_enabled(&self) -> bool {
        matches!(self, CalState::AwaitingUserPosition { .. } | CalState::PositionRejected { .. })
    }

    /// Command whose acknowledgement this state is waiting for.
    pub fn awaited_command(&self) -> Option<CommandId> {
        match self {
            CalState::AwaitingAcknowledgement => Some(CommandId::PREFLIGHT_CALIBRATION),
            CalState::AwaitingSampling { .. } => Some(CommandId::ACCELCAL_VEHICLE_POS),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start,
    Ack(CommandAck),
    Notice(StatusIntent),
    Confirm,
    Validated(Verdict),
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(OutboundCommand),
    /// Run the orientation check for the position and feed back `Event::Validated`.
    Validate { position: BodyPosition },
    /// Create the attempt entry for the position unless one already exists.
    OpenAttempt { position: BodyPosition },
    /// Reset acceptance and count one more submission, right before the confirm goes out.
    SubmitAttempt { position: BodyPosition, sample: Option<Vec3> },
    AcceptAttempt { position: BodyPosition },
    RejectAttempt { position: BodyPosition, result: AckResult },
    Note { severity: Severity, text: String },
    Seal(CalResult),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Step {
    /// `None` keeps the current state.
    pub next: Option<CalState>,
    pub effects: Vec<Effect>,
}

impl Step {
    fn stay() -> Self {
        Self::default()
    }

    fn to(next: CalState) -> Self {
        Self { next: Some(next), effects: Vec::new() }
    }

    fn with(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    fn note(self, severity: Severity, text: String) -> Self {
        self.with(Effect::Note { severity, text })
    }

    fn seal(next: CalState, result: CalResult) -> Self {
        Self::to(next).with(Effect::Seal(result))
    }

    pub fn is_transition(&self) -> bool {
        self.next.is_some()
    }
}

pub fn transition(state: &CalState, sensor: SensorKind, event: &Event) -> Step {
    if state.is_terminal() {
        return match event {
            Event::Ack(ack) => Step::stay().note(
                Severity::Info,
                format!("late acknowledgement {} {} after session end; ignored", ack.command, ack.result),
            ),
            _ => Step::stay(),
        };
    }

    match event {
        Event::Cancel => Step::seal(CalState::Cancelled, CalResult::Cancelled)
            .with(Effect::Send(OutboundCommand::Abort { sensor })),
        Event::Start => match state {
            CalState::Idle => Step::to(CalState::AwaitingAcknowledgement)
                .with(Effect::Send(OutboundCommand::StartCalibration { sensor })),
            _ => Step::stay(),
        },
        Event::Ack(ack) => on_ack(state, sensor, ack),
        Event::Notice(intent) => on_notice(state, sensor, *intent),
        Event::Confirm => on_confirm(state),
        Event::Validated(verdict) => on_validated(state, verdict),
    }
}

fn after_start(sensor: SensorKind) -> CalState {
    match sensor {
        SensorKind::Accelerometer => CalState::AwaitingInstruction,
        SensorKind::Compass => CalState::Rotating,
        SensorKind::Barometer | SensorKind::LevelHorizon => CalState::HoldingStill,
    }
}

fn on_ack(state: &CalState, sensor: SensorKind, ack: &CommandAck) -> Step {
    if state.awaited_command() != Some(ack.command) {
        return Step::stay().note(
            Severity::Info,
            format!("acknowledgement {} {} not awaited in {:?}; ignored", ack.command, ack.result, state.tag()),
        );
    }

    match state {
        CalState::AwaitingAcknowledgement => {
            if ack.result.is_rejection() {
                Step::seal(
                    CalState::Rejected { reason: format!("{} calibration {} by firmware", sensor, ack.result) },
                    CalResult::Rejected,
                )
            } else {
                Step::to(after_start(sensor))
            }
        }
        CalState::AwaitingSampling { position } => match ack.result {
            AckResult::Accepted => Step::to(CalState::PositionAccepted { position: *position })
                .with(Effect::AcceptAttempt { position: *position }),
            AckResult::InProgress => Step::stay(),
            result => Step::to(CalState::PositionRejected { position: *position, result })
                .with(Effect::RejectAttempt { position: *position, result }),
        },
        _ => Step::stay(),
    }
}

fn on_notice(state: &CalState, sensor: SensorKind, intent: StatusIntent) -> Step {
    if matches!(state, CalState::Idle) {
        return Step::stay();
    }

    match intent {
        StatusIntent::Unrelated => Step::stay(),
        // until the start is acknowledged only the ack decides
        StatusIntent::CalibrationFailure | StatusIntent::CalibrationTimedOut
            if matches!(state, CalState::AwaitingAcknowledgement) =>
        {
            Step::stay().note(
                Severity::Warning,
                format!("{} notice before the start acknowledgement; ignored", intent),
            )
        }
        StatusIntent::CalibrationFailure => Step::seal(
            CalState::Failed { reason: "firmware reported calibration failure".into() },
            CalResult::Failed,
        ),
        StatusIntent::CalibrationTimedOut => Step::seal(
            CalState::TimedOut { reason: "firmware reported calibration timeout".into() },
            CalResult::TimedOut,
        ),
        StatusIntent::CalibrationSuccess => on_success(state, sensor),
        StatusIntent::PositionRequest(requested) => {
            if !sensor.uses_positions() {
                return Step::stay();
            }
            on_position_request(state, requested)
        }
    }
}

fn on_success(state: &CalState, sensor: SensorKind) -> Step {
    if !sensor.uses_positions() {
        return Step::seal(CalState::Completed, CalResult::Success);
    }

    match state {
        CalState::PositionAccepted { position } if position.is_last() => {
            Step::seal(CalState::Completed, CalResult::Success)
        }
        // success overtook the final ack
        CalState::AwaitingSampling { position } if position.is_last() => {
            Step::seal(CalState::Completed, CalResult::Success)
                .with(Effect::AcceptAttempt { position: *position })
        }
        other => Step::stay().note(
            Severity::Warning,
            format!("success notice in {:?} before the final position was confirmed; ignored", other.tag()),
        ),
    }
}

fn open(requested: BodyPosition) -> Step {
    Step::to(CalState::AwaitingUserPosition { position: requested, correction: None })
        .with(Effect::OpenAttempt { position: requested })
}

fn on_position_request(state: &CalState, requested: BodyPosition) -> Step {
    match state {
        CalState::AwaitingInstruction => open(requested),
        // the firmware repeating the prompt it already got an answer for
        CalState::PositionAccepted { position } if *position == requested => Step::stay().note(
            Severity::Info,
            format!("repeated request for already accepted {}; ignored", requested),
        ),
        CalState::PositionAccepted { .. } => open(requested),
        CalState::AwaitingAcknowledgement => open(requested).note(
            Severity::Info,
            format!("position request for {} arrived before the start acknowledgement", requested),
        ),
        CalState::AwaitingUserPosition { position, .. }
        | CalState::PositionRejected { position, .. }
        | CalState::Sampling { position, .. }
            if *position == requested =>
        {
            Step::stay()
        }
        CalState::AwaitingUserPosition { .. } | CalState::PositionRejected { .. } => open(requested),
        CalState::AwaitingSampling { position } if *position == requested => Step::stay(),
        CalState::AwaitingSampling { position } => {
            if requested.index() == position.index() + 1 {
                // firmware moved on to the next position: the pending one was taken
                open(requested)
                    .with(Effect::AcceptAttempt { position: *position })
                    .note(
                        Severity::Info,
                        format!("firmware requested {} before acknowledging {}; treating {} as accepted", requested, position, position),
                    )
            } else {
                open(requested).note(
                    Severity::Warning,
                    format!("firmware requested {} while {} was pending", requested, position),
                )
            }
        }
        _ => Step::stay(),
    }
}

fn on_confirm(state: &CalState) -> Step {
    match state {
        CalState::AwaitingUserPosition { position, .. } => {
            Step::to(CalState::Sampling { position: *position, retry: false })
                .with(Effect::Validate { position: *position })
        }
        CalState::PositionRejected { position, .. } => {
            Step::to(CalState::Sampling { position: *position, retry: true })
                .with(Effect::Validate { position: *position })
        }
        other => Step::stay().note(Severity::Info, format!("confirm ignored in {:?}", other.tag())),
    }
}

fn on_validated(state: &CalState, verdict: &Verdict) -> Step {
    let CalState::Sampling { position, .. } = state else {
        return Step::stay();
    };
    let position = *position;

    if verdict.accepted {
        Step::to(CalState::AwaitingSampling { position })
            .with(Effect::SubmitAttempt { position, sample: verdict.mean })
            .with(Effect::Send(OutboundCommand::ConfirmPosition { position }))
    } else {
        Step::to(CalState::AwaitingUserPosition { position, correction: Some(verdict.reason.clone()) }).note(
            Severity::Warning,
            format!("orientation check rejected {}: {}", position, verdict.reason),
        )
    }
}
