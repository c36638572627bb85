use fcal_proto::{CommandId, Inbound, InboundMessage, Outbound, SensorKind, SessionId, Severity};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::diagnostics::DiagnosticPayload;
use crate::error::EngineError;
use crate::machine::{self, Effect, Event};
use crate::orientation::{OrientationValidator, SampleWindow};
use crate::session::CalibrationSession;
use crate::snapshot::StateSnapshot;
use crate::statustext::{StatusInterpreter, StatusIntent};
use crate::EngineConfig;

/// Owns the single calibration session and applies the effects produced by
/// [`machine::transition`]. Every call takes the wall-clock time of the
/// triggering input; nothing here reads a clock on its own.
///
/// Not re-entrant: callers serialize access (see [`crate::service`]).
pub struct Calibrator {
    validator: OrientationValidator,
    interpreter: StatusInterpreter,
    window: SampleWindow,
    session: Option<CalibrationSession>,
    outbox: Vec<Outbound>,
}

impl Calibrator {
    pub fn new(cfg: &EngineConfig) -> Result<Self, EngineError> {
        cfg.check().map_err(|e| EngineError::InvalidConfig(format!("{:#}", e)))?;
        Ok(Self {
            validator: OrientationValidator::new(cfg.validator.clone()),
            interpreter: StatusInterpreter::new(&cfg.phrases),
            window: SampleWindow::new(cfg.validator.window),
            session: None,
            outbox: Vec::new(),
        })
    }

    pub fn session(&self) -> Option<&CalibrationSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().map(|s| !s.state().is_terminal()).unwrap_or(false)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::project(self.session.as_ref())
    }

    /// Samples buffered for the current position.
    pub fn samples(&self) -> &SampleWindow {
        &self.window
    }

    /// Commands produced since the last call, in emission order.
    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Hands out a finished session for archiving; active sessions stay put.
    pub fn take_finished(&mut self) -> Option<CalibrationSession> {
        if self.is_active() {
            return None;
        }
        self.session.take()
    }

    pub fn start(&mut self, sensor: SensorKind, at: OffsetDateTime) -> Result<SessionId, EngineError> {
        if let Some(current) = &self.session {
            if !current.state().is_terminal() {
                return Err(EngineError::SessionActive(current.id()));
            }
        }

        let id = SessionId(rand::random());
        let mut session = CalibrationSession::new(id, sensor, at);
        session.note(at, Severity::Info, format!("{} calibration session {} opened", sensor, id));
        info!(session = %id, "starting {} calibration", sensor);
        self.session = Some(session);
        self.window.clear();
        self.drive(Event::Start, at);
        Ok(id)
    }

    pub fn confirm_current_position(&mut self, at: OffsetDateTime) -> Result<(), EngineError> {
        let session = self.session.as_mut().ok_or(EngineError::NoSession)?;
        debug!(session = %session.id(), "user confirmed position");
        self.drive(Event::Confirm, at);
        Ok(())
    }

    pub fn cancel(&mut self, at: OffsetDateTime) -> Result<(), EngineError> {
        let session = self.session.as_mut().ok_or(EngineError::NoSession)?;
        if session.state().is_terminal() {
            debug!(session = %session.id(), "cancel after session end ignored");
            return Ok(());
        }
        session.note(at, Severity::Notice, "cancel requested by user");
        self.drive(Event::Cancel, at);
        Ok(())
    }

    pub fn handle_inbound(&mut self, inbound: Inbound, at: OffsetDateTime) {
        let Inbound { session: tag, message } = inbound;

        let message = match message {
            InboundMessage::Sample(sample) => {
                self.window.push(sample);
                return;
            }
            other => other,
        };

        let Some(session) = self.session.as_mut() else {
            debug!("no calibration session; dropping {:?}", message);
            return;
        };

        let stale = matches!(tag, Some(t) if t != session.id());

        let (event, firmware_message) = match message {
            InboundMessage::Ack(ack) => {
                let severity = if ack.result.is_rejection() { Severity::Warning } else { Severity::Info };
                session.record(at, severity, DiagnosticPayload::Acknowledgement { command: ack.command, result: ack.result });
                let text = (ack.command == CommandId::ACCELCAL_VEHICLE_POS).then(|| format!("{} {}", ack.command, ack.result));
                (Event::Ack(ack), text)
            }
            InboundMessage::StatusText(notice) => {
                let intent = self.interpreter.classify(&notice);
                debug!(session = %session.id(), "statustext {:?} -> {}", notice.text, intent);
                let text = (intent != StatusIntent::Unrelated).then(|| notice.text.clone());
                session.record(at, notice.severity, DiagnosticPayload::StatusText { text: notice.text, intent });
                (Event::Notice(intent), text)
            }
            InboundMessage::Sample(_) => return,
        };

        if stale {
            if let Some(t) = tag {
                warn!(session = %session.id(), "message tagged for session {} ignored", t);
                session.note(at, Severity::Warning, format!("stale message for session {} ignored", t));
            }
            return;
        }

        self.drive(event, at);

        if let (Some(text), Some(session)) = (firmware_message, self.session.as_mut()) {
            if let Some(position) = session.state().active_position() {
                if let Some(attempt) = session.attempt_mut(position) {
                    attempt.last_firmware_message = Some(text);
                }
            }
        }
    }

    fn drive(&mut self, event: Event, at: OffsetDateTime) {
        let mut pending = Some(event);
        while let Some(event) = pending.take() {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let step = machine::transition(session.state(), session.sensor(), &event);

            if let Some(next) = step.next {
                let (from, to) = (session.state().tag(), next.tag());
                info!(session = %session.id(), "{:?} -> {:?}", from, to);
                session.record(at, Severity::Info, DiagnosticPayload::Transition { from, to });
                session.set_state(next);
            }

            for effect in step.effects {
                if let Some(follow_up) = self.apply(effect, at) {
                    pending = Some(follow_up);
                }
            }
        }
    }

    fn apply(&mut self, effect: Effect, at: OffsetDateTime) -> Option<Event> {
        let session = self.session.as_mut()?;
        match effect {
            Effect::Send(command) => {
                info!(session = %session.id(), "sending {}", command);
                session.record(at, Severity::Info, DiagnosticPayload::Command { command });
                self.outbox.push(Outbound { session: session.id(), command });
                None
            }
            Effect::Validate { position } => {
                let verdict = self.validator.validate(&self.window, position);
                if verdict.accepted {
                    debug!(session = %session.id(), "orientation ok: {}", verdict.reason);
                } else {
                    warn!(session = %session.id(), "orientation rejected: {}", verdict.reason);
                }
                Some(Event::Validated(verdict))
            }
            Effect::OpenAttempt { position } => {
                // the window only ever holds readings for the active position
                self.window.clear();
                session.open_attempt(position);
                None
            }
            Effect::SubmitAttempt { position, sample } => {
                let attempt = session.open_attempt(position);
                let is_retry = attempt.attempt_count > 0;
                attempt.accepted = false;
                attempt.firmware_accepted_at = None;
                attempt.attempt_count += 1;
                attempt.user_confirmed_at = Some(at);
                attempt.last_sample = sample;
                let count = attempt.attempt_count;
                if is_retry {
                    let retries = session.count_retry();
                    info!(session = %session.id(), "retrying {} (attempt {})", position, count);
                    session.note(
                        at,
                        Severity::Info,
                        format!("retry #{} for {}, attempt {}", retries, position, count),
                    );
                }
                None
            }
            Effect::AcceptAttempt { position } => {
                let attempt = session.open_attempt(position);
                attempt.accepted = true;
                attempt.firmware_accepted_at = Some(at);
                None
            }
            Effect::RejectAttempt { position, result } => {
                let attempt = session.open_attempt(position);
                attempt.accepted = false;
                attempt.firmware_accepted_at = None;
                warn!(session = %session.id(), "firmware rejected {} ({})", position, result);
                None
            }
            Effect::Note { severity, text } => {
                session.note(at, severity, text);
                None
            }
            Effect::Seal(result) => {
                session.seal(result, at);
                info!(session = %session.id(), "session sealed: {:?}", result);
                None
            }
        }
    }
}
