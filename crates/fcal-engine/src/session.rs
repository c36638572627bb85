use fcal_proto::{BodyPosition, SensorKind, SessionId, Severity};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::warn;

use crate::diagnostics::{DiagnosticPayload, DiagnosticsRecorder};
use crate::machine::CalState;
use crate::orientation::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CalResult {
    InProgress,
    Success,
    Failed,
    Cancelled,
    TimedOut,
    Rejected,
}

/// Book-keeping for one accelerometer body position. There is exactly one per
/// position index per session; retries update it in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionAttempt {
    pub position: BodyPosition,
    #[serde(with = "time::serde::rfc3339::option")]
    pub user_confirmed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub firmware_accepted_at: Option<OffsetDateTime>,
    pub accepted: bool,
    /// Confirm commands sent for this position.
    pub attempt_count: u32,
    pub last_firmware_message: Option<String>,
    pub last_sample: Option<Vec3>,
}

impl PositionAttempt {
    fn new(position: BodyPosition) -> Self {
        Self {
            position,
            user_confirmed_at: None,
            firmware_accepted_at: None,
            accepted: false,
            attempt_count: 0,
            last_firmware_message: None,
            last_sample: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.position.name()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationSession {
    id: SessionId,
    sensor: SensorKind,
    #[serde(with = "time::serde::rfc3339")]
    started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    ended_at: Option<OffsetDateTime>,
    state: CalState,
    result: CalResult,
    retry_count: u32,
    attempts: Vec<PositionAttempt>,
    diagnostics: DiagnosticsRecorder,
}

impl CalibrationSession {
    pub(crate) fn new(id: SessionId, sensor: SensorKind, at: OffsetDateTime) -> Self {
        Self {
            id,
            sensor,
            started_at: at,
            ended_at: None,
            state: CalState::Idle,
            result: CalResult::InProgress,
            retry_count: 0,
            attempts: Vec::new(),
            diagnostics: DiagnosticsRecorder::new(id),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn sensor(&self) -> SensorKind {
        self.sensor
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<OffsetDateTime> {
        self.ended_at
    }

    pub fn state(&self) -> &CalState {
        &self.state
    }

    pub fn result(&self) -> CalResult {
        self.result
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn attempts(&self) -> &[PositionAttempt] {
        &self.attempts
    }

    pub fn attempt(&self, position: BodyPosition) -> Option<&PositionAttempt> {
        self.attempts.iter().find(|a| a.position == position)
    }

    pub fn accepted_positions(&self) -> usize {
        self.attempts.iter().filter(|a| a.accepted).count()
    }

    pub fn diagnostics(&self) -> &DiagnosticsRecorder {
        &self.diagnostics
    }

    pub fn is_sealed(&self) -> bool {
        self.ended_at.is_some()
    }

    pub(crate) fn set_state(&mut self, next: CalState) {
        if self.is_sealed() {
            warn!("session {}: state change to {:?} after seal dropped", self.id, next.tag());
            return;
        }
        self.state = next;
    }

    pub(crate) fn seal(&mut self, result: CalResult, at: OffsetDateTime) {
        if self.is_sealed() {
            return;
        }
        self.result = result;
        self.ended_at = Some(at);
    }

    pub(crate) fn open_attempt(&mut self, position: BodyPosition) -> &mut PositionAttempt {
        let idx = match self.attempts.iter().position(|a| a.position == position) {
            Some(idx) => idx,
            None => {
                self.attempts.push(PositionAttempt::new(position));
                self.attempts.len() - 1
            }
        };
        &mut self.attempts[idx]
    }

    pub(crate) fn attempt_mut(&mut self, position: BodyPosition) -> Option<&mut PositionAttempt> {
        self.attempts.iter_mut().find(|a| a.position == position)
    }

    pub(crate) fn count_retry(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    pub(crate) fn record(&mut self, at: OffsetDateTime, severity: Severity, payload: DiagnosticPayload) -> u64 {
        self.diagnostics.append(at, severity, payload)
    }

    pub(crate) fn note(&mut self, at: OffsetDateTime, severity: Severity, text: impl Into<String>) -> u64 {
        self.diagnostics.note(at, severity, text)
    }
}
