use fcal_proto::{AckResult, CommandId, OutboundCommand, SessionId, Severity};
use serde::Serialize;
use time::OffsetDateTime;

use crate::machine::StateTag;
use crate::statustext::StatusIntent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    StatusText,
    Acknowledgement,
    Command,
    Transition,
    Note,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DiagnosticPayload {
    StatusText { text: String, intent: StatusIntent },
    Acknowledgement { command: CommandId, result: AckResult },
    Command { command: OutboundCommand },
    Transition { from: StateTag, to: StateTag },
    Note { text: String },
}

impl DiagnosticPayload {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            DiagnosticPayload::StatusText { .. } => DiagnosticKind::StatusText,
            DiagnosticPayload::Acknowledgement { .. } => DiagnosticKind::Acknowledgement,
            DiagnosticPayload::Command { .. } => DiagnosticKind::Command,
            DiagnosticPayload::Transition { .. } => DiagnosticKind::Transition,
            DiagnosticPayload::Note { .. } => DiagnosticKind::Note,
        }
    }
}

/// One immutable entry of the session audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEvent {
    seq: u64,
    #[serde(with = "time::serde::rfc3339")]
    at: OffsetDateTime,
    severity: Severity,
    #[serde(flatten)]
    payload: DiagnosticPayload,
}

impl DiagnosticEvent {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn at(&self) -> OffsetDateTime {
        self.at
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn kind(&self) -> DiagnosticKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &DiagnosticPayload {
        &self.payload
    }

    /// Single-line rendering for consoles and plain-text exports.
    pub fn summary(&self) -> String {
        let body = match &self.payload {
            DiagnosticPayload::StatusText { text, intent } => format!("statustext \"{}\" -> {}", text, intent),
            DiagnosticPayload::Acknowledgement { command, result } => format!("ack {} {}", command, result),
            DiagnosticPayload::Command { command } => format!("sent {}", command),
            DiagnosticPayload::Transition { from, to } => format!("{:?} -> {:?}", from, to),
            DiagnosticPayload::Note { text } => text.clone(),
        };
        format!("#{:04} [{}] {}", self.seq, self.severity.label(), body)
    }
}

/// Append-only record of everything a session saw and decided.
/// Entries are ordered by `seq`, which is assigned at append time.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsRecorder {
    session: SessionId,
    events: Vec<DiagnosticEvent>,
}

impl DiagnosticsRecorder {
    pub fn new(session: SessionId) -> Self {
        Self { session, events: Vec::new() }
    }

    pub(crate) fn append(&mut self, at: OffsetDateTime, severity: Severity, payload: DiagnosticPayload) -> u64 {
        let seq = self.events.len() as u64;
        self.events.push(DiagnosticEvent { seq, at, severity, payload });
        seq
    }

    pub(crate) fn note(&mut self, at: OffsetDateTime, severity: Severity, text: impl Into<String>) -> u64 {
        self.append(at, severity, DiagnosticPayload::Note { text: text.into() })
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn events(&self) -> &[DiagnosticEvent] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiagnosticEvent> {
        self.events.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &DiagnosticEvent> {
        self.events.iter().filter(move |e| e.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&DiagnosticEvent> {
        self.events.last()
    }

    pub fn saw_intent(&self, intent: StatusIntent) -> bool {
        self.events
            .iter()
            .any(|e| matches!(&e.payload, DiagnosticPayload::StatusText { intent: i, .. } if *i == intent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn sequence_numbers_follow_append_order() {
        let mut rec = DiagnosticsRecorder::new(SessionId(7));
        let t0 = datetime!(2026-03-01 10:00:00 UTC);
        // wall clock stepping backwards must not reorder the log
        let a = rec.note(t0, Severity::Info, "first");
        let b = rec.append(
            datetime!(2026-03-01 09:59:59 UTC),
            Severity::Info,
            DiagnosticPayload::Acknowledgement { command: CommandId::PREFLIGHT_CALIBRATION, result: AckResult::Accepted },
        );
        assert_eq!((a, b), (0, 1));
        let seqs: Vec<u64> = rec.iter().map(|e| e.seq()).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(rec.of_kind(DiagnosticKind::Acknowledgement).count(), 1);
        assert_eq!(rec.last().map(|e| e.kind()), Some(DiagnosticKind::Acknowledgement));
    }

    #[test]
    fn exports_as_json_with_flattened_kind() {
        let mut rec = DiagnosticsRecorder::new(SessionId(1));
        rec.append(
            datetime!(2026-03-01 10:00:00 UTC),
            Severity::Info,
            DiagnosticPayload::StatusText { text: "Calibration successful".into(), intent: StatusIntent::CalibrationSuccess },
        );
        let json = serde_json::to_value(&rec).unwrap();
        let ev = &json["events"][0];
        assert_eq!(ev["kind"], "status-text");
        assert_eq!(ev["severity"], "info");
        assert_eq!(ev["intent"]["intent"], "calibration-success");
        assert_eq!(ev["at"], "2026-03-01T10:00:00Z");
        assert!(rec.saw_intent(StatusIntent::CalibrationSuccess));
    }
}
