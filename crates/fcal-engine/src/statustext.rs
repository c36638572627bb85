use fcal_proto::{BodyPosition, StatusText};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a firmware status-text means for a running calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "intent", content = "position", rename_all = "kebab-case")]
pub enum StatusIntent {
    PositionRequest(BodyPosition),
    CalibrationSuccess,
    CalibrationFailure,
    CalibrationTimedOut,
    Unrelated,
}

impl fmt::Display for StatusIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusIntent::PositionRequest(p) => write!(f, "position-request {}", p),
            StatusIntent::CalibrationSuccess => f.write_str("calibration-success"),
            StatusIntent::CalibrationFailure => f.write_str("calibration-failure"),
            StatusIntent::CalibrationTimedOut => f.write_str("calibration-timed-out"),
            StatusIntent::Unrelated => f.write_str("unrelated"),
        }
    }
}

/// Firmware phrasing, matched case-insensitively as substrings.
/// Loaded from the `[phrases]` config section so new firmware wording can be
/// followed without a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhraseTable {
    /// A position request must also contain one of these (empty = no requirement).
    pub prompt: Vec<String>,
    pub success: Vec<String>,
    pub failure: Vec<String>,
    pub timeout: Vec<String>,
    pub level: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub nose_down: Vec<String>,
    pub nose_up: Vec<String>,
    pub inverted: Vec<String>,
}

fn owned(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

impl Default for PhraseTable {
    fn default() -> Self {
        Self {
            prompt: owned(&["place"]),
            success: owned(&["calibration successful", "successful", "calibration complete", "trim ok"]),
            failure: owned(&["failed", "failure", "unsuccessful", "rejected"]),
            timeout: owned(&["timed out", "timeout"]),
            level: owned(&["level"]),
            left: owned(&["left"]),
            right: owned(&["right"]),
            nose_down: owned(&["nose down", "nosedown"]),
            nose_up: owned(&["nose up", "noseup"]),
            inverted: owned(&["on its back", "back", "inverted", "upside down"]),
        }
    }
}

impl PhraseTable {
    pub fn phrases_for(&self, position: BodyPosition) -> &[String] {
        match position {
            BodyPosition::Level => &self.level,
            BodyPosition::LeftSide => &self.left,
            BodyPosition::RightSide => &self.right,
            BodyPosition::NoseDown => &self.nose_down,
            BodyPosition::NoseUp => &self.nose_up,
            BodyPosition::Inverted => &self.inverted,
        }
    }

    fn normalized(&self) -> Self {
        let n = |v: &Vec<String>| -> Vec<String> {
            v.iter().map(|s| normalize(s)).filter(|s| !s.is_empty()).collect()
        };
        Self {
            prompt: n(&self.prompt),
            success: n(&self.success),
            failure: n(&self.failure),
            timeout: n(&self.timeout),
            level: n(&self.level),
            left: n(&self.left),
            right: n(&self.right),
            nose_down: n(&self.nose_down),
            nose_up: n(&self.nose_up),
            inverted: n(&self.inverted),
        }
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn contains_any(text: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|p| text.contains(p.as_str()))
}

pub struct StatusInterpreter {
    table: PhraseTable,
}

impl StatusInterpreter {
    pub fn new(table: &PhraseTable) -> Self {
        Self { table: table.normalized() }
    }

    /// Failure and timeout wording wins over success wording, so texts like
    /// "calibration unsuccessful" never read as a success.
    pub fn classify(&self, notice: &StatusText) -> StatusIntent {
        let text = normalize(&notice.text);
        if text.is_empty() {
            return StatusIntent::Unrelated;
        }
        if contains_any(&text, &self.table.failure) {
            return StatusIntent::CalibrationFailure;
        }
        if contains_any(&text, &self.table.timeout) {
            return StatusIntent::CalibrationTimedOut;
        }
        if contains_any(&text, &self.table.success) {
            return StatusIntent::CalibrationSuccess;
        }
        if self.table.prompt.is_empty() || contains_any(&text, &self.table.prompt) {
            if let Some(position) = self.position_in(&text) {
                return StatusIntent::PositionRequest(position);
            }
        }
        StatusIntent::Unrelated
    }

    /// Position named earliest in the text; longer phrases win ties.
    fn position_in(&self, text: &str) -> Option<BodyPosition> {
        BodyPosition::ALL
            .iter()
            .filter_map(|pos| {
                self.table
                    .phrases_for(*pos)
                    .iter()
                    .filter_map(|p| text.find(p.as_str()).map(|at| (at, std::cmp::Reverse(p.len()))))
                    .min()
                    .map(|key| (key, *pos))
            })
            .min_by_key(|(key, _)| *key)
            .map(|(_, pos)| pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcal_proto::Severity;

    fn classify(text: &str) -> StatusIntent {
        StatusInterpreter::new(&PhraseTable::default())
            .classify(&StatusText { severity: Severity::Info, text: text.into() })
    }

    #[test]
    fn recognises_position_prompts() {
        use BodyPosition::*;
        assert_eq!(classify("Place vehicle level and press any key."), StatusIntent::PositionRequest(Level));
        assert_eq!(classify("Place vehicle on its LEFT side and press any key."), StatusIntent::PositionRequest(LeftSide));
        assert_eq!(classify("Place vehicle on its RIGHT side and press any key."), StatusIntent::PositionRequest(RightSide));
        assert_eq!(classify("Place vehicle nose DOWN and press any key."), StatusIntent::PositionRequest(NoseDown));
        assert_eq!(classify("Place vehicle nose  UP and press any key."), StatusIntent::PositionRequest(NoseUp));
        assert_eq!(classify("Place vehicle on its BACK and press any key."), StatusIntent::PositionRequest(Inverted));
        assert_eq!(classify("place left"), StatusIntent::PositionRequest(LeftSide));
    }

    #[test]
    fn position_words_without_prompt_are_unrelated() {
        assert_eq!(classify("Battery level low"), StatusIntent::Unrelated);
        assert_eq!(classify("EKF3 IMU0 is using GPS"), StatusIntent::Unrelated);
        assert_eq!(classify(""), StatusIntent::Unrelated);
    }

    #[test]
    fn outcome_wording() {
        assert_eq!(classify("Calibration successful"), StatusIntent::CalibrationSuccess);
        assert_eq!(classify("Trim OK: roll=0.012 pitch=-0.004"), StatusIntent::CalibrationSuccess);
        assert_eq!(classify("Calibration FAILED"), StatusIntent::CalibrationFailure);
        assert_eq!(classify("Calibration unsuccessful"), StatusIntent::CalibrationFailure);
        assert_eq!(classify("Accel calibration rejected"), StatusIntent::CalibrationFailure);
        assert_eq!(classify("Calibration timed out"), StatusIntent::CalibrationTimedOut);
    }

    #[test]
    fn phrase_table_is_replaceable() {
        let table = PhraseTable {
            prompt: vec![],
            success: vec!["[cal] calibration done".into()],
            level: vec!["Orientation: DOWN".into()],
            ..PhraseTable::default()
        };
        let interp = StatusInterpreter::new(&table);
        let st = |t: &str| StatusText { severity: Severity::Info, text: t.into() };
        assert_eq!(interp.classify(&st("[cal] calibration done: accel")), StatusIntent::CalibrationSuccess);
        assert_eq!(interp.classify(&st("[cal] orientation: down detected")), StatusIntent::PositionRequest(BodyPosition::Level));
    }

    #[test]
    fn phrase_table_from_toml() {
        let table: PhraseTable = toml::from_str(r#"success = ["all good"]"#).unwrap();
        assert_eq!(table.success, vec!["all good".to_string()]);
        assert_eq!(table.level, PhraseTable::default().level);
    }
}
