//! Offline replay of a recorded or hand-written firmware trace.
//!
//! ```toml
//! sensor = "accelerometer"
//!
//! [[step]]
//! kind = "ack"
//! command = 241
//! result = "accepted"
//!
//! [[step]]
//! kind = "statustext"
//! text = "Place vehicle level and press any key."
//!
//! [[step]]
//! kind = "sample"
//! z = -9.81
//! repeat = 20
//!
//! [[step]]
//! kind = "confirm"
//! ```

use anyhow::{Context, Result};
use fcal_engine::{Calibrator, CalibrationSession, EngineConfig, StateSnapshot};
use fcal_proto::{
    AccelSample, AckResult, CommandAck, CommandId, Inbound, InboundMessage, SensorKind, SessionId,
    Severity, StatusText,
};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

const DEFAULT_STEP_MS: i64 = 250;

#[derive(Debug, Deserialize)]
pub struct Trace {
    pub sensor: SensorKind,
    #[serde(default, rename = "step")]
    pub steps: Vec<TraceStep>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TraceStep {
    Ack {
        command: u16,
        result: AckResult,
        /// Tag the message for this session id; `stale = true` uses a foreign one.
        #[serde(default)]
        stale: bool,
        after_ms: Option<i64>,
    },
    #[serde(rename = "statustext")]
    StatusText {
        #[serde(default = "default_severity")]
        severity: Severity,
        text: String,
        after_ms: Option<i64>,
    },
    Sample {
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
        #[serde(default)]
        z: f64,
        #[serde(default = "one")]
        repeat: u32,
    },
    Confirm {
        after_ms: Option<i64>,
    },
    Cancel {
        after_ms: Option<i64>,
    },
}

fn default_severity() -> Severity {
    Severity::Info
}

fn one() -> u32 {
    1
}

pub fn load_trace(path: &str) -> Result<Trace> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read trace {}", path))?;
    parse_trace(&s)
}

pub fn parse_trace(s: &str) -> Result<Trace> {
    toml::from_str(s).context("parse trace toml")
}

pub struct ReplayOutcome {
    pub snapshots: Vec<StateSnapshot>,
    pub session: Option<CalibrationSession>,
}

/// Drives `trace` through a fresh engine. Each step gets its own timestamp,
/// `after_ms` (default 250 ms) after the previous one.
pub fn replay(cfg: &EngineConfig, trace: &Trace, start: OffsetDateTime) -> Result<ReplayOutcome> {
    let mut cal = Calibrator::new(cfg)?;
    let mut now = start;
    let mut snapshots = Vec::new();
    let mut sample_clock_ms: u64 = 0;

    let id = cal.start(trace.sensor, now)?;
    info!(session = %id, "replaying {} steps", trace.steps.len());
    snapshots.push(cal.snapshot());

    for (i, step) in trace.steps.iter().enumerate() {
        now += Duration::milliseconds(step_delay(step));
        match step {
            TraceStep::Ack { command, result, stale, .. } => {
                let ack = InboundMessage::Ack(CommandAck { command: CommandId(*command), result: *result });
                let inbound = if *stale {
                    Inbound::tagged(SessionId(id.0.wrapping_add(1)), ack)
                } else {
                    Inbound::untagged(ack)
                };
                cal.handle_inbound(inbound, now);
            }
            TraceStep::StatusText { severity, text, .. } => {
                let notice = StatusText { severity: *severity, text: text.clone() };
                cal.handle_inbound(Inbound::untagged(InboundMessage::StatusText(notice)), now);
            }
            TraceStep::Sample { x, y, z, repeat } => {
                for _ in 0..*repeat {
                    sample_clock_ms += 20;
                    let sample = AccelSample::new(sample_clock_ms, *x, *y, *z);
                    cal.handle_inbound(Inbound::untagged(InboundMessage::Sample(sample)), now);
                }
                // samples never move the state machine
                continue;
            }
            TraceStep::Confirm { .. } => {
                if cal.samples().is_empty() {
                    warn!("step {}: confirm with no samples buffered for the current position", i + 1);
                }
                if let Err(e) = cal.confirm_current_position(now) {
                    warn!("step {}: confirm refused: {}", i + 1, e);
                }
            }
            TraceStep::Cancel { .. } => {
                if let Err(e) = cal.cancel(now) {
                    warn!("step {}: cancel refused: {}", i + 1, e);
                }
            }
        }
        // commands have nowhere to go offline; they stay on the diagnostics record
        let _ = cal.take_outbound();
        snapshots.push(cal.snapshot());
    }

    Ok(ReplayOutcome { snapshots, session: cal.session().cloned() })
}

fn step_delay(step: &TraceStep) -> i64 {
    match step {
        TraceStep::Ack { after_ms, .. }
        | TraceStep::StatusText { after_ms, .. }
        | TraceStep::Confirm { after_ms }
        | TraceStep::Cancel { after_ms } => after_ms.unwrap_or(DEFAULT_STEP_MS),
        TraceStep::Sample { .. } => 0,
    }
}
