use fcal_engine::diagnostics::{DiagnosticKind, DiagnosticPayload};
use fcal_engine::statustext::StatusIntent;
use fcal_engine::{AlertStyle, CalResult, Calibrator, EngineConfig, StateTag};
use fcal_proto::{
    AccelSample, AckResult, BodyPosition, CommandAck, CommandId, Inbound, InboundMessage,
    OutboundCommand, SensorKind, SessionId, Severity, StatusText,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

struct Bench {
    cal: Calibrator,
    now: OffsetDateTime,
    sample_clock: u64,
}

impl Bench {
    fn new() -> Self {
        Self {
            cal: Calibrator::new(&EngineConfig::default()).unwrap(),
            now: datetime!(2026-05-04 08:30:00 UTC),
            sample_clock: 0,
        }
    }

    fn tick(&mut self) -> OffsetDateTime {
        self.now += Duration::milliseconds(250);
        self.now
    }

    fn start(&mut self, sensor: SensorKind) -> SessionId {
        let at = self.tick();
        self.cal.start(sensor, at).unwrap()
    }

    fn inbound(&mut self, message: InboundMessage) {
        let at = self.tick();
        self.cal.handle_inbound(Inbound::untagged(message), at);
    }

    fn ack(&mut self, command: CommandId, result: AckResult) {
        self.inbound(InboundMessage::Ack(CommandAck { command, result }));
    }

    fn text(&mut self, text: &str) {
        self.inbound(InboundMessage::StatusText(StatusText { severity: Severity::Info, text: text.into() }));
    }

    fn sample(&mut self, x: f64, y: f64, z: f64) {
        self.sample_clock += 20;
        let s = AccelSample::new(self.sample_clock, x, y, z);
        self.inbound(InboundMessage::Sample(s));
    }

    fn hold(&mut self, position: BodyPosition) {
        let g = 9.81;
        let (x, y, z) = match position {
            BodyPosition::Level => (0.0, 0.0, g),
            BodyPosition::LeftSide => (0.0, g, 0.0),
            BodyPosition::RightSide => (0.0, -g, 0.0),
            BodyPosition::NoseDown => (g, 0.0, 0.0),
            BodyPosition::NoseUp => (-g, 0.0, 0.0),
            BodyPosition::Inverted => (0.0, 0.0, -g),
        };
        for _ in 0..25 {
            self.sample(x, y, z);
        }
    }

    fn confirm(&mut self) {
        let at = self.tick();
        self.cal.confirm_current_position(at).unwrap();
    }

    fn state(&self) -> StateTag {
        self.cal.snapshot().state
    }

    fn sent(&mut self) -> Vec<OutboundCommand> {
        self.cal.take_outbound().into_iter().map(|o| o.command).collect()
    }
}

const PROMPTS: [&str; 6] = [
    "Place vehicle level and press any key.",
    "Place vehicle on its LEFT side and press any key.",
    "Place vehicle on its RIGHT side and press any key.",
    "Place vehicle nose DOWN and press any key.",
    "Place vehicle nose UP and press any key.",
    "Place vehicle on its BACK and press any key.",
];

#[test]
fn accelerometer_happy_path_with_one_firmware_rejection() {
    let mut b = Bench::new();
    b.start(SensorKind::Accelerometer);
    assert_eq!(b.sent(), vec![OutboundCommand::StartCalibration { sensor: SensorKind::Accelerometer }]);
    assert_eq!(b.state(), StateTag::AwaitingAcknowledgement);

    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::Accepted);
    assert_eq!(b.state(), StateTag::AwaitingInstruction);

    b.text("place level");
    assert_eq!(b.state(), StateTag::AwaitingUserPosition);
    assert!(b.cal.snapshot().confirm_enabled);

    b.hold(BodyPosition::Level);
    b.confirm();
    assert_eq!(b.state(), StateTag::AwaitingSampling);
    assert_eq!(b.sent(), vec![OutboundCommand::ConfirmPosition { position: BodyPosition::Level }]);
    assert!(!b.cal.snapshot().confirm_enabled);

    b.ack(CommandId::ACCELCAL_VEHICLE_POS, AckResult::Denied);
    assert_eq!(b.state(), StateTag::PositionRejected);
    let snap = b.cal.snapshot();
    assert!(snap.confirm_enabled);
    let alert = snap.alert.expect("modal alert on firmware rejection");
    assert_eq!(alert.style, AlertStyle::Modal);
    assert!(alert.text.contains("level"), "{}", alert.text);

    // retry with the identical sample window
    b.confirm();
    assert_eq!(b.sent(), vec![OutboundCommand::ConfirmPosition { position: BodyPosition::Level }]);
    {
        let session = b.cal.session().unwrap();
        let level = session.attempt(BodyPosition::Level).unwrap();
        assert_eq!(level.attempt_count, 2);
        assert!(!level.accepted);
        assert!(level.firmware_accepted_at.is_none());
        assert_eq!(session.retry_count(), 1);
    }
    b.ack(CommandId::ACCELCAL_VEHICLE_POS, AckResult::Accepted);
    assert_eq!(b.state(), StateTag::PositionAccepted);

    for (i, position) in BodyPosition::ALL.iter().enumerate().skip(1) {
        b.text(PROMPTS[i]);
        assert_eq!(b.cal.snapshot().active_position, Some(*position));
        b.hold(*position);
        b.confirm();
        assert_eq!(b.sent(), vec![OutboundCommand::ConfirmPosition { position: *position }]);
        b.ack(CommandId::ACCELCAL_VEHICLE_POS, AckResult::Accepted);
        assert_eq!(b.state(), StateTag::PositionAccepted);
    }
    assert_eq!(b.cal.snapshot().progress, 90);

    b.text("Calibration successful");
    let snap = b.cal.snapshot();
    assert_eq!(snap.state, StateTag::Completed);
    assert_eq!(snap.progress, 100);
    assert_eq!(snap.alert.map(|a| a.style), Some(AlertStyle::Notice));

    let session = b.cal.session().unwrap();
    assert_eq!(session.result(), CalResult::Success);
    assert!(session.is_sealed());
    assert_eq!(session.attempts().len(), 6);
    assert!(session.attempts().iter().all(|a| a.accepted && a.firmware_accepted_at.is_some()));
    let mut indices: Vec<u8> = session.attempts().iter().map(|a| a.position.index()).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(
        session.attempt(BodyPosition::Inverted).unwrap().last_firmware_message.as_deref(),
        Some("ACCELCAL_VEHICLE_POS accepted")
    );
}

#[test]
fn local_rejection_sends_nothing_and_shows_correction() {
    let mut b = Bench::new();
    b.start(SensorKind::Accelerometer);
    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::Accepted);
    b.text(PROMPTS[1]);
    b.sent();

    // still lying level while the left side was requested
    b.hold(BodyPosition::Level);
    b.confirm();
    assert!(b.sent().is_empty());
    let snap = b.cal.snapshot();
    assert_eq!(snap.state, StateTag::AwaitingUserPosition);
    let alert = snap.alert.expect("inline correction");
    assert_eq!(alert.style, AlertStyle::Inline);
    assert!(alert.text.contains("Y axis"), "{}", alert.text);

    let session = b.cal.session().unwrap();
    let left = session.attempt(BodyPosition::LeftSide).unwrap();
    assert_eq!(left.attempt_count, 0);
    assert!(session
        .diagnostics()
        .of_kind(DiagnosticKind::Note)
        .any(|e| matches!(e.payload(), DiagnosticPayload::Note { text } if text.contains("orientation check rejected"))));

    b.hold(BodyPosition::LeftSide);
    b.confirm();
    assert_eq!(b.sent(), vec![OutboundCommand::ConfirmPosition { position: BodyPosition::LeftSide }]);
}

#[test]
fn repeated_position_requests_never_duplicate_entries() {
    let mut b = Bench::new();
    b.start(SensorKind::Accelerometer);
    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::Accepted);
    b.text(PROMPTS[0]);
    b.hold(BodyPosition::Level);
    b.confirm();
    b.ack(CommandId::ACCELCAL_VEHICLE_POS, AckResult::Accepted);
    // level prompt repeated after its ack
    b.text(PROMPTS[0]);
    assert_eq!(b.state(), StateTag::PositionAccepted);

    for _ in 0..3 {
        b.text(PROMPTS[2]);
    }
    // firmware re-asks for level after having moved on
    b.text(PROMPTS[0]);
    b.text(PROMPTS[2]);

    let session = b.cal.session().unwrap();
    assert_eq!(session.attempts().len(), 2);
    assert_eq!(session.attempts().iter().filter(|a| a.position == BodyPosition::RightSide).count(), 1);
    assert!(session.attempt(BodyPosition::Level).unwrap().accepted);
}

#[test]
fn prompt_repeated_after_acceptance_keeps_the_position_accepted() {
    let mut b = Bench::new();
    b.start(SensorKind::Accelerometer);
    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::Accepted);
    b.text(PROMPTS[0]);
    b.hold(BodyPosition::Level);
    b.confirm();
    b.ack(CommandId::ACCELCAL_VEHICLE_POS, AckResult::Accepted);
    b.sent();
    let progress = b.cal.snapshot().progress;

    b.text(PROMPTS[0]);
    let snap = b.cal.snapshot();
    assert_eq!(snap.state, StateTag::PositionAccepted);
    assert!(!snap.confirm_enabled);
    assert_eq!(snap.progress, progress);

    b.hold(BodyPosition::Level);
    b.confirm();
    assert!(b.sent().is_empty());

    let session = b.cal.session().unwrap();
    let level = session.attempt(BodyPosition::Level).unwrap();
    assert!(level.accepted);
    assert_eq!(level.attempt_count, 1);
    assert_eq!(session.retry_count(), 0);
    assert!(session
        .diagnostics()
        .of_kind(DiagnosticKind::Note)
        .any(|e| matches!(e.payload(), DiagnosticPayload::Note { text } if text.contains("already accepted"))));
}

#[test]
fn samples_from_an_earlier_session_or_position_are_not_reused() {
    let mut b = Bench::new();
    b.start(SensorKind::Accelerometer);
    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::Accepted);
    b.text(PROMPTS[0]);
    b.hold(BodyPosition::Level);
    let at = b.tick();
    b.cal.cancel(at).unwrap();
    assert!(b.cal.take_finished().is_some());

    b.start(SensorKind::Accelerometer);
    assert!(b.cal.samples().is_empty());
    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::Accepted);
    b.text(PROMPTS[0]);
    b.sent();

    // nothing measured since the new prompt
    b.confirm();
    assert!(b.sent().is_empty());
    let snap = b.cal.snapshot();
    assert_eq!(snap.state, StateTag::AwaitingUserPosition);
    assert_eq!(snap.alert.map(|a| a.style), Some(AlertStyle::Inline));
    assert_eq!(b.cal.session().unwrap().attempt(BodyPosition::Level).unwrap().attempt_count, 0);

    b.hold(BodyPosition::Level);
    b.confirm();
    b.ack(CommandId::ACCELCAL_VEHICLE_POS, AckResult::Accepted);

    // level readings buffered, then the firmware moves on to the left side
    b.hold(BodyPosition::Level);
    b.text(PROMPTS[1]);
    assert_eq!(b.cal.samples().len(), 0);
    b.confirm();
    assert!(b.sent().is_empty());
    assert_eq!(b.state(), StateTag::AwaitingUserPosition);
}

#[test]
fn identical_notice_while_waiting_is_idempotent() {
    let mut b = Bench::new();
    b.start(SensorKind::Accelerometer);
    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::Accepted);
    b.text(PROMPTS[0]);
    b.hold(BodyPosition::Level);
    b.confirm();
    b.ack(CommandId::ACCELCAL_VEHICLE_POS, AckResult::Accepted);
    b.text(PROMPTS[1]);
    b.hold(BodyPosition::LeftSide);
    b.confirm();
    b.ack(CommandId::ACCELCAL_VEHICLE_POS, AckResult::Accepted);

    b.text(PROMPTS[2]);
    let before = b.cal.session().unwrap().diagnostics().len();
    let snap_before = b.cal.snapshot();

    b.text(PROMPTS[2]);
    let session = b.cal.session().unwrap();
    assert_eq!(b.cal.snapshot(), snap_before);
    // exactly the status-text entry itself, no transition or note
    assert_eq!(session.diagnostics().len(), before + 1);
    assert_eq!(session.diagnostics().last().unwrap().kind(), DiagnosticKind::StatusText);
    assert_eq!(session.attempts().len(), 3);
}

#[test]
fn cancel_while_awaiting_sampling_ignores_the_late_ack() {
    let mut b = Bench::new();
    b.start(SensorKind::Accelerometer);
    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::Accepted);
    b.text(PROMPTS[0]);
    b.hold(BodyPosition::Level);
    b.confirm();
    assert_eq!(b.state(), StateTag::AwaitingSampling);
    b.sent();

    let at = b.tick();
    b.cal.cancel(at).unwrap();
    assert_eq!(b.state(), StateTag::Cancelled);
    assert_eq!(b.sent(), vec![OutboundCommand::Abort { sensor: SensorKind::Accelerometer }]);
    let sealed_at = b.cal.session().unwrap().ended_at();
    assert_eq!(sealed_at, Some(at));

    let before = b.cal.session().unwrap().diagnostics().len();
    b.ack(CommandId::ACCELCAL_VEHICLE_POS, AckResult::Accepted);
    b.text("Calibration successful");

    let session = b.cal.session().unwrap();
    assert_eq!(session.state().tag(), StateTag::Cancelled);
    assert_eq!(session.result(), CalResult::Cancelled);
    assert_eq!(session.ended_at(), sealed_at);
    assert!(!session.attempt(BodyPosition::Level).unwrap().accepted);
    let tail: Vec<DiagnosticKind> = session.diagnostics().events()[before..].iter().map(|e| e.kind()).collect();
    assert_eq!(tail, vec![DiagnosticKind::Acknowledgement, DiagnosticKind::Note, DiagnosticKind::StatusText]);
    assert!(!tail.contains(&DiagnosticKind::Transition));
}

#[test]
fn tagged_message_for_another_session_is_stale() {
    let mut b = Bench::new();
    let id = b.start(SensorKind::Barometer);
    let other = SessionId(id.0.wrapping_add(1));
    let at = b.tick();
    b.cal.handle_inbound(
        Inbound::tagged(
            other,
            InboundMessage::Ack(CommandAck { command: CommandId::PREFLIGHT_CALIBRATION, result: AckResult::Denied }),
        ),
        at,
    );
    assert_eq!(b.state(), StateTag::AwaitingAcknowledgement);
    let session = b.cal.session().unwrap();
    assert!(session.diagnostics().last().unwrap().summary().contains("stale"));

    let at = b.tick();
    b.cal.handle_inbound(
        Inbound::tagged(
            id,
            InboundMessage::Ack(CommandAck { command: CommandId::PREFLIGHT_CALIBRATION, result: AckResult::Accepted }),
        ),
        at,
    );
    assert_eq!(b.state(), StateTag::HoldingStill);
}

#[test]
fn armed_vehicle_rejection_is_terminal_and_allows_restart() {
    let mut b = Bench::new();
    let first = b.start(SensorKind::LevelHorizon);
    assert!(b.cal.start(SensorKind::Compass, b.now).is_err());

    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::TemporarilyRejected);
    let snap = b.cal.snapshot();
    assert_eq!(snap.state, StateTag::Rejected);
    assert_eq!(snap.result, Some(CalResult::Rejected));
    assert_eq!(snap.alert.map(|a| a.style), Some(AlertStyle::Modal));

    let finished = b.cal.take_finished().unwrap();
    assert_eq!(finished.id(), first);
    let second = b.start(SensorKind::Compass);
    assert_ne!(first, second);
    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::Accepted);
    assert_eq!(b.state(), StateTag::Rotating);
    b.text("Calibration FAILED");
    assert_eq!(b.state(), StateTag::Failed);
}

#[test]
fn firmware_timeout_notice_ends_session() {
    let mut b = Bench::new();
    b.start(SensorKind::Barometer);
    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::Accepted);
    assert_eq!(b.cal.snapshot().progress, 50);
    b.text("Barometer calibration timed out");
    assert_eq!(b.state(), StateTag::TimedOut);
    assert_eq!(b.cal.session().unwrap().result(), CalResult::TimedOut);
}

#[test]
fn success_overtaking_the_last_ack_still_completes() {
    let mut b = Bench::new();
    b.start(SensorKind::Accelerometer);
    b.ack(CommandId::PREFLIGHT_CALIBRATION, AckResult::Accepted);
    // every prompt overtakes the ack for the previous position, which never arrives
    for (i, position) in BodyPosition::ALL.iter().enumerate() {
        b.text(PROMPTS[i]);
        b.hold(*position);
        b.confirm();
    }
    assert_eq!(b.state(), StateTag::AwaitingSampling);
    b.text("Calibration successful");
    assert_eq!(b.state(), StateTag::Completed);
    b.ack(CommandId::ACCELCAL_VEHICLE_POS, AckResult::Accepted);
    let session = b.cal.session().unwrap();
    assert_eq!(session.accepted_positions(), 6);
    assert_eq!(session.attempts().len(), 6);
}

/// Random protocol traffic and user actions: completion must always be backed
/// by a recorded success notice, and attempts stay unique per position.
#[test]
fn completion_is_always_backed_by_a_success_notice() {
    let texts = [
        PROMPTS[0], PROMPTS[1], PROMPTS[2], PROMPTS[3], PROMPTS[4], PROMPTS[5],
        "Calibration successful",
        "EKF3 waiting for GPS config data",
        "PreArm: Accels inconsistent",
    ];
    let results = [AckResult::Accepted, AckResult::Accepted, AckResult::Denied, AckResult::InProgress];
    let mut rng = StdRng::seed_from_u64(0x5eed_cafe);

    for round in 0..400 {
        let mut b = Bench::new();
        let sensor = SensorKind::ALL[round % SensorKind::ALL.len()];
        b.start(sensor);
        for _ in 0..rng.gen_range(5..80) {
            match rng.gen_range(0..10) {
                0..=2 => {
                    let t = texts[rng.gen_range(0..texts.len())];
                    b.text(t);
                }
                3..=4 => {
                    let cmd = if rng.gen_bool(0.5) { CommandId::PREFLIGHT_CALIBRATION } else { CommandId::ACCELCAL_VEHICLE_POS };
                    b.ack(cmd, results[rng.gen_range(0..results.len())]);
                }
                5..=7 => {
                    let p = BodyPosition::ALL[rng.gen_range(0..6)];
                    b.hold(p);
                    b.confirm();
                }
                8 => {
                    if rng.gen_bool(0.1) {
                        let at = b.tick();
                        b.cal.cancel(at).unwrap();
                    }
                }
                _ => b.sample(rng.gen_range(-12.0..12.0), rng.gen_range(-12.0..12.0), rng.gen_range(-12.0..12.0)),
            }
        }

        let session = b.cal.session().unwrap();
        if session.state().tag() == StateTag::Completed {
            assert!(session.diagnostics().saw_intent(StatusIntent::CalibrationSuccess), "round {}", round);
            assert_eq!(session.result(), CalResult::Success);
        }
        let mut seen = std::collections::HashSet::new();
        for a in session.attempts() {
            assert!(seen.insert(a.position), "duplicate attempt for {:?} in round {}", a.position, round);
        }
        let seqs: Vec<u64> = session.diagnostics().iter().map(|e| e.seq()).collect();
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
    }
}
