use anyhow::{Context, Result};
use fcal_proto::{
    AccelSample, AckResult, CommandAck, CommandId, InboundMessage, OutboundCommand, SensorKind,
    Severity, StatusText,
};
use mavlink::{
    ardupilotmega::{
        MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavResult, MavSeverity, MavState, MavType,
        COMMAND_LONG_DATA, HEARTBEAT_DATA,
    },
    MavConnection, MavHeader,
};
use std::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Standard gravity used by the FC when it reports acceleration in milli-g.
const MG_TO_MPS2: f64 = 9.80665 / 1000.0;

// RAW_IMU message id, for MAV_CMD_SET_MESSAGE_INTERVAL
const RAW_IMU_MSG_ID: f32 = 27.0;

pub struct FcLink {
    conn: Box<dyn MavConnection<MavMessage> + Send>,
    hdr: MavHeader,
    target_sys: u8,
    target_comp: u8,
    last_heartbeat: Option<Instant>,
    armed: bool,
    require_heartbeat: bool,
}

impl FcLink {
    pub fn open(
        dev: &str,
        baud: u32,
        sys_id: u8,
        comp_id: u8,
        target_sys: u8,
        target_comp: u8,
        require_heartbeat: bool,
    ) -> Result<Self> {
        // quick validate device
        let _ = tokio_serial::new(dev, baud)
            .open_native_async()
            .with_context(|| format!("open fc serial device {}", dev))?;

        let url = format!("serial:{}:{}", dev, baud);
        let conn = mavlink::connect::<MavMessage>(&url)
            .with_context(|| format!("mavlink connect {}", url))?;

        Ok(Self {
            conn,
            hdr: MavHeader { system_id: sys_id, component_id: comp_id, sequence: 0 },
            target_sys,
            target_comp,
            last_heartbeat: None,
            armed: false,
            require_heartbeat,
        })
    }

    /// Best-effort: returns Ok(None) if recv fails.
    /// Some backends block; run this on a dedicated reader thread.
    pub fn poll_once_nonblocking(&mut self) -> Result<Option<MavMessage>> {
        match self.conn.recv() {
            Ok((hdr, msg)) => {
                if let MavMessage::HEARTBEAT(hb) = &msg {
                    // only the autopilot's own heartbeat says anything about arming
                    if hdr.system_id == self.target_sys && hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID {
                        self.last_heartbeat = Some(Instant::now());
                        self.armed = is_armed(hb);
                    }
                }
                Ok(Some(msg))
            }
            Err(_e) => Ok(None),
        }
    }

    pub fn seen_heartbeat(&self) -> bool {
        self.last_heartbeat.is_some()
    }

    /// When the target autopilot's heartbeat was last received.
    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    pub fn armed(&self) -> bool {
        self.armed
    }

    pub fn send_heartbeat(&mut self) -> Result<()> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(MavMessage::HEARTBEAT(hb))
    }

    pub fn request_imu_stream(&mut self, hz: f32) -> Result<()> {
        let interval_us = (1_000_000.0 / hz.max(1.0)).round();
        let mut cmd = command_long(self.target_sys, self.target_comp, MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL);
        cmd.param1 = RAW_IMU_MSG_ID;
        cmd.param2 = interval_us;
        info!("FC: requesting RAW_IMU every {}us", interval_us);
        self.send(MavMessage::COMMAND_LONG(cmd))
    }

    /// Encodes and sends one engine command. Returns false for local-only
    /// notices that have no firmware counterpart.
    pub fn send_command(&mut self, command: &OutboundCommand) -> Result<bool> {
        let Some(cmd) = encode_command(command, self.target_sys, self.target_comp) else {
            debug!("FC: {} is local only; nothing sent", command);
            return Ok(false);
        };
        if self.require_heartbeat && !self.seen_heartbeat() {
            anyhow::bail!("refusing to send {}: no heartbeat seen yet", command);
        }
        if self.armed {
            warn!("FC reports armed; expect the firmware to refuse {}", command);
        }
        info!("FC: sending {}", command);
        self.send(MavMessage::COMMAND_LONG(cmd))?;
        Ok(true)
    }

    fn send(&mut self, msg: MavMessage) -> Result<()> {
        self.hdr.sequence = self.hdr.sequence.wrapping_add(1);
        self.conn.send(&self.hdr, &msg).context("mavlink send")?;
        Ok(())
    }
}

fn is_armed(hb: &HEARTBEAT_DATA) -> bool {
    hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED)
}

fn command_long(target_system: u8, target_component: u8, command: MavCmd) -> COMMAND_LONG_DATA {
    COMMAND_LONG_DATA {
        target_system,
        target_component,
        command,
        confirmation: 0,
        param1: 0.0,
        param2: 0.0,
        param3: 0.0,
        param4: 0.0,
        param5: 0.0,
        param6: 0.0,
        param7: 0.0,
    }
}

/// PREFLIGHT_CALIBRATION selects the sensor by parameter slot;
/// ACCELCAL_VEHICLE_POS carries the 1-based position in param1.
pub fn encode_command(command: &OutboundCommand, target_sys: u8, target_comp: u8) -> Option<COMMAND_LONG_DATA> {
    match command {
        OutboundCommand::StartCalibration { sensor } => {
            let mut cmd = command_long(target_sys, target_comp, MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION);
            match sensor {
                SensorKind::Compass => cmd.param2 = 1.0,
                SensorKind::Barometer => cmd.param3 = 1.0,
                SensorKind::Accelerometer => cmd.param5 = 1.0,
                SensorKind::LevelHorizon => cmd.param5 = 2.0,
            }
            Some(cmd)
        }
        OutboundCommand::ConfirmPosition { position } => {
            let mut cmd = command_long(target_sys, target_comp, MavCmd::MAV_CMD_ACCELCAL_VEHICLE_POS);
            cmd.param1 = f32::from(position.index());
            Some(cmd)
        }
        OutboundCommand::Abort { .. } => None,
    }
}

/// Maps the MAVLink traffic the engine cares about; everything else is None.
pub fn translate(msg: &MavMessage) -> Option<InboundMessage> {
    match msg {
        MavMessage::COMMAND_ACK(ack) => Some(InboundMessage::Ack(CommandAck {
            command: CommandId(ack.command as u16),
            result: ack_result(ack.result),
        })),
        MavMessage::STATUSTEXT(st) => Some(InboundMessage::StatusText(StatusText {
            severity: severity(st.severity),
            text: text_from_chars(st.text.iter().map(|&c| c as char)),
        })),
        MavMessage::HIGHRES_IMU(imu) => Some(InboundMessage::Sample(AccelSample::new(
            imu.time_usec / 1000,
            f64::from(imu.xacc),
            f64::from(imu.yacc),
            f64::from(imu.zacc),
        ))),
        MavMessage::RAW_IMU(imu) => Some(InboundMessage::Sample(AccelSample::new(
            imu.time_usec / 1000,
            mg_to_mps2(imu.xacc),
            mg_to_mps2(imu.yacc),
            mg_to_mps2(imu.zacc),
        ))),
        MavMessage::SCALED_IMU(imu) => Some(InboundMessage::Sample(AccelSample::new(
            u64::from(imu.time_boot_ms),
            mg_to_mps2(imu.xacc),
            mg_to_mps2(imu.yacc),
            mg_to_mps2(imu.zacc),
        ))),
        _ => None,
    }
}

fn mg_to_mps2(mg: i16) -> f64 {
    f64::from(mg) * MG_TO_MPS2
}

fn text_from_chars(chars: impl Iterator<Item = char>) -> String {
    chars.take_while(|c| *c != '\0').collect::<String>().trim().to_string()
}

fn ack_result(result: MavResult) -> AckResult {
    match result {
        MavResult::MAV_RESULT_ACCEPTED => AckResult::Accepted,
        MavResult::MAV_RESULT_TEMPORARILY_REJECTED => AckResult::TemporarilyRejected,
        MavResult::MAV_RESULT_DENIED => AckResult::Denied,
        MavResult::MAV_RESULT_UNSUPPORTED => AckResult::Unsupported,
        MavResult::MAV_RESULT_FAILED => AckResult::Failed,
        MavResult::MAV_RESULT_IN_PROGRESS => AckResult::InProgress,
        MavResult::MAV_RESULT_CANCELLED => AckResult::Cancelled,
        #[allow(unreachable_patterns)]
        _ => AckResult::Failed,
    }
}

fn severity(sev: MavSeverity) -> Severity {
    match sev {
        MavSeverity::MAV_SEVERITY_EMERGENCY => Severity::Emergency,
        MavSeverity::MAV_SEVERITY_ALERT => Severity::Alert,
        MavSeverity::MAV_SEVERITY_CRITICAL => Severity::Critical,
        MavSeverity::MAV_SEVERITY_ERROR => Severity::Error,
        MavSeverity::MAV_SEVERITY_WARNING => Severity::Warning,
        MavSeverity::MAV_SEVERITY_NOTICE => Severity::Notice,
        MavSeverity::MAV_SEVERITY_INFO => Severity::Info,
        MavSeverity::MAV_SEVERITY_DEBUG => Severity::Debug,
        #[allow(unreachable_patterns)]
        _ => Severity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcal_proto::BodyPosition;

    #[test]
    fn start_commands_select_sensor_by_param() {
        let accel = encode_command(&OutboundCommand::StartCalibration { sensor: SensorKind::Accelerometer }, 1, 1).unwrap();
        assert_eq!(accel.command, MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION);
        assert_eq!((accel.param2, accel.param3, accel.param5), (0.0, 0.0, 1.0));

        let level = encode_command(&OutboundCommand::StartCalibration { sensor: SensorKind::LevelHorizon }, 1, 1).unwrap();
        assert_eq!(level.param5, 2.0);

        let compass = encode_command(&OutboundCommand::StartCalibration { sensor: SensorKind::Compass }, 1, 1).unwrap();
        assert_eq!((compass.param2, compass.param5), (1.0, 0.0));

        let baro = encode_command(&OutboundCommand::StartCalibration { sensor: SensorKind::Barometer }, 1, 1).unwrap();
        assert_eq!(baro.param3, 1.0);
    }

    #[test]
    fn confirm_position_carries_index_and_target() {
        let cmd = encode_command(&OutboundCommand::ConfirmPosition { position: BodyPosition::NoseDown }, 7, 3).unwrap();
        assert_eq!(cmd.command, MavCmd::MAV_CMD_ACCELCAL_VEHICLE_POS);
        assert_eq!(cmd.param1, 4.0);
        assert_eq!((cmd.target_system, cmd.target_component), (7, 3));
        assert_eq!(MavCmd::MAV_CMD_ACCELCAL_VEHICLE_POS as u16, CommandId::ACCELCAL_VEHICLE_POS.0);
        assert_eq!(MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION as u16, CommandId::PREFLIGHT_CALIBRATION.0);
    }

    #[test]
    fn abort_is_never_encoded() {
        assert!(encode_command(&OutboundCommand::Abort { sensor: SensorKind::Compass }, 1, 1).is_none());
    }

    #[test]
    fn statustext_padding_is_stripped() {
        let raw = "Calibration successful\0\0\0\0garbage";
        assert_eq!(text_from_chars(raw.chars()), "Calibration successful");
        assert_eq!(text_from_chars("  \0".chars()), "");
    }

    #[test]
    fn milli_g_conversion() {
        assert!((mg_to_mps2(1000) - 9.80665).abs() < 1e-12);
        assert!((mg_to_mps2(-500) + 4.903325).abs() < 1e-12);
    }

    #[test]
    fn result_and_severity_mapping() {
        assert_eq!(ack_result(MavResult::MAV_RESULT_IN_PROGRESS), AckResult::InProgress);
        assert_eq!(ack_result(MavResult::MAV_RESULT_DENIED), AckResult::Denied);
        assert_eq!(severity(MavSeverity::MAV_SEVERITY_CRITICAL), Severity::Critical);
    }
}
