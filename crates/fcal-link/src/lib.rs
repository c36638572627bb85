pub mod autodetect;
pub mod mav;
pub mod state;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    pub enable: bool,

    /// If true, probe candidate serial ports/bauds and pick the first
    /// that yields a MAVLink HEARTBEAT.
    pub autodetect: bool,

    /// When autodetect=false: fixed port config
    pub serial_dev: Option<String>,
    pub baud: Option<u32>,

    /// Autodetect candidates (paths). Example:
    /// ["/dev/ttyACM0","/dev/ttyUSB0","/dev/serial0"]
    pub candidate_devs: Option<Vec<String>>,

    /// Autodetect candidate baud rates (common ArduPilot telemetry values).
    pub candidate_bauds: Option<Vec<u32>>,

    /// Heartbeat wait per probe attempt
    pub heartbeat_timeout_ms: Option<u64>,

    /// MAVLink ids we use (ground-station side). 255/190 is what GCS software uses.
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (FC side). 1/1 is common for ArduPilot.
    pub target_sys: u8,
    pub target_comp: u8,

    /// Refuse to send calibration commands before the FC heartbeat was seen
    #[serde(default)]
    pub require_heartbeat: bool,

    /// GCS heartbeat send rate. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,

    /// Ask the FC to stream RAW_IMU at this rate for the orientation check.
    /// Unset leaves the FC's stream rates alone.
    pub request_imu_hz: Option<f32>,
}
