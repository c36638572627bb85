use anyhow::Result;
use mavlink::ardupilotmega::{MavAutopilot, MavMessage, MavModeFlag};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::mav::FcLink;
use crate::FcConfig;

const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 1500;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    /// Autopilot family from the heartbeat, e.g. "MAV_AUTOPILOT_ARDUPILOTMEGA".
    pub autopilot: Option<String>,
    pub armed: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyS0".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![115200, 57600, 230400, 921600]
}

/// Probes every candidate port/baud pair until one yields an autopilot heartbeat.
pub fn autodetect_fc(fc: &FcConfig) -> Result<AutodetectResult> {
    let devs = fc.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
    let bauds = fc.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds);
    let heartbeat_timeout = Duration::from_millis(fc.heartbeat_timeout_ms.unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT_MS));

    let mut probes = Vec::new();

    for dev in devs {
        for baud in &bauds {
            let probe = probe(fc, &dev, *baud, heartbeat_timeout);
            let found = probe.hb_seen;
            probes.push(probe);
            if found {
                info!("fc autodetect: OK {} @ {}", dev, baud);
                return Ok(AutodetectResult { chosen: Some((dev, *baud)), probes });
            }
        }
    }

    Ok(AutodetectResult { chosen: None, probes })
}

fn probe(fc: &FcConfig, dev: &str, baud: u32, heartbeat_timeout: Duration) -> ProbeResult {
    let start = Instant::now();
    let mut result = ProbeResult {
        dev: dev.to_string(),
        baud,
        hb_seen: false,
        autopilot: None,
        armed: false,
        elapsed_ms: 0,
        note: String::new(),
    };

    match FcLink::open(dev, baud, fc.sys_id, fc.comp_id, fc.target_sys, fc.target_comp, false) {
        Ok(mut link) => {
            while start.elapsed() < heartbeat_timeout {
                if let Ok(Some(MavMessage::HEARTBEAT(hb))) = link.poll_once_nonblocking() {
                    // GCS and companion heartbeats carry MAV_AUTOPILOT_INVALID
                    if hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID {
                        result.hb_seen = true;
                        result.autopilot = Some(format!("{:?}", hb.autopilot));
                        result.armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                        result.note = "heartbeat".into();
                        break;
                    }
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            if !result.hb_seen {
                result.note = "no heartbeat".into();
            }
        }
        Err(e) => {
            result.note = format!("open/connect failed: {}", e);
            warn!("fc autodetect probe failed dev={} baud={} err={}", dev, baud, e);
        }
    }

    result.elapsed_ms = start.elapsed().as_millis() as u64;
    result
}
