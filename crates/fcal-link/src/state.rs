use std::time::{Duration, Instant};

/// Live view of the serial link, shared between the reader thread and the CLI.
#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub connected: bool,
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub last_heartbeat: Option<Instant>,
    pub armed: bool,
    pub last_statustext: Option<String>,
    pub frames_seen: u64,
}

impl LinkStatus {
    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }

    /// True once a heartbeat arrived within `timeout`.
    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.hb_age().map(|age| age <= timeout).unwrap_or(false)
    }
}
