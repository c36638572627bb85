use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SensorKind {
    Accelerometer,
    Compass,
    Barometer,
    LevelHorizon,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Accelerometer,
        SensorKind::Compass,
        SensorKind::Barometer,
        SensorKind::LevelHorizon,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Compass => "compass",
            SensorKind::Barometer => "barometer",
            SensorKind::LevelHorizon => "level-horizon",
        }
    }

    /// Only the accelerometer procedure walks the vehicle through body positions.
    pub fn uses_positions(&self) -> bool {
        matches!(self, SensorKind::Accelerometer)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accel" | "accelerometer" => Ok(SensorKind::Accelerometer),
            "compass" | "mag" | "magnetometer" => Ok(SensorKind::Compass),
            "baro" | "barometer" => Ok(SensorKind::Barometer),
            "level" | "level-horizon" | "horizon" => Ok(SensorKind::LevelHorizon),
            other => Err(format!("unknown sensor kind: {}", other)),
        }
    }
}

/// The six canonical body orientations of the accelerometer procedure,
/// numbered in the order the firmware requests them (1..=6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodyPosition {
    Level,
    LeftSide,
    RightSide,
    NoseDown,
    NoseUp,
    Inverted,
}

impl BodyPosition {
    pub const ALL: [BodyPosition; 6] = [
        BodyPosition::Level,
        BodyPosition::LeftSide,
        BodyPosition::RightSide,
        BodyPosition::NoseDown,
        BodyPosition::NoseUp,
        BodyPosition::Inverted,
    ];

    pub const COUNT: usize = 6;

    pub fn index(&self) -> u8 {
        match self {
            BodyPosition::Level => 1,
            BodyPosition::LeftSide => 2,
            BodyPosition::RightSide => 3,
            BodyPosition::NoseDown => 4,
            BodyPosition::NoseUp => 5,
            BodyPosition::Inverted => 6,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index).checked_sub(1)?).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            BodyPosition::Level => "level",
            BodyPosition::LeftSide => "left side",
            BodyPosition::RightSide => "right side",
            BodyPosition::NoseDown => "nose down",
            BodyPosition::NoseUp => "nose up",
            BodyPosition::Inverted => "inverted",
        }
    }

    pub fn is_last(&self) -> bool {
        self.index() as usize == Self::COUNT
    }
}

impl fmt::Display for BodyPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.index())
    }
}
