use fcal_proto::{AccelSample, BodyPosition};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

pub const STANDARD_GRAVITY: f64 = 9.81;

// absorbs rounding in the mean so the tolerance edge itself is accepted
const EDGE_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        })
    }
}

/// Body axis that carries gravity when the vehicle rests in `position`.
pub fn vertical_axis(position: BodyPosition) -> Axis {
    match position {
        BodyPosition::Level | BodyPosition::Inverted => Axis::Z,
        BodyPosition::LeftSide | BodyPosition::RightSide => Axis::Y,
        BodyPosition::NoseDown | BodyPosition::NoseUp => Axis::X,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn component(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Axis with the largest absolute component; ties resolve to the earlier axis.
    pub fn dominant_axis(&self) -> Axis {
        let (ax, ay, az) = (self.x.abs(), self.y.abs(), self.z.abs());
        if ax >= ay && ax >= az {
            Axis::X
        } else if ay >= az {
            Axis::Y
        } else {
            Axis::Z
        }
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub gravity_mps2: f64,
    /// Allowed relative deviation of |a| from gravity (0.15 = ±15%).
    pub tolerance: f64,
    /// Number of most recent samples kept and averaged.
    pub window: usize,
    /// Fewer buffered samples than this is treated as "not settled yet".
    pub min_samples: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            gravity_mps2: STANDARD_GRAVITY,
            tolerance: 0.15,
            window: 20,
            min_samples: 5,
        }
    }
}

/// Ring buffer of the latest acceleration samples.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<AccelSample>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, sample: AccelSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn latest(&self) -> Option<&AccelSample> {
        self.samples.back()
    }

    pub fn mean(&self) -> Option<Vec3> {
        if self.samples.is_empty() {
            return None;
        }
        let n = self.samples.len() as f64;
        let (sx, sy, sz) = self
            .samples
            .iter()
            .fold((0.0, 0.0, 0.0), |(x, y, z), s| (x + s.x, y + s.y, z + s.z));
        Some(Vec3::new(sx / n, sy / n, sz / n))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub accepted: bool,
    /// Shown verbatim to the user.
    pub reason: String,
    pub mean: Option<Vec3>,
}

impl Verdict {
    fn reject(reason: String, mean: Option<Vec3>) -> Self {
        Self { accepted: false, reason, mean }
    }
}

/// Local orientation gate run before a position is ever submitted to the
/// firmware. Passing it does not imply the firmware will accept the sample.
#[derive(Debug, Clone)]
pub struct OrientationValidator {
    cfg: ValidatorConfig,
}

impl OrientationValidator {
    pub fn new(cfg: ValidatorConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.cfg
    }

    pub fn bounds(&self) -> (f64, f64) {
        let g = self.cfg.gravity_mps2;
        (g * (1.0 - self.cfg.tolerance), g * (1.0 + self.cfg.tolerance))
    }

    pub fn validate(&self, window: &SampleWindow, target: BodyPosition) -> Verdict {
        let Some(mean) = window.mean() else {
            return Verdict::reject(
                "no acceleration data received yet; check that the flight controller streams IMU data".into(),
                None,
            );
        };

        if window.len() < self.cfg.min_samples {
            return Verdict::reject(
                format!(
                    "only {} of {} samples collected; hold the vehicle still a moment longer",
                    window.len(),
                    self.cfg.min_samples
                ),
                Some(mean),
            );
        }

        let magnitude = mean.magnitude();
        let deviation = (magnitude - self.cfg.gravity_mps2).abs();
        if deviation > self.cfg.gravity_mps2 * self.cfg.tolerance + EDGE_EPS {
            let (lo, hi) = self.bounds();
            return Verdict::reject(
                format!(
                    "measured acceleration {:.2} m/s² is outside {:.2}..{:.2} m/s²; hold the vehicle still",
                    magnitude, lo, hi
                ),
                Some(mean),
            );
        }

        let expected = vertical_axis(target);
        let vertical = mean.component(expected).abs();
        let dominant = [Axis::X, Axis::Y, Axis::Z]
            .into_iter()
            .filter(|a| *a != expected)
            .all(|a| vertical > mean.component(a).abs());
        if !dominant {
            return Verdict::reject(
                format!(
                    "{} needs the {} axis vertical but the {} axis carries gravity; place the vehicle {}",
                    target.name(),
                    expected,
                    mean.dominant_axis(),
                    target.name()
                ),
                Some(mean),
            );
        }

        Verdict {
            accepted: true,
            reason: format!(
                "{} orientation confirmed: |a|={:.2} m/s², {} axis vertical",
                target.name(),
                magnitude,
                expected
            ),
            mean: Some(mean),
        }
    }
}
