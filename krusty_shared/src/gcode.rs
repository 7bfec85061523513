//! G-code modal state shared by the canonical machine, planner and runtime.
//!
//! A [`GCodeState`] is copied into every planner buffer when a move is queued,
//! and copied again into the runtime when the buffer starts executing, so the
//! runtime always reflects the block that produced the current motion.

use serde::{Deserialize, Serialize};

use crate::axis::{AXES, COORDS};
use crate::vector::AxisVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionMode {
    StraightTraverse,
    StraightFeed,
    CwArc,
    CcwArc,
    #[default]
    CancelMotionMode,
}

impl MotionMode {
    pub fn is_arc(self) -> bool {
        matches!(self, MotionMode::CwArc | MotionMode::CcwArc)
    }

    /// NIST modal number reported as `momo`.
    pub fn report_code(self) -> u8 {
        match self {
            MotionMode::StraightTraverse => 0,
            MotionMode::StraightFeed => 1,
            MotionMode::CwArc => 2,
            MotionMode::CcwArc => 3,
            MotionMode::CancelMotionMode => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitsMode {
    Inches,
    #[default]
    Millimeters,
}

impl UnitsMode {
    pub const MM_PER_INCH: f64 = 25.4;

    pub fn to_millimeters(self, value: f64) -> f64 {
        match self {
            UnitsMode::Inches => value * Self::MM_PER_INCH,
            UnitsMode::Millimeters => value,
        }
    }

    pub fn from_millimeters(self, value: f64) -> f64 {
        match self {
            UnitsMode::Inches => value / Self::MM_PER_INCH,
            UnitsMode::Millimeters => value,
        }
    }
}

/// Arc plane. Each plane names its two in-plane axes and the normal (linear) axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plane {
    #[default]
    XY,
    XZ,
    YZ,
}

impl Plane {
    /// (first in-plane axis, second in-plane axis, linear axis)
    pub fn axes(self) -> (usize, usize, usize) {
        match self {
            Plane::XY => (0, 1, 2),
            Plane::XZ => (2, 0, 1),
            Plane::YZ => (1, 2, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMode {
    #[default]
    Absolute,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedRateMode {
    #[default]
    UnitsPerMinute,
    InverseTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathControl {
    /// G61: every junction is a full stop.
    ExactStop,
    /// G61.1: junctions use a reduced deviation.
    ExactPath,
    /// G64
    #[default]
    Continuous,
}

/// 0 is machine coordinates (G53); 1..=6 are G54..G59.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CoordSystem(u8);

impl CoordSystem {
    pub const MACHINE: CoordSystem = CoordSystem(0);
    pub const G54: CoordSystem = CoordSystem(1);

    pub fn new(index: u8) -> Option<CoordSystem> {
        ((index as usize) < COORDS).then_some(CoordSystem(index))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// G-code name, e.g. `G55` for index 2.
    pub fn gcode(self) -> String {
        if self.0 == 0 {
            "G53".to_string()
        } else {
            format!("G{}", 53 + self.0)
        }
    }
}

impl Default for CoordSystem {
    fn default() -> Self {
        CoordSystem::G54
    }
}

impl TryFrom<u8> for CoordSystem {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        CoordSystem::new(value).ok_or_else(|| format!("coordinate system {} out of range", value))
    }
}

impl From<CoordSystem> for u8 {
    fn from(value: CoordSystem) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpindleState {
    #[default]
    Off,
    Cw,
    Ccw,
}

/// One generation of G-code modal state (model or runtime).
#[derive(Debug, Clone, PartialEq)]
pub struct GCodeState {
    pub line_number: u32,
    pub motion_mode: MotionMode,
    pub coord_system: CoordSystem,
    pub units_mode: UnitsMode,
    pub plane: Plane,
    pub distance_mode: DistanceMode,
    pub feed_rate_mode: FeedRateMode,
    pub path_control: PathControl,
    pub tool: u8,
    pub spindle: SpindleState,
    pub spindle_speed: f64,
    /// mm/min, or minutes per move in inverse-time mode
    pub feed_rate: f64,
    /// Absolute machine target of the move.
    pub target: AxisVector,
    /// Offsets resolved when the move was queued.
    pub work_offset: AxisVector,
    pub absolute_override: bool,
    /// Optimal move time in minutes.
    pub move_time: f64,
    /// Fastest the move could run given axis limits.
    pub minimum_time: f64,
}

impl Default for GCodeState {
    fn default() -> Self {
        Self {
            line_number: 0,
            motion_mode: MotionMode::default(),
            coord_system: CoordSystem::default(),
            units_mode: UnitsMode::default(),
            plane: Plane::default(),
            distance_mode: DistanceMode::default(),
            feed_rate_mode: FeedRateMode::default(),
            path_control: PathControl::default(),
            tool: 0,
            spindle: SpindleState::Off,
            spindle_speed: 0.0,
            feed_rate: 0.0,
            target: [0.0; AXES],
            work_offset: [0.0; AXES],
            absolute_override: false,
            move_time: 0.0,
            minimum_time: 0.0,
        }
    }
}
