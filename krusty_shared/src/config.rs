//! Machine configuration shared by the host, simulator, and tests.
//!
//! Every section and field has a default, so an empty file describes a
//! working four-motor XYZA machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::axis::{Axis, AxisMode, AXES, MOTORS};
use crate::gcode::{CoordSystem, DistanceMode, PathControl, Plane, UnitsMode};

/// The planner ring never shrinks below this many buffers.
pub const MIN_PLANNER_BUFFERS: usize = 28;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub stepper: StepperConfig,
    #[serde(default)]
    pub gcode: GCodeDefaults,
    #[serde(default)]
    pub axes: AxesConfig,
    #[serde(default = "default_motors")]
    pub motors: Vec<MotorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            machine: MachineConfig::default(),
            planner: PlannerConfig::default(),
            stepper: StepperConfig::default(),
            gcode: GCodeDefaults::default(),
            axes: AxesConfig::default(),
            motors: default_motors(),
        }
    }
}

/// How G2/G3 are turned into motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArcMode {
    /// The canonical machine tessellates arcs into planned straight feeds.
    #[default]
    Planned,
    /// The arc is queued as one buffer and tessellated by the runtime.
    Runtime,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineConfig {
    /// Centripetal acceleration used for junction velocities (mm/min²).
    #[serde(default = "default_junction_acceleration")]
    pub junction_acceleration: f64,
    /// Maximum distance between an arc and its chords (mm).
    #[serde(default = "default_chordal_tolerance")]
    pub chordal_tolerance: f64,
    #[serde(default = "default_min_arc_segment_length")]
    pub min_arc_segment_length: f64,
    #[serde(default = "default_max_arc_segment_length")]
    pub max_arc_segment_length: f64,
    #[serde(default)]
    pub arc_mode: ArcMode,
    #[serde(default)]
    pub soft_limit_enable: bool,
    /// Junction deviation multiplier in exact path mode (G61.1).
    #[serde(default = "default_exact_path_factor")]
    pub exact_path_factor: f64,
    /// DDA ticks between controller loop passes in the simulated machine.
    #[serde(default = "default_controller_interval")]
    pub controller_interval: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            junction_acceleration: default_junction_acceleration(),
            chordal_tolerance: default_chordal_tolerance(),
            min_arc_segment_length: default_min_arc_segment_length(),
            max_arc_segment_length: default_max_arc_segment_length(),
            arc_mode: ArcMode::default(),
            soft_limit_enable: false,
            exact_path_factor: default_exact_path_factor(),
            controller_interval: default_controller_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    #[serde(default = "default_planner_buffers")]
    pub buffers: usize,
    #[serde(default = "default_nominal_segment_usec")]
    pub nominal_segment_usec: f64,
    #[serde(default = "default_min_segment_usec")]
    pub min_segment_usec: f64,
    /// Moves shorter than this are not queued (mm).
    #[serde(default = "default_min_move_length")]
    pub min_move_length: f64,
    /// Velocities closer than this are treated as equal (mm/min).
    #[serde(default = "default_velocity_tolerance")]
    pub velocity_tolerance: f64,
    #[serde(default = "default_iteration_max")]
    pub iteration_max: u32,
    /// Relative cruise change that ends the 2-region solver.
    #[serde(default = "default_iteration_error")]
    pub iteration_error: f64,
    /// Free buffers required before another block is accepted.
    #[serde(default = "default_headroom")]
    pub headroom: usize,
}

impl PlannerConfig {
    /// Nominal segment time in minutes.
    pub fn nominal_segment_time(&self) -> f64 {
        self.nominal_segment_usec / 60_000_000.0
    }

    /// Minimum segment time in minutes.
    pub fn min_segment_time(&self) -> f64 {
        self.min_segment_usec / 60_000_000.0
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            buffers: default_planner_buffers(),
            nominal_segment_usec: default_nominal_segment_usec(),
            min_segment_usec: default_min_segment_usec(),
            min_move_length: default_min_move_length(),
            velocity_tolerance: default_velocity_tolerance(),
            iteration_max: default_iteration_max(),
            iteration_error: default_iteration_error(),
            headroom: default_headroom(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepperConfig {
    /// DDA interrupt rate (Hz).
    #[serde(default = "default_dda_frequency")]
    pub dda_frequency: u32,
    /// Seconds of idle before motors are de-energized.
    #[serde(default = "default_motor_power_timeout")]
    pub motor_power_timeout: f64,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            dda_frequency: default_dda_frequency(),
            motor_power_timeout: default_motor_power_timeout(),
        }
    }
}

/// Modal defaults applied at startup and on program end.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GCodeDefaults {
    #[serde(default)]
    pub coord_system: CoordSystem,
    #[serde(default)]
    pub plane: Plane,
    #[serde(default)]
    pub units: UnitsMode,
    #[serde(default)]
    pub distance_mode: DistanceMode,
    #[serde(default)]
    pub path_control: PathControl,
}

impl Default for GCodeDefaults {
    fn default() -> Self {
        Self {
            coord_system: CoordSystem::G54,
            plane: Plane::XY,
            units: UnitsMode::Millimeters,
            distance_mode: DistanceMode::Absolute,
            path_control: PathControl::Continuous,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxisConfig {
    #[serde(default)]
    pub axis_mode: AxisMode,
    /// Traverse velocity limit (units/min).
    #[serde(default = "default_velocity_max")]
    pub velocity_max: f64,
    /// Feed velocity limit (units/min).
    #[serde(default = "default_velocity_max")]
    pub feedrate_max: f64,
    /// units/min³
    #[serde(default = "default_jerk_max")]
    pub jerk_max: f64,
    #[serde(default = "default_junction_deviation")]
    pub junction_deviation: f64,
    #[serde(default)]
    pub travel_min: f64,
    #[serde(default = "default_travel_max")]
    pub travel_max: f64,
    /// Radius used to convert linear words for rotary axes in radius mode.
    #[serde(default = "default_radius")]
    pub radius: f64,
}

impl AxisConfig {
    fn linear(velocity_max: f64, jerk_max: f64, travel_max: f64) -> Self {
        Self {
            axis_mode: AxisMode::Standard,
            velocity_max,
            feedrate_max: velocity_max,
            jerk_max,
            junction_deviation: default_junction_deviation(),
            travel_min: 0.0,
            travel_max,
            radius: default_radius(),
        }
    }

    fn rotary(axis_mode: AxisMode) -> Self {
        Self {
            axis_mode,
            velocity_max: 3600.0,
            feedrate_max: 3600.0,
            jerk_max: 2.0e8,
            junction_deviation: default_junction_deviation(),
            travel_min: -1.0,
            travel_max: -1.0,
            radius: default_radius(),
        }
    }

    /// Soft limits apply only when the travel range is non-empty.
    pub fn has_travel_limits(&self) -> bool {
        self.travel_max > self.travel_min
    }
}

impl Default for AxisConfig {
    fn default() -> Self {
        AxisConfig::linear(default_velocity_max(), default_jerk_max(), default_travel_max())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxesConfig {
    #[serde(default = "default_axis_xy")]
    pub x: AxisConfig,
    #[serde(default = "default_axis_xy")]
    pub y: AxisConfig,
    #[serde(default = "default_axis_z")]
    pub z: AxisConfig,
    #[serde(default = "default_axis_a")]
    pub a: AxisConfig,
    #[serde(default = "default_axis_bc")]
    pub b: AxisConfig,
    #[serde(default = "default_axis_bc")]
    pub c: AxisConfig,
}

impl AxesConfig {
    pub fn get(&self, axis: Axis) -> &AxisConfig {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
            Axis::A => &self.a,
            Axis::B => &self.b,
            Axis::C => &self.c,
        }
    }

    pub fn get_mut(&mut self, axis: Axis) -> &mut AxisConfig {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
            Axis::A => &mut self.a,
            Axis::B => &mut self.b,
            Axis::C => &mut self.c,
        }
    }

    /// Axis configurations in index order.
    pub fn to_array(&self) -> [AxisConfig; AXES] {
        Axis::ALL.map(|axis| self.get(axis).clone())
    }
}

impl Default for AxesConfig {
    fn default() -> Self {
        Self {
            x: default_axis_xy(),
            y: default_axis_xy(),
            z: default_axis_z(),
            a: default_axis_a(),
            b: default_axis_bc(),
            c: default_axis_bc(),
        }
    }
}

/// When a motor is energized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    Disabled,
    AlwaysOn,
    #[default]
    DuringCycle,
    DuringMotion,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotorConfig {
    pub axis: Axis,
    /// Degrees per full step.
    #[serde(default = "default_step_angle")]
    pub step_angle: f64,
    /// Units of travel per motor revolution.
    #[serde(default = "default_travel_per_rev")]
    pub travel_per_rev: f64,
    #[serde(default = "default_microsteps")]
    pub microsteps: u32,
    /// Reverse the direction pin.
    #[serde(default)]
    pub polarity: bool,
    #[serde(default)]
    pub power_mode: PowerMode,
}

impl MotorConfig {
    pub fn new(axis: Axis, travel_per_rev: f64) -> Self {
        Self {
            axis,
            step_angle: default_step_angle(),
            travel_per_rev,
            microsteps: default_microsteps(),
            polarity: false,
            power_mode: PowerMode::default(),
        }
    }

    pub fn steps_per_unit(&self) -> f64 {
        360.0 / (self.step_angle / self.microsteps as f64) / self.travel_per_rev
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.planner;
        if p.buffers < MIN_PLANNER_BUFFERS {
            return Err(ConfigError::Invalid(format!(
                "planner.buffers must be at least {} (got {})",
                MIN_PLANNER_BUFFERS, p.buffers
            )));
        }
        if p.nominal_segment_usec <= 0.0 || p.min_segment_usec <= 0.0 {
            return Err(ConfigError::Invalid("segment times must be positive".into()));
        }
        if p.min_segment_usec > p.nominal_segment_usec {
            return Err(ConfigError::Invalid(
                "planner.min_segment_usec exceeds planner.nominal_segment_usec".into(),
            ));
        }
        if p.iteration_max == 0 || p.iteration_error <= 0.0 {
            return Err(ConfigError::Invalid("planner iteration limits must be positive".into()));
        }
        if p.headroom >= p.buffers {
            return Err(ConfigError::Invalid("planner.headroom must be below planner.buffers".into()));
        }
        if self.stepper.dda_frequency == 0 {
            return Err(ConfigError::Invalid("stepper.dda_frequency must be positive".into()));
        }
        let m = &self.machine;
        if m.junction_acceleration <= 0.0 || m.chordal_tolerance <= 0.0 {
            return Err(ConfigError::Invalid(
                "junction_acceleration and chordal_tolerance must be positive".into(),
            ));
        }
        if m.min_arc_segment_length <= 0.0 || m.min_arc_segment_length > m.max_arc_segment_length {
            return Err(ConfigError::Invalid("arc segment length bounds are inconsistent".into()));
        }
        if m.exact_path_factor <= 0.0 || m.exact_path_factor > 1.0 {
            return Err(ConfigError::Invalid("machine.exact_path_factor must be in (0, 1]".into()));
        }
        for axis in Axis::ALL {
            let a = self.axes.get(axis);
            if !a.axis_mode.is_enabled() {
                continue;
            }
            if a.velocity_max <= 0.0 || a.feedrate_max <= 0.0 || a.jerk_max <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "axis {} needs positive velocity_max, feedrate_max and jerk_max",
                    axis
                )));
            }
            if a.junction_deviation <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "axis {} junction_deviation must be positive",
                    axis
                )));
            }
            if a.axis_mode == AxisMode::Radius && (!axis.is_rotary() || a.radius <= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "radius mode on axis {} needs a rotary axis with positive radius",
                    axis
                )));
            }
        }
        if self.motors.len() > MOTORS {
            return Err(ConfigError::Invalid(format!(
                "at most {} motors are supported (got {})",
                MOTORS,
                self.motors.len()
            )));
        }
        for (i, motor) in self.motors.iter().enumerate() {
            if motor.step_angle <= 0.0 || motor.microsteps == 0 || motor.travel_per_rev <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "motor {} needs positive step_angle, microsteps and travel_per_rev",
                    i + 1
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match parse_config(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to load config '{}': {}", path, e);
                Err(e)
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}

fn default_junction_acceleration() -> f64 {
    100_000.0
}
fn default_chordal_tolerance() -> f64 {
    0.01
}
fn default_min_arc_segment_length() -> f64 {
    0.05
}
fn default_max_arc_segment_length() -> f64 {
    2.0
}
fn default_exact_path_factor() -> f64 {
    0.25
}
fn default_controller_interval() -> u32 {
    50
}
fn default_planner_buffers() -> usize {
    MIN_PLANNER_BUFFERS
}
fn default_nominal_segment_usec() -> f64 {
    5000.0
}
fn default_min_segment_usec() -> f64 {
    2500.0
}
fn default_min_move_length() -> f64 {
    0.0001
}
fn default_velocity_tolerance() -> f64 {
    2.0
}
fn default_iteration_max() -> u32 {
    20
}
fn default_iteration_error() -> f64 {
    0.001
}
fn default_headroom() -> usize {
    4
}
fn default_dda_frequency() -> u32 {
    50_000
}
fn default_motor_power_timeout() -> f64 {
    2.0
}
fn default_velocity_max() -> f64 {
    16_000.0
}
fn default_jerk_max() -> f64 {
    5.0e9
}
fn default_junction_deviation() -> f64 {
    0.05
}
fn default_travel_max() -> f64 {
    150.0
}
fn default_radius() -> f64 {
    10.0
}
fn default_step_angle() -> f64 {
    1.8
}
fn default_travel_per_rev() -> f64 {
    40.0
}
fn default_microsteps() -> u32 {
    8
}
fn default_axis_xy() -> AxisConfig {
    AxisConfig::linear(16_000.0, 5.0e9, 150.0)
}
fn default_axis_z() -> AxisConfig {
    AxisConfig::linear(1_200.0, 5.0e8, 75.0)
}
fn default_axis_a() -> AxisConfig {
    AxisConfig::rotary(AxisMode::Standard)
}
fn default_axis_bc() -> AxisConfig {
    AxisConfig::rotary(AxisMode::Disabled)
}
fn default_motors() -> Vec<MotorConfig> {
    vec![
        MotorConfig::new(Axis::X, 40.0),
        MotorConfig::new(Axis::Y, 40.0),
        MotorConfig::new(Axis::Z, 1.25),
        MotorConfig::new(Axis::A, 360.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.planner.buffers, 28);
        assert_eq!(config.motors.len(), 4);
        assert_eq!(config.axes.b.axis_mode, AxisMode::Disabled);
        assert!((config.motors[0].steps_per_unit() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.stepper.dda_frequency, 50_000);
        assert_eq!(config.axes.z.velocity_max, 1_200.0);
        assert_eq!(config.machine.arc_mode, ArcMode::Planned);
    }

    #[test]
    fn test_partial_axis_table_keeps_field_defaults() {
        let config = parse_config(
            r#"
[axes.x]
velocity_max = 2000.0
jerk_max = 1.0e6

[machine]
arc_mode = "runtime"

[gcode]
units = "inches"
coord_system = 2
"#,
        )
        .unwrap();
        assert_eq!(config.axes.x.velocity_max, 2000.0);
        assert_eq!(config.axes.x.jerk_max, 1.0e6);
        assert_eq!(config.axes.x.junction_deviation, 0.05);
        assert_eq!(config.axes.y.velocity_max, 16_000.0);
        assert_eq!(config.machine.arc_mode, ArcMode::Runtime);
        assert_eq!(config.gcode.units, UnitsMode::Inches);
        assert_eq!(config.gcode.coord_system.index(), 2);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("machine.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[planner]").unwrap();
        writeln!(file, "buffers = 32").unwrap();
        writeln!(file, "[[motors]]").unwrap();
        writeln!(file, "axis = \"x\"").unwrap();
        writeln!(file, "travel_per_rev = 5.0").unwrap();
        writeln!(file, "polarity = true").unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.planner.buffers, 32);
        assert_eq!(config.motors.len(), 1);
        assert!(config.motors[0].polarity);
        assert!((config.motors[0].steps_per_unit() - 320.0).abs() < 1e-9);
    }

    #[test]
    fn test_too_few_buffers_rejected() {
        let err = parse_config("[planner]\nbuffers = 8\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config("/nonexistent/krusty/machine.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = parse_config("[planner\nbuffers = ").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
