// src/canonical/mod.rs - canonical machining functions
//! The canonical machine owns the model G-code state: units, planes,
//! coordinate systems and offsets. Blocks are resolved here into absolute
//! machine targets and handed to the planner. Changes the runtime must see
//! in order with motion are queued as sync commands.

pub mod arc;
pub mod offsets;
pub mod state;

use std::f64::consts::PI;

use krusty_shared::config::{AxisConfig, GCodeDefaults, MachineConfig};
use krusty_shared::gcode::{
    CoordSystem, DistanceMode, FeedRateMode, GCodeState, MotionMode, PathControl, Plane,
    SpindleState, UnitsMode,
};
use krusty_shared::vector::{self, AxisVector};
use krusty_shared::{Axis, AxisMode, Config, Flow, StatusCode, AXES};
use krusty_shared::config::ArcMode;

use crate::planner::{Coolant, Planner, SyncOp};

use arc::{chord_count, compute_arc, ArcRun, ArcWords};
use offsets::Offsets;
use state::{MachineState, MachineStatus};

/// Axis words present in a block.
pub type AxisFlags = [bool; AXES];

#[derive(Debug, Clone)]
pub struct CanonicalMachine {
    gm: GCodeState,
    /// Model position: end of the last accepted move, machine coordinates.
    position: AxisVector,
    offsets: Offsets,
    pub status: MachineStatus,
    axes: [AxisConfig; AXES],
    machine: MachineConfig,
    defaults: GCodeDefaults,
    g28_position: AxisVector,
    g30_position: AxisVector,
    /// Tool named by the last T word, loaded by M6.
    pending_tool: u8,
    arc_run: Option<ArcRun>,
    min_chord_time: f64,
}

impl CanonicalMachine {
    pub fn new(config: &Config) -> Self {
        let mut cm = Self {
            gm: GCodeState::default(),
            position: vector::zero(),
            offsets: Offsets::default(),
            status: MachineStatus::default(),
            axes: config.axes.to_array(),
            machine: config.machine.clone(),
            defaults: config.gcode.clone(),
            g28_position: vector::zero(),
            g30_position: vector::zero(),
            pending_tool: 0,
            arc_run: None,
            min_chord_time: config.planner.nominal_segment_time(),
        };
        cm.apply_defaults();
        cm.status.machine_state = MachineState::Ready;
        cm
    }

    fn apply_defaults(&mut self) {
        self.gm.coord_system = self.defaults.coord_system;
        self.gm.plane = self.defaults.plane;
        self.gm.units_mode = self.defaults.units;
        self.gm.distance_mode = self.defaults.distance_mode;
        self.gm.path_control = self.defaults.path_control;
        self.gm.feed_rate_mode = FeedRateMode::UnitsPerMinute;
        self.gm.motion_mode = MotionMode::CancelMotionMode;
    }

    // ---- queries ------------------------------------------------------

    pub fn gm(&self) -> &GCodeState {
        &self.gm
    }

    pub fn position(&self) -> &AxisVector {
        &self.position
    }

    pub fn offsets(&self) -> &Offsets {
        &self.offsets
    }

    /// Active work offset for the model state.
    pub fn work_offset(&self) -> AxisVector {
        self.offsets.active(self.gm.coord_system, self.gm.absolute_override)
    }

    /// Model position in work coordinates and current units.
    pub fn work_position(&self) -> AxisVector {
        let offset = self.work_offset();
        std::array::from_fn(|axis| {
            let value = self.position[axis] - offset[axis];
            if Self::is_linear(axis) {
                self.gm.units_mode.from_millimeters(value)
            } else {
                value
            }
        })
    }

    pub fn g28_position(&self) -> &AxisVector {
        &self.g28_position
    }

    pub fn g30_position(&self) -> &AxisVector {
        &self.g30_position
    }

    pub fn is_arc_running(&self) -> bool {
        self.arc_run.is_some()
    }

    fn is_linear(axis: usize) -> bool {
        Axis::from_index(axis).is_some_and(|a| !a.is_rotary())
    }

    fn check_alarm(&self) -> Result<(), StatusCode> {
        match self.status.machine_state {
            MachineState::Panic => Err(StatusCode::MachineLocked),
            MachineState::Alarm => Err(StatusCode::MachineAlarmed),
            _ => Ok(()),
        }
    }

    // ---- model setters ------------------------------------------------

    pub fn set_line_number(&mut self, line: u32) {
        self.gm.line_number = line;
    }

    pub fn set_units_mode(&mut self, units: UnitsMode) {
        self.gm.units_mode = units;
    }

    pub fn set_plane(&mut self, plane: Plane) {
        self.gm.plane = plane;
    }

    pub fn set_distance_mode(&mut self, mode: DistanceMode) {
        self.gm.distance_mode = mode;
    }

    /// Changing between G93 and G94 drops the feed rate; the old value is
    /// in the wrong units for the new mode.
    pub fn set_feed_rate_mode(&mut self, mode: FeedRateMode) {
        if self.gm.feed_rate_mode != mode {
            self.gm.feed_rate = 0.0;
        }
        self.gm.feed_rate_mode = mode;
    }

    pub fn set_path_control(&mut self, mode: PathControl) {
        self.gm.path_control = mode;
    }

    pub fn set_motion_mode(&mut self, mode: MotionMode) {
        self.gm.motion_mode = mode;
    }

    /// G53 applies to the current block only.
    pub fn set_absolute_override(&mut self, enabled: bool) {
        self.gm.absolute_override = enabled;
    }

    /// F word. Inverse-time feeds are stored as minutes per move.
    pub fn set_feed_rate(&mut self, value: f64) {
        self.gm.feed_rate = match self.gm.feed_rate_mode {
            FeedRateMode::InverseTime if value > 0.0 => 1.0 / value,
            FeedRateMode::InverseTime => 0.0,
            FeedRateMode::UnitsPerMinute => self.gm.units_mode.to_millimeters(value),
        };
    }

    pub fn set_spindle_speed(&mut self, speed: f64) {
        self.gm.spindle_speed = speed;
    }

    pub fn select_tool(&mut self, tool: u8) {
        self.pending_tool = tool;
    }

    // ---- targets and move times ---------------------------------------

    fn to_canonical(&self, axis: usize, value: f64) -> f64 {
        let config = &self.axes[axis];
        if config.axis_mode == AxisMode::Radius {
            let linear = self.gm.units_mode.to_millimeters(value);
            return linear * 360.0 / (2.0 * PI * config.radius);
        }
        if Self::is_linear(axis) {
            self.gm.units_mode.to_millimeters(value)
        } else {
            value
        }
    }

    /// Absolute machine target for the block's axis words. Missing or
    /// disabled axes stay where they are.
    pub fn model_target(&self, values: &AxisVector, flags: &AxisFlags) -> AxisVector {
        let mut target = self.position;
        for axis in 0..AXES {
            if !flags[axis] || !self.axes[axis].axis_mode.is_enabled() {
                continue;
            }
            let value = self.to_canonical(axis, values[axis]);
            target[axis] = match self.gm.distance_mode {
                DistanceMode::Absolute => {
                    self.offsets.active_axis(self.gm.coord_system, self.gm.absolute_override, axis)
                        + value
                }
                DistanceMode::Incremental => self.position[axis] + value,
            };
        }
        target
    }

    fn check_soft_limits(&mut self, target: &AxisVector) -> Result<(), StatusCode> {
        if !self.machine.soft_limit_enable {
            return Ok(());
        }
        for (axis, config) in self.axes.iter().enumerate() {
            if !config.axis_mode.is_enabled() || !config.has_travel_limits() {
                continue;
            }
            if target[axis] < config.travel_min || target[axis] > config.travel_max {
                tracing::warn!(
                    "Soft limit on {} at {:.3} (line {})",
                    Axis::ALL[axis], target[axis], self.gm.line_number
                );
                if self.status.cycle_state == state::CycleState::Machining {
                    self.alarm(StatusCode::SoftLimitExceeded);
                }
                return Err(StatusCode::SoftLimitExceeded);
            }
        }
        Ok(())
    }

    /// Optimal and minimum move time: the requested feed time or the
    /// slowest axis at its limit, whichever is longer.
    fn calc_move_times(&self, gm: &mut GCodeState, traverse: bool) {
        let mut move_time: f64 = 0.0;
        if !traverse {
            if gm.feed_rate_mode == FeedRateMode::InverseTime {
                move_time = gm.feed_rate;
            } else {
                let delta = |axes: std::ops::Range<usize>| {
                    axes.map(|a| (gm.target[a] - self.position[a]).powi(2)).sum::<f64>().sqrt()
                };
                let xyz = delta(0..3) / gm.feed_rate;
                move_time = if xyz > 0.0 { xyz } else { delta(3..AXES) / gm.feed_rate };
            }
        }
        let mut min_time = f64::MAX;
        for (axis, config) in self.axes.iter().enumerate() {
            if !config.axis_mode.is_enabled() {
                continue;
            }
            let limit = if traverse { config.velocity_max } else { config.feedrate_max };
            let time = (gm.target[axis] - self.position[axis]).abs() / limit;
            move_time = move_time.max(time);
            if time > 0.0 {
                min_time = min_time.min(time);
            }
        }
        gm.move_time = move_time;
        gm.minimum_time = if min_time == f64::MAX { move_time } else { min_time };
    }

    fn check_feed_rate(&self) -> Result<(), StatusCode> {
        if self.gm.feed_rate <= 0.0 {
            return Err(StatusCode::GcodeFeedrateError);
        }
        Ok(())
    }

    // ---- motion -------------------------------------------------------

    /// G0
    pub fn straight_traverse(
        &mut self,
        planner: &mut Planner,
        values: &AxisVector,
        flags: &AxisFlags,
    ) -> Result<(), StatusCode> {
        self.check_alarm()?;
        self.gm.motion_mode = MotionMode::StraightTraverse;
        let target = self.model_target(values, flags);
        self.line_to(planner, target, true)
    }

    /// G1
    pub fn straight_feed(
        &mut self,
        planner: &mut Planner,
        values: &AxisVector,
        flags: &AxisFlags,
    ) -> Result<(), StatusCode> {
        self.check_alarm()?;
        self.gm.motion_mode = MotionMode::StraightFeed;
        self.check_feed_rate()?;
        let target = self.model_target(values, flags);
        self.line_to(planner, target, false)?;
        self.consume_inverse_time_feed();
        Ok(())
    }

    /// An inverse-time F applies to one move only.
    fn consume_inverse_time_feed(&mut self) {
        if self.gm.feed_rate_mode == FeedRateMode::InverseTime {
            self.gm.feed_rate = 0.0;
        }
    }

    fn line_to(&mut self, planner: &mut Planner, target: AxisVector, traverse: bool) -> Result<(), StatusCode> {
        self.check_soft_limits(&target)?;
        if vector::equal(&target, &self.position) {
            return Ok(());
        }
        let mut gm = self.gm.clone();
        gm.target = target;
        gm.work_offset = self.work_offset();
        self.calc_move_times(&mut gm, traverse);
        let queued = self.accept(planner.aline(&gm))?;
        self.position = target;
        self.gm.target = target;
        if queued {
            self.status.cycle_start();
        }
        Ok(())
    }

    /// Short moves are dropped but the model advances; the planner position
    /// does not, so the next move picks up the residual.
    fn accept(&self, result: Result<(), StatusCode>) -> Result<bool, StatusCode> {
        match result {
            Ok(()) => Ok(true),
            Err(StatusCode::MinimumLengthMove) => {
                tracing::debug!("Line {} below minimum length, carried", self.gm.line_number);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// G2/G3. `words` are in program units.
    pub fn arc_feed(
        &mut self,
        planner: &mut Planner,
        values: &AxisVector,
        flags: &AxisFlags,
        words: &ArcWords,
    ) -> Result<(), StatusCode> {
        self.check_alarm()?;
        self.gm.motion_mode = if words.clockwise { MotionMode::CwArc } else { MotionMode::CcwArc };
        self.check_feed_rate()?;
        let units = self.gm.units_mode;
        let words = ArcWords {
            offsets: words.offsets.map(|o| units.to_millimeters(o)),
            offset_flags: words.offset_flags,
            radius: words.radius.map(|r| units.to_millimeters(r)),
            clockwise: words.clockwise,
        };
        let target = self.model_target(values, flags);
        self.check_soft_limits(&target)?;
        let geometry = compute_arc(self.gm.plane, &self.position, &target, &words)?;
        let length = geometry.length(&target);

        let mut gm = self.gm.clone();
        gm.target = target;
        gm.work_offset = self.work_offset();
        gm.move_time = self.arc_time(&gm, length, geometry.angular_travel * geometry.radius);
        gm.minimum_time = gm.move_time;

        match self.machine.arc_mode {
            ArcMode::Runtime => {
                self.accept(planner.arc(&gm, geometry))?;
            }
            ArcMode::Planned => {
                let segments = chord_count(
                    length,
                    geometry.radius,
                    gm.move_time,
                    self.machine.chordal_tolerance,
                    (self.machine.min_arc_segment_length, self.machine.max_arc_segment_length),
                    self.min_chord_time,
                );
                tracing::debug!(
                    "Arc r={:.3} travel={:.4}rad in {} chords (line {})",
                    geometry.radius, geometry.angular_travel, segments, gm.line_number
                );
                self.arc_run = Some(ArcRun::new(geometry, gm, segments));
                self.arc_callback(planner)?;
            }
        }
        self.position = target;
        self.gm.target = target;
        self.consume_inverse_time_feed();
        self.status.cycle_start();
        Ok(())
    }

    fn arc_time(&self, gm: &GCodeState, length: f64, planar: f64) -> f64 {
        let mut time = match gm.feed_rate_mode {
            FeedRateMode::InverseTime => gm.feed_rate,
            FeedRateMode::UnitsPerMinute => length / gm.feed_rate,
        };
        let (a0, a1, linear) = gm.plane.axes();
        let linear_travel = (gm.target[linear] - self.position[linear]).abs();
        time = time.max(linear_travel / self.axes[linear].feedrate_max);
        let planar_limit = self.axes[a0].feedrate_max.min(self.axes[a1].feedrate_max);
        time.max(planar.abs() / planar_limit)
    }

    /// Continue a planned arc: queue chords while the planner has room.
    /// `Eagain` until the last chord is queued.
    pub fn arc_callback(&mut self, planner: &mut Planner) -> Result<Flow, StatusCode> {
        let Some(mut run) = self.arc_run.take() else {
            return Ok(Flow::Noop);
        };
        while planner.has_headroom() {
            let Some(gm) = run.next_chord() else {
                break;
            };
            self.accept(planner.aline(&gm))?;
        }
        if run.is_done() {
            return Ok(Flow::Ok);
        }
        self.arc_run = Some(run);
        Ok(Flow::Eagain)
    }

    /// G4, in seconds.
    pub fn dwell(&mut self, planner: &mut Planner, seconds: f64) -> Result<(), StatusCode> {
        self.check_alarm()?;
        planner.dwell(&self.gm, seconds)?;
        self.status.cycle_start();
        Ok(())
    }

    /// G28.1 / G30.1
    pub fn set_g28_position(&mut self) {
        self.g28_position = self.position;
    }

    pub fn set_g30_position(&mut self) {
        self.g30_position = self.position;
    }

    /// G28: traverse through the optional intermediate point (machine
    /// coordinates) to the stored position.
    pub fn goto_g28_position(
        &mut self,
        planner: &mut Planner,
        values: &AxisVector,
        flags: &AxisFlags,
    ) -> Result<(), StatusCode> {
        let stored = self.g28_position;
        self.goto_stored_position(planner, values, flags, stored)
    }

    /// G30
    pub fn goto_g30_position(
        &mut self,
        planner: &mut Planner,
        values: &AxisVector,
        flags: &AxisFlags,
    ) -> Result<(), StatusCode> {
        let stored = self.g30_position;
        self.goto_stored_position(planner, values, flags, stored)
    }

    fn goto_stored_position(
        &mut self,
        planner: &mut Planner,
        values: &AxisVector,
        flags: &AxisFlags,
        stored: AxisVector,
    ) -> Result<(), StatusCode> {
        self.check_alarm()?;
        self.gm.motion_mode = MotionMode::StraightTraverse;
        let absolute_override = self.gm.absolute_override;
        self.gm.absolute_override = true;
        let result = (|| {
            if flags.iter().any(|f| *f) {
                let intermediate = self.model_target(values, flags);
                self.line_to(planner, intermediate, true)?;
            }
            self.line_to(planner, stored, true)
        })();
        self.gm.absolute_override = absolute_override;
        result
    }

    /// G28.3: redefine the machine position of the named axes.
    pub fn set_absolute_origin(
        &mut self,
        planner: &mut Planner,
        values: &AxisVector,
        flags: &AxisFlags,
    ) -> Result<(), StatusCode> {
        self.check_alarm()?;
        let mut position = self.position;
        for axis in 0..AXES {
            if flags[axis] && self.axes[axis].axis_mode.is_enabled() {
                position[axis] = self.to_canonical(axis, values[axis]);
                planner.set_axis_position(axis, position[axis]);
            }
        }
        self.position = position;
        self.gm.target = position;
        planner.queue_command(&self.gm, SyncOp::SetAbsolutePosition { position, flags: *flags })
    }

    // ---- offsets ------------------------------------------------------

    fn queue_work_offset(&mut self, planner: &mut Planner) -> Result<(), StatusCode> {
        let op = SyncOp::SetWorkOffset {
            coord: self.gm.coord_system,
            offset: self.offsets.active(self.gm.coord_system, false),
        };
        planner.queue_command(&self.gm, op)
    }

    /// G54..G59
    pub fn set_coord_system(&mut self, planner: &mut Planner, coord: CoordSystem) -> Result<(), StatusCode> {
        self.gm.coord_system = coord;
        self.queue_work_offset(planner)
    }

    /// G10 L2 P`coord`: offsets are given in program units.
    pub fn set_coord_offsets(
        &mut self,
        planner: &mut Planner,
        coord: CoordSystem,
        values: &AxisVector,
        flags: &AxisFlags,
    ) -> Result<(), StatusCode> {
        if coord == CoordSystem::MACHINE {
            return Err(StatusCode::ValueOutOfRange);
        }
        for axis in 0..AXES {
            if flags[axis] {
                let value = self.to_canonical(axis, values[axis]);
                self.offsets.set_coord(coord, axis, value);
            }
        }
        if coord == self.gm.coord_system {
            self.queue_work_offset(planner)?;
        }
        Ok(())
    }

    /// G92: the current position becomes `values` in work coordinates.
    pub fn set_origin_offsets(
        &mut self,
        planner: &mut Planner,
        values: &AxisVector,
        flags: &AxisFlags,
    ) -> Result<(), StatusCode> {
        let coord = *self.offsets.coord(self.gm.coord_system);
        for axis in 0..AXES {
            if flags[axis] {
                let value = self.to_canonical(axis, values[axis]);
                self.offsets.set_origin(axis, self.position[axis] - coord[axis] - value);
            }
        }
        self.queue_work_offset(planner)
    }

    /// G92.1
    pub fn reset_origin_offsets(&mut self, planner: &mut Planner) -> Result<(), StatusCode> {
        self.offsets.reset_origin();
        self.queue_work_offset(planner)
    }

    /// G92.2
    pub fn suspend_origin_offsets(&mut self, planner: &mut Planner) -> Result<(), StatusCode> {
        self.offsets.suspend_origin();
        self.queue_work_offset(planner)
    }

    /// G92.3
    pub fn resume_origin_offsets(&mut self, planner: &mut Planner) -> Result<(), StatusCode> {
        self.offsets.resume_origin();
        self.queue_work_offset(planner)
    }

    // ---- peripherals --------------------------------------------------

    /// M3, M4, M5
    pub fn spindle_control(&mut self, planner: &mut Planner, state: SpindleState) -> Result<(), StatusCode> {
        self.gm.spindle = state;
        let speed = if state == SpindleState::Off { 0.0 } else { self.gm.spindle_speed };
        planner.queue_command(&self.gm, SyncOp::Spindle { state, speed })
    }

    /// M7 (mist) and M8 (flood)
    pub fn coolant_control(&mut self, planner: &mut Planner, coolant: Coolant, on: bool) -> Result<(), StatusCode> {
        planner.queue_command(&self.gm, SyncOp::Coolant { coolant, on })
    }

    /// M9
    pub fn coolant_off(&mut self, planner: &mut Planner) -> Result<(), StatusCode> {
        planner.queue_command(&self.gm, SyncOp::CoolantOff)
    }

    /// M6
    pub fn change_tool(&mut self, planner: &mut Planner) -> Result<(), StatusCode> {
        self.gm.tool = self.pending_tool;
        planner.queue_command(&self.gm, SyncOp::ToolChange(self.pending_tool))
    }

    // ---- program flow -------------------------------------------------

    /// M0
    pub fn program_stop(&mut self, planner: &mut Planner) -> Result<(), StatusCode> {
        planner.queue_command(&self.gm, SyncOp::ProgramStop)
    }

    /// M1
    pub fn optional_program_stop(&mut self, planner: &mut Planner) -> Result<(), StatusCode> {
        planner.queue_command(&self.gm, SyncOp::OptionalStop)
    }

    /// M2, M30: restore modal defaults, stop the spindle and coolant.
    pub fn program_end(&mut self, planner: &mut Planner) -> Result<(), StatusCode> {
        self.offsets.reset_origin();
        self.apply_defaults();
        self.gm.spindle = SpindleState::Off;
        self.gm.spindle_speed = 0.0;
        self.gm.feed_rate = 0.0;
        self.queue_work_offset(planner)?;
        planner.queue_command(&self.gm, SyncOp::ProgramEnd)
    }

    // ---- alarms and resync --------------------------------------------

    /// Stop accepting motion until cleared. The owner flushes the queue and
    /// halts the steppers.
    pub fn alarm(&mut self, code: StatusCode) {
        if self.status.machine_state == MachineState::Panic {
            return;
        }
        tracing::error!("Alarm: {} (line {})", code, self.gm.line_number);
        self.status.machine_state = MachineState::Alarm;
        self.arc_run = None;
        self.status.request_status_report();
    }

    /// Internal invariant broken: only a reset recovers.
    pub fn panic(&mut self, code: StatusCode) {
        tracing::error!("Panic: {} (line {})", code, self.gm.line_number);
        self.status.machine_state = MachineState::Panic;
        self.arc_run = None;
        self.status.request_status_report();
    }

    /// `$clear`
    pub fn clear_alarm(&mut self) -> Result<(), StatusCode> {
        match self.status.machine_state {
            MachineState::Panic => Err(StatusCode::MachineLocked),
            MachineState::Alarm => {
                self.status.machine_state = MachineState::Ready;
                self.status.cycle_state = state::CycleState::Off;
                self.status.motion_state = state::MotionState::Stop;
                self.status.hold_state = state::HoldState::Off;
                self.status.request_status_report();
                tracing::info!("Alarm cleared");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// After a flush the runtime position is the truth.
    pub fn sync_to_runtime(&mut self, planner: &mut Planner, position: &AxisVector) {
        self.position = *position;
        self.gm.target = *position;
        self.arc_run = None;
        planner.set_position(position);
    }
}
