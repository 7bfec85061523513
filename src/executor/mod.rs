// src/executor/mod.rs - segment executor (the EXEC stage)
//! Pulls the head buffer off the planner queue and slices it into
//! constant-time segments for the step pipeline, one segment per call.
//! Runs at the priority of the EXEC interrupt: it only touches the running
//! buffer and the prep slot.

mod aline;
mod hold;
mod sync;

use krusty_mcu::StepPipeline;
use krusty_shared::gcode::GCodeState;
use krusty_shared::vector::{self, AxisVector};
use krusty_shared::{Config, Flow, StatusCode, MOTORS};

use crate::canonical::state::{CycleState, HoldState, MachineStatus};
use crate::kinematics::Kinematics;
use crate::planner::{ArcGeometry, Payload, Planner};

/// Where the runtime is within the current move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    New,
    Head1,
    Head2,
    Body,
    Tail1,
    Tail2,
    Finalize,
}

/// One emitted segment, kept when logging is enabled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentRecord {
    pub line: u32,
    pub phase: Phase,
    /// mm/min
    pub velocity: f64,
    /// minutes
    pub time: f64,
    /// Too short for a jerk-limited profile; velocity may step.
    pub forced: bool,
    /// Decelerating for a feedhold.
    pub hold: bool,
    pub position: AxisVector,
}

/// Everything the executor reaches outside its own state.
pub struct ExecContext<'a> {
    pub planner: &'a mut Planner,
    pub pipeline: &'a mut StepPipeline,
    pub kinematics: &'a Kinematics,
    pub status: &'a mut MachineStatus,
}

#[derive(Debug, Clone)]
pub struct Runtime {
    running: bool,
    phase: Phase,
    section_new: bool,
    gm: GCodeState,

    position: AxisVector,
    move_start: AxisVector,
    target: AxisVector,
    arc: Option<ArcGeometry>,
    length: f64,
    travelled: f64,
    section_end: f64,

    head_length: f64,
    body_length: f64,
    tail_length: f64,
    entry_velocity: f64,
    cruise_velocity: f64,
    exit_velocity: f64,
    jerk: f64,
    force_fit: bool,

    segments: u32,
    segment_count: u32,
    segment_time: f64,
    segment_velocity: f64,
    section_jerk: f64,
    midpoint_velocity: f64,
    midpoint_acceleration: f64,
    elapsed: f64,

    steps: [i64; MOTORS],

    /// Feedhold deceleration reaches zero inside the current move.
    hold_stops_in_move: bool,
    /// Velocity a feedhold deceleration carries into the next move.
    hold_carry: Option<f64>,

    coolant_mist: bool,
    coolant_flood: bool,

    nominal_segment_time: f64,
    min_segment_time: f64,
    segment_log: Option<Vec<SegmentRecord>>,
}

impl Runtime {
    pub fn new(config: &Config) -> Self {
        Self {
            running: false,
            phase: Phase::New,
            section_new: true,
            gm: GCodeState::default(),
            position: vector::zero(),
            move_start: vector::zero(),
            target: vector::zero(),
            arc: None,
            length: 0.0,
            travelled: 0.0,
            section_end: 0.0,
            head_length: 0.0,
            body_length: 0.0,
            tail_length: 0.0,
            entry_velocity: 0.0,
            cruise_velocity: 0.0,
            exit_velocity: 0.0,
            jerk: 0.0,
            force_fit: false,
            segments: 0,
            segment_count: 0,
            segment_time: 0.0,
            segment_velocity: 0.0,
            section_jerk: 0.0,
            midpoint_velocity: 0.0,
            midpoint_acceleration: 0.0,
            elapsed: 0.0,
            steps: [0; MOTORS],
            hold_stops_in_move: false,
            hold_carry: None,
            coolant_mist: false,
            coolant_flood: false,
            nominal_segment_time: config.planner.nominal_segment_time(),
            min_segment_time: config.planner.min_segment_time(),
            segment_log: None,
        }
    }

    // ---- queries ------------------------------------------------------

    /// Absolute machine position of the last emitted segment.
    pub fn position(&self) -> &AxisVector {
        &self.position
    }

    /// Position in the work coordinates active when the move was queued.
    pub fn work_position(&self) -> AxisVector {
        let mut work = self.position;
        for (w, offset) in work.iter_mut().zip(self.gm.work_offset.iter()) {
            *w -= offset;
        }
        work
    }

    pub fn velocity(&self) -> f64 {
        if self.running { self.segment_velocity } else { 0.0 }
    }

    pub fn gm(&self) -> &GCodeState {
        &self.gm
    }

    pub fn line_number(&self) -> u32 {
        self.gm.line_number
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn coolant(&self) -> (bool, bool) {
        (self.coolant_mist, self.coolant_flood)
    }

    pub fn steps(&self) -> &[i64; MOTORS] {
        &self.steps
    }

    pub fn enable_segment_log(&mut self) {
        self.segment_log.get_or_insert_with(Vec::new);
    }

    pub fn segment_log(&self) -> &[SegmentRecord] {
        self.segment_log.as_deref().unwrap_or(&[])
    }

    pub fn take_segment_log(&mut self) -> Vec<SegmentRecord> {
        self.segment_log.as_mut().map(std::mem::take).unwrap_or_default()
    }

    // ---- control ------------------------------------------------------

    /// Snap the runtime to `position` with nothing in progress (flush,
    /// alarm recovery).
    pub fn reset(&mut self, position: &AxisVector, kinematics: &Kinematics) {
        self.running = false;
        self.phase = Phase::New;
        self.section_new = true;
        self.segment_velocity = 0.0;
        self.hold_carry = None;
        self.hold_stops_in_move = false;
        self.position = *position;
        self.steps = kinematics.steps(position, &self.steps);
    }

    pub fn set_work_offset(&mut self, gm: &GCodeState) {
        self.gm.coord_system = gm.coord_system;
        self.gm.work_offset = gm.work_offset;
    }

    /// Run the head of the queue for one segment (or one non-motion
    /// buffer). `Noop` when there is nothing to do.
    pub fn exec_move(&mut self, cx: &mut ExecContext) -> Result<Flow, StatusCode> {
        let Some(index) = cx.planner.pool_mut().get_run_buffer() else {
            return Ok(Flow::Noop);
        };
        if cx.status.is_alarmed() {
            return Ok(Flow::Noop);
        }
        if cx.status.cycle_state == CycleState::Off {
            cx.status.cycle_start();
        }
        let payload = cx.planner.pool().get(index).payload.clone();
        if !payload.is_motion() {
            // non-motion buffers wait out a feedhold
            match cx.status.hold_state {
                HoldState::Hold => return Ok(Flow::Noop),
                HoldState::Decel => {
                    self.hold_carry = None;
                    self.reach_hold(cx);
                    return Ok(Flow::Noop);
                }
                _ => {}
            }
        }
        match payload {
            Payload::Line | Payload::Arc(_) => self.exec_aline(index, cx),
            Payload::Dwell { seconds } => {
                cx.pipeline.prep_dwell(seconds)?;
                self.retire(cx);
                Ok(Flow::Ok)
            }
            Payload::Sync(op) => {
                self.apply_sync(&op, cx);
                cx.pipeline.prep_null()?;
                self.retire(cx);
                Ok(Flow::Ok)
            }
            Payload::Null => {
                cx.pipeline.prep_null()?;
                self.retire(cx);
                Ok(Flow::Ok)
            }
        }
    }

    /// Free the running buffer. Its successor becomes the head of the queue
    /// and keeps the entry it was planned with.
    fn retire(&mut self, cx: &mut ExecContext) {
        let pool = cx.planner.pool_mut();
        if pool.free_run_buffer() {
            cx.status.cycle_end();
        }
    }
}
