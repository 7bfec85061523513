// src/executor/aline.rs - jerk-limited move execution
use krusty_shared::vector::{self, AxisVector};
use krusty_shared::{Flow, StatusCode, MOTORS};

use super::{ExecContext, Phase, Runtime, SegmentRecord};
use crate::canonical::state::{HoldState, MotionState};
use crate::planner::{MoveState, Payload, ZoidCase};

impl Runtime {
    pub(super) fn exec_aline(&mut self, index: usize, cx: &mut ExecContext) -> Result<Flow, StatusCode> {
        if !self.running {
            if cx.status.hold_state == HoldState::Hold {
                return Ok(Flow::Noop);
            }
            self.start_move(index, cx);
            if cx.status.hold_state == HoldState::Decel {
                self.continue_hold(index, cx);
            }
            if cx.status.motion_state == MotionState::Stop {
                cx.status.motion_state = MotionState::Run;
            }
        }

        let flow = self.exec_section(cx)?;

        // a feedhold waits for a segment boundary before planning
        if cx.status.hold_state == HoldState::Sync {
            cx.status.hold_state = HoldState::Plan;
        }
        if flow == Flow::Eagain {
            return Ok(Flow::Eagain);
        }

        self.running = false;
        self.phase = Phase::New;
        if cx.status.hold_state == HoldState::Decel {
            if self.hold_stops_in_move {
                self.enter_hold(index, cx);
                return Ok(Flow::Ok);
            }
            self.hold_carry = Some(self.exit_velocity);
        }
        self.retire(cx);
        Ok(Flow::Ok)
    }

    fn start_move(&mut self, index: usize, cx: &mut ExecContext) {
        let bf = cx.planner.pool_mut().get_mut(index);
        bf.move_state = MoveState::Run;

        self.gm = bf.gm.clone();
        self.move_start = self.position;
        self.target = bf.gm.target;
        self.arc = match &bf.payload {
            Payload::Arc(arc) => Some(arc.clone()),
            _ => None,
        };
        self.length = bf.length;
        self.travelled = 0.0;
        self.head_length = bf.head_length;
        self.body_length = bf.body_length;
        self.tail_length = bf.tail_length;
        self.entry_velocity = bf.entry_velocity;
        self.cruise_velocity = bf.cruise_velocity;
        self.exit_velocity = bf.exit_velocity;
        self.jerk = bf.jerk;
        self.force_fit = bf.zoid == ZoidCase::ForceFit;
        self.hold_stops_in_move = false;
        self.phase = Phase::Head1;
        self.section_new = true;
        self.running = true;

        let planned_start = match &self.arc {
            Some(arc) => arc.start,
            None => vector::offset_along(&self.target, &bf.unit, -bf.length),
        };
        let mismatch = vector::length(&planned_start, &self.position);
        if mismatch > 0.001 {
            tracing::warn!(
                "Runtime position is {:.4}mm from the start of line {}",
                mismatch, self.gm.line_number
            );
        }
    }

    /// Run sections until one emits a segment. `Ok` once the move is done.
    fn exec_section(&mut self, cx: &mut ExecContext) -> Result<Flow, StatusCode> {
        loop {
            let flow = match self.phase {
                Phase::New | Phase::Head1 | Phase::Head2 => self.exec_ramp(cx, false)?,
                Phase::Body => self.exec_body(cx)?,
                Phase::Tail1 | Phase::Tail2 => self.exec_ramp(cx, true)?,
                Phase::Finalize => return self.exec_finalize(cx),
            };
            if flow == Flow::Eagain {
                return Ok(Flow::Eagain);
            }
        }
    }

    /// Head (accelerating) or tail (decelerating). Each is two halves of
    /// constant jerk meeting at the midpoint velocity with peak acceleration.
    /// Returns `Noop` when the section is skipped.
    fn exec_ramp(&mut self, cx: &mut ExecContext, tail: bool) -> Result<Flow, StatusCode> {
        let (first, second, next) = if tail {
            (Phase::Tail1, Phase::Tail2, Phase::Finalize)
        } else {
            (Phase::Head1, Phase::Head2, Phase::Body)
        };
        if self.phase == Phase::New {
            self.phase = first;
        }
        if tail && self.section_new && self.phase == first && self.lock_exit(cx) {
            return Ok(Flow::Noop);
        }
        if self.section_new && self.phase == first {
            let (v0, v1, length) = if tail {
                (self.cruise_velocity, self.exit_velocity, self.tail_length)
            } else {
                (self.entry_velocity, self.cruise_velocity, self.head_length)
            };
            let average = (v0 + v1) / 2.0;
            if length <= 0.0 || average <= 0.0 {
                self.travelled += length.max(0.0);
                self.phase = next;
                return Ok(Flow::Noop);
            }
            let time = length / average;
            self.segments = ((time / (2.0 * self.nominal_segment_time)).ceil() as u32).max(1);
            self.segment_time = time / (2 * self.segments) as f64;
            self.section_jerk = 4.0 * (v1 - v0).abs() / (time * time);
            self.midpoint_velocity = average;
            self.midpoint_acceleration = self.section_jerk * time / 2.0;
            self.section_end = self.travelled + length;
            self.segment_count = self.segments;
            self.elapsed = self.segment_time / 2.0;
            self.section_new = false;
        }
        let sign = if tail { -1.0 } else { 1.0 };
        let (v0, jerk, elapsed) = (
            if tail { self.cruise_velocity } else { self.entry_velocity },
            self.section_jerk,
            self.elapsed,
        );
        if self.phase == first {
            self.segment_velocity = v0 + sign * jerk / 2.0 * elapsed * elapsed;
            let done = self.exec_segment(cx, false)?;
            self.elapsed += self.segment_time;
            if done {
                self.phase = second;
                self.segment_count = self.segments;
                self.elapsed = self.segment_time / 2.0;
            }
            return Ok(Flow::Eagain);
        }
        self.segment_velocity = self.midpoint_velocity
            + sign * (self.midpoint_acceleration * elapsed - jerk / 2.0 * elapsed * elapsed);
        let done = self.exec_segment(cx, true)?;
        self.elapsed += self.segment_time;
        if done {
            self.phase = next;
            self.section_new = true;
        }
        Ok(Flow::Eagain)
    }

    fn exec_body(&mut self, cx: &mut ExecContext) -> Result<Flow, StatusCode> {
        if self.section_new {
            if self.body_length <= 0.0 || self.cruise_velocity <= 0.0 {
                self.travelled += self.body_length.max(0.0);
                self.phase = Phase::Tail1;
                return Ok(Flow::Noop);
            }
            let time = self.body_length / self.cruise_velocity;
            self.segments = ((time / self.nominal_segment_time).ceil() as u32).max(1);
            self.segment_time = time / self.segments as f64;
            self.segment_velocity = self.cruise_velocity;
            self.section_end = self.travelled + self.body_length;
            self.segment_count = self.segments;
            self.section_new = false;
        }
        if self.exec_segment(cx, true)? {
            self.phase = Phase::Tail1;
            self.section_new = true;
        }
        Ok(Flow::Eagain)
    }

    /// The planner may raise the exit of the running move until its tail
    /// begins. Take the latest exit and freeze the buffer. Returns true when
    /// the shorter tail leaves more body to run first.
    fn lock_exit(&mut self, cx: &mut ExecContext) -> bool {
        if cx.status.hold_state != HoldState::Off {
            return false;
        }
        let Some(index) = cx.planner.pool().run_index() else {
            return false;
        };
        let bf = cx.planner.pool_mut().get_mut(index);
        bf.replannable = false;
        if self.force_fit || bf.exit_velocity <= self.exit_velocity {
            return false;
        }
        self.exit_velocity = bf.exit_velocity;
        self.tail_length = bf.tail_length;
        let extra = self.length - self.travelled - self.tail_length;
        if extra <= vector::EPSILON {
            return false;
        }
        tracing::trace!(
            "Line {} exits at {:.1}mm/min after {:.3}mm more body",
            self.gm.line_number, self.exit_velocity, extra
        );
        self.body_length = extra;
        self.phase = Phase::Body;
        true
    }

    /// The last section snapped to the target; confirm the motors agree.
    fn exec_finalize(&mut self, cx: &mut ExecContext) -> Result<Flow, StatusCode> {
        self.section_new = true;
        if self.hold_stops_in_move || self.travelled < self.length - vector::EPSILON {
            return Ok(Flow::Ok);
        }
        let expected = cx.kinematics.steps(&self.target, &self.steps);
        if expected != self.steps {
            tracing::warn!("Line {} finished off target; reconciling", self.gm.line_number);
            self.segment_velocity = self.exit_velocity;
            self.segment_time = self.min_segment_time;
            let target = self.target;
            self.emit(&target, cx, true)?;
        }
        Ok(Flow::Ok)
    }

    /// Emit the next segment of the current section. Returns true when it
    /// was the section's last; that segment lands exactly on the section
    /// end so rounding never accumulates.
    fn exec_segment(&mut self, cx: &mut ExecContext, snap: bool) -> Result<bool, StatusCode> {
        self.segment_count = self.segment_count.saturating_sub(1);
        let last = self.segment_count == 0;
        let travelled = if last && snap {
            self.section_end
        } else {
            (self.travelled + self.segment_velocity * self.segment_time).min(self.section_end)
        };
        self.travelled = travelled;
        let position = if last && snap && self.travelled >= self.length - vector::EPSILON {
            self.travelled = self.length;
            self.target
        } else {
            self.point_at(self.travelled)
        };
        self.emit(&position, cx, self.force_fit)?;
        Ok(last)
    }

    fn point_at(&self, travelled: f64) -> AxisVector {
        let fraction = if self.length > 0.0 { travelled / self.length } else { 1.0 };
        match &self.arc {
            Some(arc) => arc.point_at(fraction, &self.target),
            None => {
                let mut point = self.move_start;
                for (i, p) in point.iter_mut().enumerate() {
                    *p += (self.target[i] - self.move_start[i]) * fraction;
                }
                point
            }
        }
    }

    fn emit(&mut self, position: &AxisVector, cx: &mut ExecContext, forced: bool) -> Result<(), StatusCode> {
        let steps = cx.kinematics.steps(position, &self.steps);
        let mut travel = [0i64; MOTORS];
        for (i, t) in travel.iter_mut().enumerate() {
            *t = steps[i] - self.steps[i];
        }
        cx.pipeline.prep_line(travel, self.segment_time)?;
        self.steps = steps;
        self.position = *position;
        if let Some(log) = self.segment_log.as_mut() {
            log.push(SegmentRecord {
                line: self.gm.line_number,
                phase: self.phase,
                velocity: self.segment_velocity,
                time: self.segment_time,
                forced: forced || self.segment_time < self.min_segment_time,
                hold: cx.status.hold_state != HoldState::Off,
                position: *position,
            });
        }
        Ok(())
    }
}
