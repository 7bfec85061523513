// src/executor/hold.rs - feedhold deceleration
//! A feedhold decelerates from the velocity of the last emitted segment.
//! When the stop fits in what is left of the current move the tail ends
//! there; otherwise the move is finished at a reduced velocity and the
//! deceleration carries into the following moves until it reaches zero.
//! The stopped move keeps its remainder and runs again from rest.

use krusty_shared::vector;
use krusty_shared::Flow;

use super::{ExecContext, Phase, Runtime};
use crate::canonical::state::{HoldState, MotionState};
use crate::planner::zoid::{decel_velocity, target_length};
use crate::planner::MoveState;

impl Runtime {
    /// Main-loop half of a feedhold: plan the deceleration once the runtime
    /// has reached a segment boundary.
    pub fn plan_hold(&mut self, cx: &mut ExecContext) -> Flow {
        if cx.status.hold_state != HoldState::Plan {
            return Flow::Noop;
        }
        cx.status.hold_state = HoldState::Decel;
        if !self.running {
            // between moves: the next one starts decelerating
            if vector::fp_zero(self.segment_velocity) {
                self.reach_hold(cx);
            } else {
                self.hold_carry = Some(self.segment_velocity);
            }
            return Flow::Ok;
        }
        if let Some(index) = cx.planner.pool().run_index() {
            // take any exit the planner raised since the move started
            let bf = cx.planner.pool_mut().get_mut(index);
            bf.replannable = false;
            if !self.force_fit {
                self.exit_velocity = self.exit_velocity.max(bf.exit_velocity);
            }
        }
        let velocity = self.segment_velocity;
        let available = (self.length - self.travelled).max(0.0);
        let mut braking = target_length(velocity, 0.0, self.jerk);
        if braking > available && vector::fp_zero(self.exit_velocity) {
            // already planned to stop at the end of this move
            braking = available;
        }
        if braking <= available {
            self.begin_decel(velocity, 0.0, braking, true);
        } else {
            let exit = decel_velocity(velocity, available, self.jerk);
            self.begin_decel(velocity, exit, available, false);
        }
        tracing::info!(
            "Feedhold from {:.1}mm/min over {:.3}mm on line {}",
            velocity, braking.min(available), self.gm.line_number
        );
        Flow::Ok
    }

    /// A new move starts while a feedhold is still decelerating.
    pub(super) fn continue_hold(&mut self, index: usize, cx: &mut ExecContext) {
        let velocity = self.hold_carry.take().unwrap_or(self.entry_velocity);
        self.entry_velocity = velocity;
        let braking = target_length(velocity, 0.0, self.jerk);
        if braking <= self.length {
            self.begin_decel(velocity, 0.0, braking, true);
            return;
        }
        let pool = cx.planner.pool();
        let next = pool.get(pool.next(index));
        let continues = next.state.is_occupied() && next.payload.is_motion();
        if vector::fp_zero(self.exit_velocity) || !continues {
            tracing::warn!(
                "Feedhold cannot stop within line {}; stopping hard at its end",
                self.gm.line_number
            );
            self.begin_decel(velocity, 0.0, self.length, true);
            return;
        }
        let exit = decel_velocity(velocity, self.length, self.jerk);
        self.begin_decel(velocity, exit, self.length, false);
    }

    /// Replace the rest of the move with a single tail from `from` to `to`
    /// over `length`.
    fn begin_decel(&mut self, from: f64, to: f64, length: f64, stops: bool) {
        self.head_length = 0.0;
        self.body_length = 0.0;
        self.tail_length = length;
        self.cruise_velocity = from;
        self.exit_velocity = to;
        self.hold_stops_in_move = stops;
        self.phase = Phase::Tail1;
        self.section_new = true;
    }

    /// Velocity reached zero inside the move at the head of the queue. The
    /// buffer keeps what is left and waits for cycle start.
    pub(super) fn enter_hold(&mut self, index: usize, cx: &mut ExecContext) {
        self.hold_stops_in_move = false;
        self.segment_velocity = 0.0;
        let remaining = self.length - self.travelled;
        if remaining <= vector::EPSILON {
            self.retire(cx);
            if cx.planner.is_empty() {
                return;
            }
        } else {
            let bf = cx.planner.pool_mut().get_mut(index);
            bf.trim_front(self.travelled);
            bf.move_state = MoveState::New;
        }
        self.reach_hold(cx);
    }

    pub(super) fn reach_hold(&mut self, cx: &mut ExecContext) {
        cx.status.hold_state = HoldState::Hold;
        cx.status.motion_state = MotionState::Hold;
        cx.status.hold_replan_pending = true;
        cx.status.request_status_report();
        tracing::info!("Feedhold reached at line {}", self.gm.line_number);
    }

    /// Resume after a hold: the queue was replanned from rest.
    pub fn end_hold(&mut self, cx: &mut ExecContext) {
        if cx.status.hold_state != HoldState::EndHold {
            return;
        }
        cx.status.hold_state = HoldState::Off;
        self.hold_carry = None;
        if cx.planner.pool().run_index().is_none() {
            cx.status.motion_state = MotionState::Stop;
            return;
        }
        cx.status.motion_state = MotionState::Run;
        cx.pipeline.request_exec();
        tracing::info!("Feedhold released");
    }
}
