// src/executor/sync.rs - queued side effects applied when the runtime reaches them
use krusty_shared::gcode::SpindleState;

use super::{ExecContext, Runtime};
use crate::canonical::state::MachineState;
use crate::planner::{Coolant, SyncOp};

impl Runtime {
    pub(super) fn apply_sync(&mut self, op: &SyncOp, cx: &mut ExecContext) {
        tracing::debug!("Runtime command {:?}", op);
        match op {
            SyncOp::SetWorkOffset { coord, offset } => {
                self.gm.coord_system = *coord;
                self.gm.work_offset = *offset;
            }
            SyncOp::SetAbsolutePosition { position, flags } => {
                for (i, flag) in flags.iter().enumerate() {
                    if *flag {
                        self.position[i] = position[i];
                    }
                }
                // shift the step counters by the redefinition, not by motion
                let steps = cx.kinematics.steps(&self.position, &self.steps);
                let mut counted = cx.pipeline.position();
                for (i, c) in counted.iter_mut().enumerate() {
                    *c += steps[i] - self.steps[i];
                }
                cx.pipeline.set_position(counted);
                self.steps = steps;
            }
            SyncOp::Spindle { state, speed } => {
                self.gm.spindle = *state;
                self.gm.spindle_speed = *speed;
                tracing::info!("Spindle {:?} at {}", state, speed);
            }
            SyncOp::Coolant { coolant, on } => match coolant {
                Coolant::Mist => self.coolant_mist = *on,
                Coolant::Flood => self.coolant_flood = *on,
            },
            SyncOp::CoolantOff => {
                self.coolant_mist = false;
                self.coolant_flood = false;
            }
            SyncOp::ToolChange(tool) => {
                self.gm.tool = *tool;
                tracing::info!("Tool {} selected", tool);
            }
            SyncOp::ProgramStop | SyncOp::OptionalStop => {
                cx.status.program_finalize(MachineState::ProgramStop);
            }
            SyncOp::ProgramEnd => {
                self.gm.spindle = SpindleState::Off;
                self.gm.spindle_speed = 0.0;
                self.coolant_mist = false;
                self.coolant_flood = false;
                cx.status.program_finalize(MachineState::ProgramEnd);
            }
        }
    }
}
