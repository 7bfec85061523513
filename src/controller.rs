// src/controller.rs - main loop dispatcher
//! Handlers run highest priority first. A handler returning `Eagain` ends
//! the pass so everything above it runs again before lower-priority work;
//! command ingestion comes last and only when the planner has room.

use std::collections::VecDeque;

use serde_json::json;

use krusty_shared::{Flow, StatusCode};

use crate::canonical::state::{CycleState, HoldState, MachineState, MotionState};
use crate::gcode::{execute_block, is_block_deleted, GCodeBlock};
use crate::machine::{Core, MachineRequests};
use crate::report::{response, status_code, StatusReport};

#[derive(Debug, Default)]
pub struct Controller {
    input: VecDeque<String>,
    responses: Vec<String>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: String) {
        self.input.push_back(line);
    }

    pub fn pending(&self) -> usize {
        self.input.len()
    }

    pub fn take_responses(&mut self) -> Vec<String> {
        std::mem::take(&mut self.responses)
    }

    /// One pass of the main loop.
    pub fn dispatch(&mut self, core: &mut Core, requests: &MachineRequests) {
        let handlers: [fn(&mut Self, &mut Core, &MachineRequests) -> Result<Flow, StatusCode>; 8] = [
            Self::alarm_gate,
            Self::feedhold_sequencing,
            Self::hold_planning,
            Self::arc_continuation,
            Self::motor_power,
            Self::status_report,
            Self::planner_headroom,
            Self::ingest_command,
        ];
        for handler in handlers {
            match handler(self, core, requests) {
                Ok(Flow::Eagain) => return,
                Ok(_) => {}
                Err(code) => {
                    tracing::warn!("Controller handler failed: {}", code);
                    return;
                }
            }
        }
    }

    fn alarm_gate(&mut self, core: &mut Core, requests: &MachineRequests) -> Result<Flow, StatusCode> {
        if let Err(code) = core.planner.pool().check_integrity() {
            core.panic(code);
        }
        if !core.cm.status.is_alarmed() {
            return Ok(Flow::Noop);
        }
        requests.clear();
        if !core.finish_alarm_stop() {
            return Ok(Flow::Eagain);
        }
        Ok(Flow::Ok)
    }

    /// `!`, `%` and `~`, in that order. A flush waits until the hold has
    /// been reached.
    fn feedhold_sequencing(&mut self, core: &mut Core, requests: &MachineRequests) -> Result<Flow, StatusCode> {
        let status = &mut core.cm.status;
        if requests.take_feedhold()
            && status.motion_state == MotionState::Run
            && status.hold_state == HoldState::Off
        {
            status.hold_state = HoldState::Sync;
            tracing::info!("Feedhold requested");
        }
        if requests.queue_flush_pending() && core.try_flush() {
            requests.clear_queue_flush();
        }
        if requests.take_cycle_start() {
            let status = &mut core.cm.status;
            if status.hold_state == HoldState::Hold {
                status.hold_state = HoldState::EndHold;
            } else if !core.planner.is_empty() {
                core.pipeline.request_exec();
            }
        }
        Ok(Flow::Ok)
    }

    fn hold_planning(&mut self, core: &mut Core, _requests: &MachineRequests) -> Result<Flow, StatusCode> {
        if core.cm.status.hold_replan_pending {
            core.planner.replan_from_rest();
            core.cm.status.hold_replan_pending = false;
        }
        match core.cm.status.hold_state {
            HoldState::Plan => Ok(core.with_exec(|runtime, cx| runtime.plan_hold(cx))),
            HoldState::EndHold => {
                core.with_exec(|runtime, cx| runtime.end_hold(cx));
                Ok(Flow::Ok)
            }
            _ => Ok(Flow::Noop),
        }
    }

    fn arc_continuation(&mut self, core: &mut Core, _requests: &MachineRequests) -> Result<Flow, StatusCode> {
        match core.cm.arc_callback(&mut core.planner) {
            Err(code) => {
                if core.cm.status.is_alarmed() {
                    core.alarm(code);
                }
                self.responses.push(response(&json!({ "arc": code.to_string() }), code.code(), core.planner.available()));
                Ok(Flow::Ok)
            }
            flow => flow,
        }
    }

    fn motor_power(&mut self, core: &mut Core, _requests: &MachineRequests) -> Result<Flow, StatusCode> {
        let cycle_active = core.cm.status.cycle_state != CycleState::Off;
        core.pipeline.power_callback(core.driver.as_mut(), cycle_active);
        Ok(Flow::Ok)
    }

    fn status_report(&mut self, core: &mut Core, _requests: &MachineRequests) -> Result<Flow, StatusCode> {
        if !core.cm.status.take_status_report_request() {
            return Ok(Flow::Noop);
        }
        self.responses.push(StatusReport::capture(&core.runtime, &core.cm.status).to_json());
        Ok(Flow::Ok)
    }

    fn planner_headroom(&mut self, core: &mut Core, _requests: &MachineRequests) -> Result<Flow, StatusCode> {
        if core.planner.has_headroom() {
            Ok(Flow::Ok)
        } else {
            Ok(Flow::Eagain)
        }
    }

    fn ingest_command(&mut self, core: &mut Core, _requests: &MachineRequests) -> Result<Flow, StatusCode> {
        let Some(line) = self.input.pop_front() else {
            return Ok(Flow::Noop);
        };
        let text = line.trim();
        let (body, result) = if let Some(command) = text.strip_prefix('$') {
            let result = self.system_command(command.trim(), core);
            (json!({ "sys": text }), result)
        } else {
            (json!({ "gc": text }), Self::gcode_command(text, core))
        };
        if let Err(code) = &result {
            tracing::warn!("'{}': {}", text, code);
        }
        let status = status_code(&result);
        self.responses.push(response(&body, status, core.planner.available()));
        Ok(Flow::Ok)
    }

    fn system_command(&mut self, command: &str, core: &mut Core) -> Result<Flow, StatusCode> {
        match command.to_ascii_lowercase().as_str() {
            "clear" | "x" => {
                core.cm.clear_alarm()?;
                Ok(Flow::Ok)
            }
            "sr" => {
                core.cm.status.request_status_report();
                Ok(Flow::Ok)
            }
            _ => Err(StatusCode::UnrecognizedCommand),
        }
    }

    fn gcode_command(text: &str, core: &mut Core) -> Result<Flow, StatusCode> {
        if is_block_deleted(text) {
            return Ok(Flow::Noop);
        }
        let block = match GCodeBlock::parse(text) {
            Ok(Some(block)) => block,
            Ok(None) => return Ok(Flow::Ok),
            Err(e) => {
                tracing::debug!("Parse error: {}", e);
                return Err(e.status());
            }
        };
        match core.cm.status.machine_state {
            MachineState::Panic => return Err(StatusCode::MachineLocked),
            MachineState::Alarm => return Err(StatusCode::MachineAlarmed),
            _ => {}
        }
        let result = execute_block(&block, &mut core.cm, &mut core.planner);
        if let Err(code) = result {
            // the canonical machine raised an alarm: stop the motion below it
            if core.cm.status.is_alarmed() {
                core.alarm(code);
            }
            return Err(code);
        }
        Ok(Flow::Ok)
    }
}
