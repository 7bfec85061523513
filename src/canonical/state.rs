// src/canonical/state.rs - machine, cycle, motion and feedhold states
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    #[default]
    Initializing,
    Ready,
    Alarm,
    ProgramStop,
    ProgramEnd,
    Cycle,
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    #[default]
    Off,
    Machining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    #[default]
    Stop,
    Run,
    Hold,
}

/// Feedhold progression. `Sync` waits for a segment boundary, `Plan` for
/// the main loop to compute the deceleration, `Decel` for the runtime to
/// finish it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    #[default]
    Off,
    Sync,
    Plan,
    Decel,
    Hold,
    EndHold,
}

impl HoldState {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Default)]
pub struct MachineStatus {
    pub machine_state: MachineState,
    pub cycle_state: CycleState,
    pub motion_state: MotionState,
    pub hold_state: HoldState,
    /// The held buffer was trimmed and the queue must restart from rest.
    pub hold_replan_pending: bool,
    pub status_report_requested: bool,
}

impl MachineStatus {
    pub fn request_status_report(&mut self) {
        self.status_report_requested = true;
    }

    pub fn take_status_report_request(&mut self) -> bool {
        std::mem::take(&mut self.status_report_requested)
    }

    pub fn is_alarmed(&self) -> bool {
        matches!(self.machine_state, MachineState::Alarm | MachineState::Panic)
    }

    pub fn cycle_start(&mut self) {
        if self.is_alarmed() {
            return;
        }
        self.machine_state = MachineState::Cycle;
        if self.cycle_state == CycleState::Off {
            self.cycle_state = CycleState::Machining;
            tracing::info!("Cycle start");
        }
    }

    /// The queue drained.
    pub fn cycle_end(&mut self) {
        if self.cycle_state != CycleState::Off {
            self.program_finalize(MachineState::ProgramStop);
        }
    }

    pub fn program_finalize(&mut self, state: MachineState) {
        if !self.is_alarmed() {
            self.machine_state = state;
        }
        self.cycle_state = CycleState::Off;
        self.motion_state = MotionState::Stop;
        self.hold_state = HoldState::Off;
        self.hold_replan_pending = false;
        self.request_status_report();
        tracing::info!("Cycle end: {:?}", self.machine_state);
    }

    /// Combined state reported as `stat`.
    pub fn combined_state(&self) -> u8 {
        match self.machine_state {
            MachineState::Initializing => 0,
            MachineState::Ready => 1,
            MachineState::Alarm => 2,
            MachineState::ProgramStop => 3,
            MachineState::ProgramEnd => 4,
            MachineState::Panic => 13,
            MachineState::Cycle => match self.motion_state {
                MotionState::Run => 5,
                MotionState::Hold => 6,
                MotionState::Stop => 8,
            },
        }
    }
}
