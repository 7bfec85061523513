// src/machine.rs - the whole motion core driven in simulated time
//! A [`Machine`] owns the canonical machine, planner, runtime and step
//! pipeline and stands in for the interrupt controller: each DDA tick runs
//! a pending LOAD, then a pending EXEC, then the DDA itself. The controller
//! loop runs every `controller_interval` ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use krusty_mcu::{NullDriver, StepDriver, StepPipeline};
use krusty_shared::{Config, Flow, StatusCode};

use crate::canonical::state::{HoldState, MachineState, MotionState};
use crate::canonical::CanonicalMachine;
use crate::controller::Controller;
use crate::executor::{ExecContext, Runtime};
use crate::kinematics::Kinematics;
use crate::planner::Planner;

/// Real-time requests (`!`, `~`, `%`). Any thread may set them; the
/// controller loop consumes them.
#[derive(Debug, Default)]
pub struct MachineRequests {
    feedhold: AtomicBool,
    cycle_start: AtomicBool,
    queue_flush: AtomicBool,
}

impl MachineRequests {
    pub fn request_feedhold(&self) {
        self.feedhold.store(true, Ordering::Release);
    }

    pub fn request_cycle_start(&self) {
        self.cycle_start.store(true, Ordering::Release);
    }

    pub fn request_queue_flush(&self) {
        self.queue_flush.store(true, Ordering::Release);
    }

    pub fn take_feedhold(&self) -> bool {
        self.feedhold.swap(false, Ordering::AcqRel)
    }

    pub fn take_cycle_start(&self) -> bool {
        self.cycle_start.swap(false, Ordering::AcqRel)
    }

    pub fn queue_flush_pending(&self) -> bool {
        self.queue_flush.load(Ordering::Acquire)
    }

    pub fn clear_queue_flush(&self) {
        self.queue_flush.store(false, Ordering::Release);
    }

    /// Drop everything (alarm).
    pub fn clear(&self) {
        self.take_feedhold();
        self.take_cycle_start();
        self.clear_queue_flush();
    }

    /// Route a real-time character; false if `c` is not one.
    pub fn intercept(&self, c: char) -> bool {
        match c {
            '!' => self.request_feedhold(),
            '~' => self.request_cycle_start(),
            '%' => self.request_queue_flush(),
            _ => return false,
        }
        true
    }
}

/// The four motion subsystems plus the hardware seam.
pub struct Core {
    pub cm: CanonicalMachine,
    pub planner: Planner,
    pub runtime: Runtime,
    pub pipeline: StepPipeline,
    pub kinematics: Kinematics,
    pub driver: Box<dyn StepDriver + Send>,
    /// Positions resync once the DDA drains after an alarm.
    resync_pending: bool,
}

impl Core {
    pub fn new(config: &Config, driver: Box<dyn StepDriver + Send>) -> Self {
        Self {
            cm: CanonicalMachine::new(config),
            planner: Planner::new(config),
            runtime: Runtime::new(config),
            pipeline: StepPipeline::from_config(config),
            kinematics: Kinematics::new(config),
            driver,
            resync_pending: false,
        }
    }

    /// Run `f` with the executor's view of the core.
    pub fn with_exec<R>(&mut self, f: impl FnOnce(&mut Runtime, &mut ExecContext) -> R) -> R {
        let mut cx = ExecContext {
            planner: &mut self.planner,
            pipeline: &mut self.pipeline,
            kinematics: &self.kinematics,
            status: &mut self.cm.status,
        };
        f(&mut self.runtime, &mut cx)
    }

    /// EXEC stage.
    fn exec(&mut self) {
        let result = self.with_exec(|runtime, cx| runtime.exec_move(cx));
        match result {
            // finished without handing a segment down: keep going
            Ok(Flow::Ok) if self.pipeline.prep_is_free() => self.pipeline.request_exec(),
            Ok(_) => {}
            Err(code) if code.is_fatal() => self.panic(code),
            Err(code) => self.alarm(code),
        }
    }

    /// LOAD stage.
    fn load(&mut self) {
        let expected = self.runtime.is_running() && self.cm.status.hold_state == HoldState::Off;
        self.pipeline.load(self.driver.as_mut(), expected);
    }

    /// Snap every layer to the position the motors actually reached.
    fn resync(&mut self) {
        let position = self.kinematics.position(&self.pipeline.position(), self.runtime.position());
        self.runtime.reset(&position, &self.kinematics);
        self.cm.sync_to_runtime(&mut self.planner, &position);
    }

    /// Stop at the next segment boundary and drop the queue.
    pub fn alarm(&mut self, code: StatusCode) {
        if !self.cm.status.is_alarmed() {
            self.cm.alarm(code);
        }
        self.pipeline.request_stop();
        self.planner.flush();
        self.resync_pending = true;
    }

    /// Stop now and lock the machine.
    pub fn panic(&mut self, code: StatusCode) {
        self.cm.panic(code);
        self.pipeline.halt(self.driver.as_mut());
        self.planner.flush();
        self.resync();
    }

    /// Finish an alarm once the DDA is idle. True when done.
    pub fn finish_alarm_stop(&mut self) -> bool {
        if !self.resync_pending {
            return true;
        }
        if self.pipeline.is_busy() {
            return false;
        }
        self.pipeline.reset();
        self.resync();
        self.resync_pending = false;
        true
    }

    /// Discard the queue; only while stopped or holding with the DDA idle.
    pub fn try_flush(&mut self) -> bool {
        let status = &self.cm.status;
        let held = status.hold_state == HoldState::Hold && !self.pipeline.is_busy();
        if status.motion_state != MotionState::Stop && !held {
            return false;
        }
        self.planner.flush();
        self.pipeline.reset();
        self.resync();
        let status = &mut self.cm.status;
        status.hold_replan_pending = false;
        if status.cycle_state != crate::canonical::state::CycleState::Off {
            status.program_finalize(MachineState::ProgramStop);
        } else {
            status.hold_state = HoldState::Off;
            status.motion_state = MotionState::Stop;
        }
        tracing::info!("Queue flushed");
        true
    }
}

pub struct Machine {
    config: Config,
    core: Core,
    controller: Controller,
    requests: Arc<MachineRequests>,
    since_controller: u32,
}

impl Machine {
    pub fn new(config: Config) -> Self {
        Self::with_driver(config, Box::new(NullDriver))
    }

    pub fn with_driver(config: Config, driver: Box<dyn StepDriver + Send>) -> Self {
        Self {
            core: Core::new(&config, driver),
            controller: Controller::new(),
            requests: Arc::new(MachineRequests::default()),
            since_controller: 0,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn requests(&self) -> Arc<MachineRequests> {
        Arc::clone(&self.requests)
    }

    pub fn cm(&self) -> &CanonicalMachine {
        &self.core.cm
    }

    pub fn planner(&self) -> &Planner {
        &self.core.planner
    }

    pub fn runtime(&self) -> &Runtime {
        &self.core.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.core.runtime
    }

    pub fn pipeline(&self) -> &StepPipeline {
        &self.core.pipeline
    }

    pub fn kinematics(&self) -> &Kinematics {
        &self.core.kinematics
    }

    pub fn status(&self) -> &crate::canonical::state::MachineStatus {
        &self.core.cm.status
    }

    /// Queue text from the host. Real-time characters act at once; the
    /// rest is split into lines for the controller.
    pub fn submit(&mut self, text: &str) {
        for line in text.lines() {
            let kept: String = line.chars().filter(|c| !self.requests.intercept(*c)).collect();
            if !kept.trim().is_empty() {
                self.controller.push_line(kept);
            }
        }
    }

    pub fn take_responses(&mut self) -> Vec<String> {
        self.controller.take_responses()
    }

    /// Lines still waiting for the controller.
    pub fn pending_lines(&self) -> usize {
        self.controller.pending()
    }

    /// One DDA period.
    pub fn tick(&mut self) {
        let core = &mut self.core;
        if core.pipeline.take_load_request() {
            core.load();
        }
        if core.pipeline.take_exec_request() {
            core.exec();
        }
        core.pipeline.dda_tick(core.driver.as_mut());
        if core.planner.take_exec_request() {
            core.pipeline.request_exec();
        }

        self.since_controller += 1;
        if self.since_controller >= self.config.machine.controller_interval {
            self.since_controller = 0;
            self.controller.dispatch(&mut self.core, &self.requests);
        }
    }

    /// Run one controller pass now.
    pub fn dispatch(&mut self) {
        self.controller.dispatch(&mut self.core, &self.requests);
    }

    /// Nothing queued, nothing moving.
    pub fn is_idle(&self) -> bool {
        let core = &self.core;
        self.controller.pending() == 0
            && !core.cm.is_arc_running()
            && core.planner.is_empty()
            && !core.runtime.is_running()
            && !core.pipeline.is_busy()
    }

    /// Tick until `done` holds. False if `max_ticks` ran out first.
    pub fn run_until(&mut self, max_ticks: u64, mut done: impl FnMut(&Machine) -> bool) -> bool {
        for _ in 0..max_ticks {
            if done(self) {
                return true;
            }
            self.tick();
        }
        done(self)
    }

    pub fn run_until_idle(&mut self, max_ticks: u64) -> bool {
        self.run_until(max_ticks, |m| m.is_idle())
    }

    /// `$clear`
    pub fn clear_alarm(&mut self) -> Result<(), StatusCode> {
        self.core.cm.clear_alarm()
    }

    /// Apply a new configuration while idle, keeping the machine position.
    pub fn reconfigure(&mut self, config: Config) -> Result<(), StatusCode> {
        config.validate().map_err(|e| {
            tracing::error!("Rejected configuration: {}", e);
            StatusCode::ValueOutOfRange
        })?;
        if !self.is_idle() {
            return Err(StatusCode::CommandNotAccepted);
        }
        let position = *self.core.runtime.position();
        let status = self.core.cm.status.clone();
        let driver = std::mem::replace(&mut self.core.driver, Box::new(NullDriver));
        self.core = Core::new(&config, driver);
        self.core.cm.status = status;
        let steps = self.core.kinematics.steps(&position, &[0; krusty_shared::MOTORS]);
        self.core.pipeline.set_position(steps);
        self.core.runtime.reset(&position, &self.core.kinematics);
        self.core.cm.sync_to_runtime(&mut self.core.planner, &position);
        self.config = config;
        tracing::info!("Configuration applied");
        Ok(())
    }

    /// Power-on state: everything rebuilt at the origin, panics cleared.
    pub fn reset(&mut self) {
        let driver = std::mem::replace(&mut self.core.driver, Box::new(NullDriver));
        self.core = Core::new(&self.config, driver);
        self.controller = Controller::new();
        self.requests.clear();
        self.since_controller = 0;
        tracing::info!("Machine reset");
    }
}
