//! Drive a whole program through the motion core on emulated drivers.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use krusty_cnc::canonical::state::HoldState;
use krusty_cnc::Machine;
use krusty_mcu::fake::FakeDriver;
use krusty_mcu::StepDriver;
use krusty_shared::{AxisVector, Config, MOTORS};

use crate::settings::SimSettings;
use crate::trace::{TraceError, TraceEvent, TraceWriter};

/// Ticks between drains of the segment log and the response queue.
const TICKS_PER_DRAIN: u64 = 1_000;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("trace output failed: {0}")]
    Trace(#[from] TraceError),
}

/// Lets the run loop read the emulated pins while the machine owns the
/// driver.
struct SharedDriver(Arc<Mutex<FakeDriver>>);

impl SharedDriver {
    fn with(&self, f: impl FnOnce(&mut FakeDriver)) {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl StepDriver for SharedDriver {
    fn set_direction(&mut self, motor: usize, reverse: bool) {
        self.with(|d| d.set_direction(motor, reverse));
    }

    fn step(&mut self, motor: usize) {
        self.with(|d| d.step(motor));
    }

    fn release(&mut self) {
        self.with(|d| d.release());
    }

    fn enable(&mut self, motor: usize, energized: bool) {
        self.with(|d| d.enable(motor, energized));
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum HoldPlan {
    Off,
    Waiting(f64),
    Holding,
    Resumed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    /// The program ran out before `max_ticks`.
    pub completed: bool,
    pub ticks: u64,
    pub elapsed_seconds: f64,
    pub segments: u64,
    pub motion_seconds: f64,
    /// Controller responses with a non-zero status.
    pub errors: usize,
    pub held: bool,
    pub position: AxisVector,
    /// Signed step counts as seen on the emulated driver pins.
    pub driver_position: [i64; MOTORS],
    pub pulses: [u64; MOTORS],
    pub total_pulses: u64,
    pub underflows: u64,
}

fn response_status(line: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(line).ok()?;
    value.get("r")?;
    value["f"][1].as_u64()
}

/// Run `program` to completion (or `settings.max_ticks`), tracing into
/// `settings.output_dir`.
pub fn run_program(config: Config, settings: &SimSettings, program: &str) -> Result<SimReport, SimError> {
    let driver = Arc::new(Mutex::new(FakeDriver::new()));
    let mut machine = Machine::with_driver(config, Box::new(SharedDriver(Arc::clone(&driver))));
    machine.runtime_mut().enable_segment_log();
    let requests = machine.requests();
    let writer = TraceWriter::spawn(&settings.output_dir, settings.jsonl)?;

    let mut hold = match settings.hold_at_seconds {
        Some(at) => HoldPlan::Waiting(at),
        None => HoldPlan::Off,
    };
    let mut errors = 0;
    let mut last_steps = [0i64; MOTORS];
    let mut completed = false;

    machine.submit(program);
    while machine.pipeline().ticks() < settings.max_ticks {
        for _ in 0..TICKS_PER_DRAIN {
            machine.tick();
        }

        let log = machine.runtime_mut().take_segment_log();
        for record in log {
            let steps = machine.kinematics().steps(&record.position, &last_steps);
            last_steps = steps;
            writer.send(TraceEvent::Segment { record, steps })?;
        }
        for line in machine.take_responses() {
            match response_status(&line) {
                Some(0) | None => {}
                Some(status) => {
                    errors += 1;
                    tracing::warn!("Line rejected with status {}: {}", status, line);
                }
            }
            writer.send(TraceEvent::Response(line))?;
        }

        let elapsed = machine.pipeline().elapsed_seconds();
        hold = match hold {
            HoldPlan::Waiting(at) if elapsed >= at && !machine.is_idle() => {
                tracing::info!("Feedhold at {:.3}s", elapsed);
                requests.request_feedhold();
                HoldPlan::Holding
            }
            HoldPlan::Holding
                if machine.status().hold_state == HoldState::Hold && !machine.pipeline().is_busy() =>
            {
                tracing::info!("Held at {:?}, resuming", &machine.runtime().position()[..3]);
                requests.request_cycle_start();
                HoldPlan::Resumed
            }
            // motion ran out before the hold took
            HoldPlan::Holding if machine.status().hold_state == HoldState::Off && machine.is_idle() => {
                HoldPlan::Off
            }
            other => other,
        };

        if hold != HoldPlan::Holding && machine.is_idle() {
            completed = true;
            break;
        }
    }
    if !completed {
        tracing::warn!("Stopped after {} ticks with motion still queued", machine.pipeline().ticks());
    }

    let counts = writer.finish()?;
    let pins = driver.lock().unwrap_or_else(PoisonError::into_inner).clone();
    Ok(SimReport {
        completed,
        ticks: machine.pipeline().ticks(),
        elapsed_seconds: machine.pipeline().elapsed_seconds(),
        segments: counts.segments,
        motion_seconds: counts.motion_seconds,
        errors,
        held: hold == HoldPlan::Resumed,
        position: *machine.runtime().position(),
        driver_position: pins.position,
        pulses: pins.pulses,
        total_pulses: pins.total_pulses(),
        underflows: machine.pipeline().stats().underflows,
    })
}
