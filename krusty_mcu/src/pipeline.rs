//! Three-stage step pipeline: EXEC prepares a segment, LOAD moves it into the
//! DDA runtime, and the DDA tick emits the pulses.
//!
//! The host drives the stages the way the interrupt controller would: the DDA
//! tick at the highest priority, then LOAD, then EXEC. Each stage signals the
//! next through a request flag that only it sets and only the next stage
//! clears.

use krusty_shared::config::{Config, PowerMode};
use krusty_shared::{StatusCode, MOTORS};

use crate::dda::DdaRuntime;
use crate::driver::StepDriver;
use crate::power::MotorPower;
use crate::segment::{PrepBuffer, Segment, SegmentKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdaEvent {
    Idle,
    Stepping,
    /// The last tick of the loaded segment just ran; LOAD has been requested.
    SegmentComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The DDA is still running the previous segment.
    Busy,
    Loaded(SegmentKind),
    /// No segment was ready.
    Starved,
    /// A stop was pending; the prepared segment was discarded.
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub segments_loaded: u64,
    pub dwells_loaded: u64,
    /// LOAD found no segment while motion was still expected.
    pub underflows: u64,
    pub steps: [u64; MOTORS],
}

#[derive(Debug, Clone, Copy)]
struct MotorChannel {
    polarity: bool,
    power: MotorPower,
    /// Direction pin as last written; `None` until first set.
    reverse: Option<bool>,
    /// Logical direction of the loaded segment.
    sign: i64,
    moving: bool,
}

pub struct StepPipeline {
    frequency: u32,
    power_timeout: f64,
    prep: PrepBuffer,
    dda: DdaRuntime,
    motors: [MotorChannel; MOTORS],
    position: [i64; MOTORS],
    exec_requested: bool,
    load_requested: bool,
    stop_requested: bool,
    ticks: u64,
    stats: PipelineStats,
}

impl StepPipeline {
    /// `motors` pairs each channel's direction polarity with its power mode;
    /// channels beyond the slice are disabled.
    pub fn new(frequency: u32, power_timeout: f64, motors: &[(bool, PowerMode)]) -> Self {
        let mut channels = [MotorChannel {
            polarity: false,
            power: MotorPower::new(PowerMode::Disabled),
            reverse: None,
            sign: 1,
            moving: false,
        }; MOTORS];
        for (channel, (polarity, mode)) in channels.iter_mut().zip(motors.iter()) {
            channel.polarity = *polarity;
            channel.power = MotorPower::new(*mode);
        }
        Self {
            frequency: frequency.max(1),
            power_timeout,
            prep: PrepBuffer::new(),
            dda: DdaRuntime::new(),
            motors: channels,
            position: [0; MOTORS],
            exec_requested: false,
            load_requested: false,
            stop_requested: false,
            ticks: 0,
            stats: PipelineStats::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let motors: Vec<(bool, PowerMode)> = config
            .motors
            .iter()
            .map(|m| (m.polarity, m.power_mode))
            .collect();
        Self::new(
            config.stepper.dda_frequency,
            config.stepper.motor_power_timeout,
            &motors,
        )
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Seconds of DDA clock since start.
    pub fn elapsed_seconds(&self) -> f64 {
        self.ticks as f64 / self.frequency as f64
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn position(&self) -> [i64; MOTORS] {
        self.position
    }

    pub fn set_position(&mut self, steps: [i64; MOTORS]) {
        self.position = steps;
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn is_energized(&self, motor: usize) -> bool {
        self.motors[motor].power.is_energized()
    }

    /// True while anything is stepping or waiting to be stepped.
    pub fn is_busy(&self) -> bool {
        self.dda.is_running() || self.prep.is_ready()
    }

    pub fn prep_is_free(&self) -> bool {
        self.prep.is_free()
    }

    // ---- EXEC stage ---------------------------------------------------

    /// Queue a line segment. `segment_time` is in minutes.
    pub fn prep_line(&mut self, steps: [i64; MOTORS], segment_time: f64) -> Result<(), StatusCode> {
        let mut ticks = (segment_time * 60.0 * self.frequency as f64).round().max(1.0) as u64;
        let mut segment = Segment {
            kind: SegmentKind::Line,
            steps,
            ticks,
        };
        let major = segment.major_axis_steps();
        if major > ticks {
            // the DDA cannot step faster than once per tick
            tracing::warn!("Segment needs {} steps in {} ticks; stretching", major, ticks);
            ticks = major;
            segment.ticks = ticks;
        }
        self.publish(segment)
    }

    pub fn prep_dwell(&mut self, seconds: f64) -> Result<(), StatusCode> {
        let ticks = (seconds * self.frequency as f64).round().max(1.0) as u64;
        self.publish(Segment {
            kind: SegmentKind::Dwell,
            steps: [0; MOTORS],
            ticks,
        })
    }

    /// Hand the slot back without motion so LOAD keeps the chain going.
    pub fn prep_null(&mut self) -> Result<(), StatusCode> {
        self.publish(Segment::default())
    }

    fn publish(&mut self, segment: Segment) -> Result<(), StatusCode> {
        if !self.prep.publish(segment) {
            tracing::error!("Prep buffer written while owned by the loader");
            return Err(StatusCode::InternalError);
        }
        if !self.dda.is_running() {
            self.load_requested = true;
        }
        Ok(())
    }

    /// Ask for the EXEC stage; ignored while the prep slot is full.
    pub fn request_exec(&mut self) {
        if self.prep.is_free() {
            self.exec_requested = true;
        }
    }

    pub fn take_exec_request(&mut self) -> bool {
        std::mem::take(&mut self.exec_requested)
    }

    pub fn request_load(&mut self) {
        self.load_requested = true;
    }

    pub fn take_load_request(&mut self) -> bool {
        std::mem::take(&mut self.load_requested)
    }

    // ---- LOAD stage ---------------------------------------------------

    /// Move the prepared segment into the DDA. `motion_expected` tells LOAD
    /// whether an empty slot is an underflow or just the end of motion.
    pub fn load<D: StepDriver + ?Sized>(&mut self, driver: &mut D, motion_expected: bool) -> LoadOutcome {
        if self.dda.is_running() {
            return LoadOutcome::Busy;
        }
        if self.stop_requested {
            self.stop_requested = false;
            self.prep.clear();
            return LoadOutcome::Stopped;
        }
        let Some(segment) = self.prep.take() else {
            if motion_expected {
                self.stats.underflows += 1;
                tracing::warn!("Step pipeline underflow ({} total)", self.stats.underflows);
            }
            self.request_exec();
            return LoadOutcome::Starved;
        };
        let now = self.elapsed_seconds();
        match segment.kind {
            SegmentKind::Line => {
                for (motor, channel) in self.motors.iter_mut().enumerate() {
                    let steps = segment.steps[motor];
                    channel.moving = steps != 0;
                    if steps == 0 {
                        continue;
                    }
                    channel.sign = steps.signum();
                    let reverse = (steps < 0) ^ channel.polarity;
                    if channel.reverse != Some(reverse) {
                        driver.set_direction(motor, reverse);
                        channel.reverse = Some(reverse);
                    }
                    if channel.power.activate(now) {
                        driver.enable(motor, true);
                    }
                }
                self.dda.load(&segment);
                self.stats.segments_loaded += 1;
            }
            SegmentKind::Dwell => {
                for channel in self.motors.iter_mut() {
                    channel.moving = false;
                }
                self.dda.load(&segment);
                self.stats.dwells_loaded += 1;
            }
            SegmentKind::Null => {}
        }
        self.request_exec();
        LoadOutcome::Loaded(segment.kind)
    }

    // ---- DDA stage ----------------------------------------------------

    /// One DDA timer interrupt, including the paired pulse release.
    pub fn dda_tick<D: StepDriver + ?Sized>(&mut self, driver: &mut D) -> DdaEvent {
        self.ticks += 1;
        if !self.dda.is_running() {
            return DdaEvent::Idle;
        }
        let motors = &self.motors;
        let position = &mut self.position;
        let steps = &mut self.stats.steps;
        let mut fired = false;
        let done = self.dda.tick(|motor| {
            driver.step(motor);
            position[motor] += motors[motor].sign;
            steps[motor] += 1;
            fired = true;
        });
        if fired {
            driver.release();
        }
        if done {
            for channel in self.motors.iter_mut() {
                channel.moving = false;
            }
            self.load_requested = true;
            DdaEvent::SegmentComplete
        } else {
            DdaEvent::Stepping
        }
    }

    // ---- power and stopping -------------------------------------------

    /// RTC callback: apply idle timeouts per power mode.
    pub fn power_callback<D: StepDriver + ?Sized>(&mut self, driver: &mut D, cycle_active: bool) {
        let now = self.elapsed_seconds();
        for (motor, channel) in self.motors.iter_mut().enumerate() {
            if let Some(on) = channel
                .power
                .service(now, self.power_timeout, channel.moving, cycle_active)
            {
                tracing::debug!("Motor {} {}", motor + 1, if on { "energized" } else { "de-energized" });
                driver.enable(motor, on);
            }
        }
    }

    /// Energize every motor whose mode allows it (cycle start).
    pub fn energize_motors<D: StepDriver + ?Sized>(&mut self, driver: &mut D) {
        let now = self.elapsed_seconds();
        for (motor, channel) in self.motors.iter_mut().enumerate() {
            if channel.power.activate(now) {
                driver.enable(motor, true);
            }
        }
    }

    pub fn deenergize_motors<D: StepDriver + ?Sized>(&mut self, driver: &mut D) {
        for (motor, channel) in self.motors.iter_mut().enumerate() {
            if channel.power.force_off() {
                driver.enable(motor, false);
            }
        }
    }

    /// Stop at the next segment boundary, discarding whatever is prepared.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    /// Immediate stop: abandon the running segment and drop the motors.
    pub fn halt<D: StepDriver + ?Sized>(&mut self, driver: &mut D) {
        self.dda.stop();
        self.prep.clear();
        self.exec_requested = false;
        self.load_requested = false;
        self.stop_requested = false;
        self.deenergize_motors(driver);
        tracing::error!("Step pipeline halted");
    }

    /// Clear pending hand-offs after a flush; the DDA must be idle.
    pub fn reset(&mut self) {
        self.prep.clear();
        self.exec_requested = false;
        self.load_requested = false;
        self.stop_requested = false;
    }
}
