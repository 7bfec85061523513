// krusty_mcu/src/power.rs - per-motor power sequencing

use krusty_shared::config::PowerMode;

/// Power bookkeeping for one motor channel. Times are seconds of DDA clock.
#[derive(Debug, Clone, Copy)]
pub struct MotorPower {
    pub mode: PowerMode,
    energized: bool,
    last_active: f64,
}

impl MotorPower {
    pub fn new(mode: PowerMode) -> Self {
        Self {
            mode,
            energized: false,
            last_active: 0.0,
        }
    }

    pub fn is_energized(&self) -> bool {
        self.energized
    }

    /// The motor is about to step (or a cycle is starting). Returns true if
    /// the enable line must be driven high.
    pub fn activate(&mut self, now: f64) -> bool {
        if self.mode == PowerMode::Disabled {
            return false;
        }
        self.last_active = now;
        let changed = !self.energized;
        self.energized = true;
        changed
    }

    /// Periodic check from the RTC callback. Returns `Some(state)` when the
    /// enable line must change.
    pub fn service(&mut self, now: f64, timeout: f64, moving: bool, cycle_active: bool) -> Option<bool> {
        let want = match self.mode {
            PowerMode::Disabled => false,
            PowerMode::AlwaysOn => true,
            PowerMode::DuringCycle => {
                if cycle_active {
                    self.last_active = now;
                }
                self.energized && now - self.last_active < timeout
            }
            PowerMode::DuringMotion => {
                if moving {
                    self.last_active = now;
                }
                self.energized && now - self.last_active < timeout
            }
        };
        if want != self.energized {
            self.energized = want;
            Some(want)
        } else {
            None
        }
    }

    pub fn force_off(&mut self) -> bool {
        let changed = self.energized;
        self.energized = false;
        changed
    }
}
