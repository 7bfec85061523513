//! Emulated motor drivers for simulation and tests.

use krusty_shared::MOTORS;

use crate::driver::StepDriver;

/// Records what real drivers would see on their pins: pulse counts, the
/// resulting signed position, direction flips and enable state.
#[derive(Debug, Clone, Default)]
pub struct FakeDriver {
    pub position: [i64; MOTORS],
    pub pulses: [u64; MOTORS],
    pub direction_changes: [u64; MOTORS],
    pub energized: [bool; MOTORS],
    /// Pulses raised but not yet released.
    pub pending_release: usize,
    /// Set when a STEP line is raised while a previous pulse is still high.
    pub overlapping_pulse: bool,
    reverse: [bool; MOTORS],
    high: [bool; MOTORS],
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_pulses(&self) -> u64 {
        self.pulses.iter().sum()
    }
}

impl StepDriver for FakeDriver {
    fn set_direction(&mut self, motor: usize, reverse: bool) {
        if self.reverse[motor] != reverse {
            self.direction_changes[motor] += 1;
        }
        self.reverse[motor] = reverse;
    }

    fn step(&mut self, motor: usize) {
        if self.high[motor] {
            self.overlapping_pulse = true;
        }
        self.high[motor] = true;
        self.pending_release += 1;
        self.pulses[motor] += 1;
        self.position[motor] += if self.reverse[motor] { -1 } else { 1 };
    }

    fn release(&mut self) {
        self.high = [false; MOTORS];
        self.pending_release = 0;
    }

    fn enable(&mut self, motor: usize, energized: bool) {
        self.energized[motor] = energized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_driver_tracks_signed_position() {
        let mut driver = FakeDriver::new();
        driver.step(0);
        driver.release();
        driver.set_direction(0, true);
        driver.step(0);
        driver.release();
        driver.step(0);
        assert_eq!(driver.position[0], -1);
        assert_eq!(driver.pulses[0], 3);
        assert_eq!(driver.direction_changes[0], 1);
        assert!(!driver.overlapping_pulse);
        driver.step(0);
        assert!(driver.overlapping_pulse);
    }
}
