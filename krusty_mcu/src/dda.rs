// krusty_mcu/src/dda.rs - Bresenham-style DDA over a segment's tick count

use krusty_shared::MOTORS;

use crate::segment::Segment;

/// Fractional resolution of each accumulator.
pub const DDA_SUBSTEPS: i64 = 100_000;

#[derive(Debug, Clone, Copy, Default)]
struct MotorRun {
    substep_increment: i64,
    accumulator: i64,
}

/// DDA runtime for the segment currently being stepped. Every motor adds its
/// step count to its accumulator each tick and steps when the accumulator
/// crosses zero, so a motor with `s` steps over `t` ticks fires exactly `s`
/// evenly spaced pulses.
#[derive(Debug, Clone, Default)]
pub struct DdaRuntime {
    ticks_downcount: u64,
    ticks_x_substeps: i64,
    motors: [MotorRun; MOTORS],
}

impl DdaRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.ticks_downcount > 0
    }

    /// `segment.ticks` must be at least the major axis step count.
    pub fn load(&mut self, segment: &Segment) {
        self.ticks_downcount = segment.ticks;
        self.ticks_x_substeps = segment.ticks as i64 * DDA_SUBSTEPS;
        for (run, steps) in self.motors.iter_mut().zip(segment.steps.iter()) {
            run.substep_increment = steps.unsigned_abs() as i64 * DDA_SUBSTEPS;
            // start half a step behind so pulses sit mid-interval
            run.accumulator = -(self.ticks_x_substeps / 2);
        }
    }

    /// Advance one tick. Calls `fire` for every motor that steps and returns
    /// true when the segment's last tick has run.
    pub fn tick(&mut self, mut fire: impl FnMut(usize)) -> bool {
        if self.ticks_downcount == 0 {
            return false;
        }
        for (motor, run) in self.motors.iter_mut().enumerate() {
            if run.substep_increment == 0 {
                continue;
            }
            run.accumulator += run.substep_increment;
            if run.accumulator > 0 {
                run.accumulator -= self.ticks_x_substeps;
                fire(motor);
            }
        }
        self.ticks_downcount -= 1;
        self.ticks_downcount == 0
    }

    pub fn stop(&mut self) {
        self.ticks_downcount = 0;
        for run in self.motors.iter_mut() {
            run.substep_increment = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentKind;

    fn run_segment(steps: [i64; MOTORS], ticks: u64) -> ([u64; MOTORS], Vec<Vec<u64>>) {
        let mut dda = DdaRuntime::new();
        dda.load(&Segment {
            kind: SegmentKind::Line,
            steps,
            ticks,
        });
        let mut counts = [0u64; MOTORS];
        let mut times = vec![Vec::new(); MOTORS];
        let mut tick = 0u64;
        loop {
            let done = dda.tick(|m| {
                counts[m] += 1;
                times[m].push(tick);
            });
            tick += 1;
            if done {
                break;
            }
        }
        assert_eq!(tick, ticks);
        (counts, times)
    }

    #[test]
    fn test_exact_step_counts() {
        let (counts, _) = run_segment([250, 1, 0, 97, -13, 249], 250);
        assert_eq!(counts, [250, 1, 0, 97, 13, 249]);
    }

    #[test]
    fn test_pulses_are_evenly_spaced() {
        let (_, times) = run_segment([10, 0, 0, 0, 0, 0], 100);
        let gaps: Vec<u64> = times[0].windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.iter().all(|g| *g == 10), "gaps {:?}", gaps);
    }

    #[test]
    fn test_zero_step_segment_only_counts_down() {
        let (counts, _) = run_segment([0; MOTORS], 40);
        assert_eq!(counts, [0; MOTORS]);
    }
}
