// src/kinematics.rs - axis positions to motor steps
use krusty_shared::vector::AxisVector;
use krusty_shared::{AxisMode, Config, AXES, MOTORS};

#[derive(Debug, Clone, Copy)]
struct MotorMap {
    axis: usize,
    steps_per_unit: f64,
}

/// Cartesian mapping: each motor follows one axis. Inhibited axes are
/// computed but never stepped.
#[derive(Debug, Clone)]
pub struct Kinematics {
    motors: Vec<MotorMap>,
    inhibited: [bool; AXES],
}

impl Kinematics {
    pub fn new(config: &Config) -> Self {
        let motors = config
            .motors
            .iter()
            .take(MOTORS)
            .map(|m| MotorMap {
                axis: m.axis.index(),
                steps_per_unit: m.steps_per_unit(),
            })
            .collect();
        let axes = config.axes.to_array();
        let inhibited = std::array::from_fn(|i| axes[i].axis_mode == AxisMode::Inhibited);
        Self { motors, inhibited }
    }

    pub fn steps_per_unit(&self, motor: usize) -> Option<f64> {
        self.motors.get(motor).map(|m| m.steps_per_unit)
    }

    /// Absolute step targets for `position`. Motors on inhibited axes keep
    /// their `previous` count.
    pub fn steps(&self, position: &AxisVector, previous: &[i64; MOTORS]) -> [i64; MOTORS] {
        let mut steps = *previous;
        for (motor, map) in self.motors.iter().enumerate() {
            if !self.inhibited[map.axis] {
                steps[motor] = (position[map.axis] * map.steps_per_unit).round() as i64;
            }
        }
        steps
    }

    /// Axis positions implied by motor step counts (first motor per axis
    /// wins). Axes without a motor report `fallback`.
    pub fn position(&self, steps: &[i64; MOTORS], fallback: &AxisVector) -> AxisVector {
        let mut position = *fallback;
        let mut seen = [false; AXES];
        for (motor, map) in self.motors.iter().enumerate() {
            if !seen[map.axis] && !self.inhibited[map.axis] {
                position[map.axis] = steps[motor] as f64 / map.steps_per_unit;
                seen[map.axis] = true;
            }
        }
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_machine_steps() {
        let kin = Kinematics::new(&Config::default());
        // 1.8 degree, 8 microsteps, 40mm per rev = 40 steps/mm
        assert_eq!(kin.steps_per_unit(0), Some(40.0));
        let steps = kin.steps(&[1.0, -2.0, 0.5, 90.0, 0.0, 0.0], &[0; MOTORS]);
        assert_eq!(&steps[..4], &[40, -80, 640, 400]);
        let back = kin.position(&steps, &[0.0; AXES]);
        assert!((back[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_inhibited_axis_does_not_step() {
        let mut config = Config::default();
        config.axes.z.axis_mode = AxisMode::Inhibited;
        let kin = Kinematics::new(&config);
        let previous = [0, 0, 7, 0, 0, 0];
        let steps = kin.steps(&[0.0, 0.0, 10.0, 0.0, 0.0, 0.0], &previous);
        assert_eq!(steps[2], 7);
    }
}
