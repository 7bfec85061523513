// src/planner/junction.rs - cornering velocity between consecutive moves
use krusty_shared::config::AxisConfig;
use krusty_shared::vector::{self, AxisVector};
use krusty_shared::AXES;

/// Treats the corner between two moves as an arc of the allowed deviation
/// and returns the velocity whose centripetal acceleration fits
/// `acceleration` on that arc.
#[derive(Debug, Clone)]
pub struct JunctionDeviation {
    pub deviation: AxisVector,
    pub acceleration: f64,
}

impl JunctionDeviation {
    pub fn new(axes: &[AxisConfig; AXES], acceleration: f64) -> Self {
        let mut deviation = vector::zero();
        for (d, axis) in deviation.iter_mut().zip(axes.iter()) {
            *d = axis.junction_deviation;
        }
        Self { deviation, acceleration }
    }

    /// Deviation along a unit vector, weighted by each axis's allowance.
    fn weighted(&self, unit: &AxisVector) -> f64 {
        unit.iter()
            .zip(self.deviation.iter())
            .map(|(u, d)| (u * d).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// `a_exit` is the direction leaving the previous move, `b_entry` the
    /// direction entering the next. `scale` shrinks the deviation (exact
    /// path mode).
    pub fn velocity(&self, a_exit: &AxisVector, b_entry: &AxisVector, scale: f64) -> f64 {
        let cos_theta = -vector::dot(a_exit, b_entry);
        if cos_theta < -0.99 {
            // straight through
            return f64::INFINITY;
        }
        if cos_theta > 0.99 {
            // reversal
            return 0.0;
        }
        let delta = (self.weighted(a_exit) + self.weighted(b_entry)) / 2.0 * scale;
        let sin_half = ((1.0 - cos_theta) / 2.0).sqrt();
        let radius = delta * sin_half / (1.0 - sin_half);
        (radius * self.acceleration).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krusty_shared::Config;

    fn junction() -> JunctionDeviation {
        let config = Config::default();
        JunctionDeviation::new(&config.axes.to_array(), config.machine.junction_acceleration)
    }

    #[test]
    fn test_collinear_is_unlimited() {
        let x = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert!(junction().velocity(&x, &x, 1.0).is_infinite());
    }

    #[test]
    fn test_reversal_stops() {
        let x = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let back = [-1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(junction().velocity(&x, &back, 1.0), 0.0);
    }

    #[test]
    fn test_right_angle() {
        let jd = junction();
        let x = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let y = [0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let v = jd.velocity(&x, &y, 1.0);
        let sin_half = 0.5f64.sqrt();
        let delta = jd.deviation[0];
        let expected = (delta * sin_half / (1.0 - sin_half) * jd.acceleration).sqrt();
        assert!((v - expected).abs() < 1e-9);
        // a sharper corner is slower, exact path is slower still
        let steep = [-0.9, 0.435_889_894, 0.0, 0.0, 0.0, 0.0];
        assert!(jd.velocity(&x, &steep, 1.0) < v);
        assert!(jd.velocity(&x, &y, 0.25) < v);
    }
}
