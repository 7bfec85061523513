// src/planner/arc.rs - geometry of an arc carried through the queue as one move

use krusty_shared::gcode::Plane;
use krusty_shared::vector::{self, AxisVector};
use krusty_shared::AXES;

/// Circular (or helical) arc in one of the three planes. Axes outside the
/// plane travel linearly with the angle.
#[derive(Debug, Clone, PartialEq)]
pub struct ArcGeometry {
    pub plane: Plane,
    pub start: AxisVector,
    pub center: [f64; 2],
    pub radius: f64,
    pub start_angle: f64,
    /// Radians; negative is clockwise.
    pub angular_travel: f64,
}

impl ArcGeometry {
    pub fn new(plane: Plane, start: AxisVector, center: [f64; 2], radius: f64, angular_travel: f64) -> Self {
        let (a0, a1, _) = plane.axes();
        let start_angle = (start[a1] - center[1]).atan2(start[a0] - center[0]);
        Self {
            plane,
            start,
            center,
            radius,
            start_angle,
            angular_travel,
        }
    }

    fn in_plane(&self, axis: usize) -> bool {
        let (a0, a1, _) = self.plane.axes();
        axis == a0 || axis == a1
    }

    /// Travel of the axes outside the plane.
    fn linear_travel(&self, target: &AxisVector) -> f64 {
        (0..AXES)
            .filter(|&i| !self.in_plane(i))
            .map(|i| (target[i] - self.start[i]).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    pub fn length(&self, target: &AxisVector) -> f64 {
        let planar = self.angular_travel.abs() * self.radius;
        planar.hypot(self.linear_travel(target))
    }

    pub fn point_at(&self, fraction: f64, target: &AxisVector) -> AxisVector {
        let (a0, a1, _) = self.plane.axes();
        let mut point = self.start;
        for (i, p) in point.iter_mut().enumerate() {
            if !self.in_plane(i) {
                *p += (target[i] - self.start[i]) * fraction;
            }
        }
        let angle = self.start_angle + self.angular_travel * fraction;
        point[a0] = self.center[0] + self.radius * angle.cos();
        point[a1] = self.center[1] + self.radius * angle.sin();
        point
    }

    fn tangent_at(&self, fraction: f64, target: &AxisVector) -> AxisVector {
        let (a0, a1, _) = self.plane.axes();
        let angle = self.start_angle + self.angular_travel * fraction;
        let mut d = vector::zero();
        for (i, v) in d.iter_mut().enumerate() {
            if !self.in_plane(i) {
                *v = target[i] - self.start[i];
            }
        }
        d[a0] = -self.radius * angle.sin() * self.angular_travel;
        d[a1] = self.radius * angle.cos() * self.angular_travel;
        vector::unit(&vector::zero(), &d)
    }

    pub fn start_tangent(&self, target: &AxisVector) -> AxisVector {
        self.tangent_at(0.0, target)
    }

    pub fn end_tangent(&self, target: &AxisVector) -> AxisVector {
        self.tangent_at(1.0, target)
    }

    /// Move the start of the arc forward by `fraction` of its length.
    pub fn advance(&mut self, fraction: f64, target: &AxisVector) {
        let start = self.point_at(fraction, target);
        self.start_angle += self.angular_travel * fraction;
        self.angular_travel *= 1.0 - fraction;
        self.start = start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn quarter() -> (ArcGeometry, AxisVector) {
        let start = [10.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let target = [0.0, 10.0, 0.0, 0.0, 0.0, 0.0];
        (ArcGeometry::new(Plane::XY, start, [0.0, 0.0], 10.0, PI / 2.0), target)
    }

    #[test]
    fn test_quarter_circle_length_and_points() {
        let (arc, target) = quarter();
        assert!((arc.length(&target) - 5.0 * PI).abs() < 1e-9);
        let mid = arc.point_at(0.5, &target);
        let r = 10.0 / 2f64.sqrt();
        assert!((mid[0] - r).abs() < 1e-9 && (mid[1] - r).abs() < 1e-9);
        let end = arc.point_at(1.0, &target);
        assert!(vector::equal(&end, &target));
    }

    #[test]
    fn test_tangents() {
        let (arc, target) = quarter();
        let t0 = arc.start_tangent(&target);
        assert!((t0[1] - 1.0).abs() < 1e-9);
        let t1 = arc.end_tangent(&target);
        assert!((t1[0] + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_helix_advance() {
        let start = [10.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let target = [10.0, 0.0, 4.0, 0.0, 0.0, 0.0];
        let mut arc = ArcGeometry::new(Plane::XY, start, [0.0, 0.0], 10.0, -2.0 * PI);
        let full = arc.length(&target);
        assert!((full - (20.0 * PI).hypot(4.0)).abs() < 1e-9);
        arc.advance(0.25, &target);
        assert!((arc.start[2] - 1.0).abs() < 1e-9);
        assert!((arc.start[1] + 10.0).abs() < 1e-9);
        assert!((arc.length(&target) - 0.75 * full).abs() < 1e-9);
    }
}
