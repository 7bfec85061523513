// krusty_shared/src/vector.rs - fixed-size axis vectors and float comparisons

use crate::axis::AXES;

pub type AxisVector = [f64; AXES];

/// Comparisons below this are treated as equal.
pub const EPSILON: f64 = 0.00001;

pub fn fp_zero(a: f64) -> bool {
    a.abs() < EPSILON
}

pub fn fp_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

pub fn zero() -> AxisVector {
    [0.0; AXES]
}

pub fn length(a: &AxisVector, b: &AxisVector) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Unit vector from `start` to `end`, or zeros when the points coincide.
pub fn unit(start: &AxisVector, end: &AxisVector) -> AxisVector {
    let distance = length(start, end);
    let mut unit = zero();
    if distance > 0.0 {
        for (i, u) in unit.iter_mut().enumerate() {
            *u = (end[i] - start[i]) / distance;
        }
    }
    unit
}

pub fn dot(a: &AxisVector, b: &AxisVector) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn equal(a: &AxisVector, b: &AxisVector) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| fp_eq(*x, *y))
}

/// `origin + direction * distance`
pub fn offset_along(origin: &AxisVector, direction: &AxisVector, distance: f64) -> AxisVector {
    let mut out = *origin;
    for (i, v) in out.iter_mut().enumerate() {
        *v += direction[i] * distance;
    }
    out
}
