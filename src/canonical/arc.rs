// src/canonical/arc.rs - G2/G3 geometry and chord generation
use std::f64::consts::PI;

use krusty_shared::gcode::{GCodeState, Plane};
use krusty_shared::vector::AxisVector;
use krusty_shared::StatusCode;

use crate::planner::ArcGeometry;

/// Start and end radius may differ by this much before the arc is refused
/// (mm), unless within the relative tolerance below.
const ARC_RADIUS_ERROR_MAX: f64 = 0.5;
const ARC_RADIUS_ERROR_MIN: f64 = 0.005;
const ARC_RADIUS_TOLERANCE: f64 = 0.001;

/// Arc words of one block, already in millimeters.
#[derive(Debug, Clone, Default)]
pub struct ArcWords {
    /// I, J, K
    pub offsets: [f64; 3],
    pub offset_flags: [bool; 3],
    pub radius: Option<f64>,
    pub clockwise: bool,
}

/// Center offsets from the start point for the R form. Negative R selects
/// the arc longer than a half circle.
fn offsets_from_radius(
    plane: Plane,
    position: &AxisVector,
    target: &AxisVector,
    radius: f64,
    clockwise: bool,
) -> Result<(f64, f64), StatusCode> {
    let (a0, a1, _) = plane.axes();
    let x = target[a0] - position[a0];
    let y = target[a1] - position[a1];
    let chord = x.hypot(y);
    let disc = 4.0 * radius * radius - x * x - y * y;
    if chord == 0.0 || disc < 0.0 {
        return Err(StatusCode::ArcSpecificationError);
    }
    let mut h = -disc.sqrt() / chord;
    if !clockwise {
        h = -h;
    }
    if radius < 0.0 {
        h = -h;
    }
    Ok((0.5 * (x - y * h), 0.5 * (y + x * h)))
}

/// Resolve the arc from `position` to `target`.
pub fn compute_arc(
    plane: Plane,
    position: &AxisVector,
    target: &AxisVector,
    words: &ArcWords,
) -> Result<ArcGeometry, StatusCode> {
    let (a0, a1, _) = plane.axes();
    let (i, j) = match words.radius {
        Some(radius) => offsets_from_radius(plane, position, target, radius, words.clockwise)?,
        None => {
            if !words.offset_flags[a0] && !words.offset_flags[a1] {
                return Err(StatusCode::ArcSpecificationError);
            }
            (words.offsets[a0], words.offsets[a1])
        }
    };
    let radius = i.hypot(j);
    if radius == 0.0 {
        return Err(StatusCode::ArcSpecificationError);
    }
    let center = [position[a0] + i, position[a1] + j];
    let end_radius = (target[a0] - center[0]).hypot(target[a1] - center[1]);
    let error = (end_radius - radius).abs();
    if error > ARC_RADIUS_ERROR_MAX || (error > ARC_RADIUS_ERROR_MIN && error > ARC_RADIUS_TOLERANCE * radius) {
        tracing::warn!("Arc radius {:.4} ends at {:.4}", radius, end_radius);
        return Err(StatusCode::ArcRadiusOutOfTolerance);
    }

    let theta_start = (-j).atan2(-i);
    let theta_end = (target[a1] - center[1]).atan2(target[a0] - center[0]);
    let mut travel = theta_end - theta_start;
    // end == start is a full circle
    if words.clockwise {
        if travel >= -1e-9 {
            travel -= 2.0 * PI;
        }
    } else if travel <= 1e-9 {
        travel += 2.0 * PI;
    }
    Ok(ArcGeometry::new(plane, *position, center, radius, travel))
}

/// Number of chords: short enough to stay within the chordal tolerance,
/// clamped to the segment length bounds, and no more than the move time
/// can give each at least `min_chord_time`.
pub fn chord_count(
    length: f64,
    radius: f64,
    move_time: f64,
    chordal_tolerance: f64,
    bounds: (f64, f64),
    min_chord_time: f64,
) -> u32 {
    let tol = chordal_tolerance.min(radius);
    let chord = 2.0 * (2.0 * radius * tol - tol * tol).max(0.0).sqrt();
    let chord = chord.clamp(bounds.0, bounds.1);
    let by_length = (length / chord).ceil().max(1.0);
    let by_time = (move_time / min_chord_time).floor().max(1.0);
    by_length.min(by_time) as u32
}

/// Planned-mode arc in progress: chords are released one at a time as the
/// planner frees buffers.
#[derive(Debug, Clone)]
pub struct ArcRun {
    geometry: ArcGeometry,
    gm: GCodeState,
    segments: u32,
    segment: u32,
}

impl ArcRun {
    /// `gm` carries the arc's final target and its total move time.
    pub fn new(geometry: ArcGeometry, gm: GCodeState, segments: u32) -> Self {
        Self {
            geometry,
            gm,
            segments: segments.max(1),
            segment: 0,
        }
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }

    pub fn is_done(&self) -> bool {
        self.segment >= self.segments
    }

    /// State for the next chord, ending exactly on the arc target.
    pub fn next_chord(&mut self) -> Option<GCodeState> {
        if self.is_done() {
            return None;
        }
        self.segment += 1;
        let mut gm = self.gm.clone();
        if self.segment < self.segments {
            let fraction = self.segment as f64 / self.segments as f64;
            gm.target = self.geometry.point_at(fraction, &self.gm.target);
        }
        gm.move_time = self.gm.move_time / self.segments as f64;
        gm.minimum_time = self.gm.minimum_time / self.segments as f64;
        Some(gm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krusty_shared::vector;

    fn at(x: f64, y: f64, z: f64) -> AxisVector {
        [x, y, z, 0.0, 0.0, 0.0]
    }

    #[test]
    fn test_center_format_quarter() {
        let words = ArcWords {
            offsets: [-10.0, 0.0, 0.0],
            offset_flags: [true, true, false],
            clockwise: false,
            ..Default::default()
        };
        let arc = compute_arc(Plane::XY, &at(10.0, 0.0, 0.0), &at(0.0, 10.0, 0.0), &words).unwrap();
        assert!((arc.radius - 10.0).abs() < 1e-12);
        assert!((arc.angular_travel - PI / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_clockwise_is_the_long_way() {
        let words = ArcWords {
            offsets: [-10.0, 0.0, 0.0],
            offset_flags: [true, false, false],
            clockwise: true,
            ..Default::default()
        };
        let arc = compute_arc(Plane::XY, &at(10.0, 0.0, 0.0), &at(0.0, 10.0, 0.0), &words).unwrap();
        assert!((arc.angular_travel + 1.5 * PI).abs() < 1e-12);
    }

    #[test]
    fn test_full_circle() {
        let words = ArcWords {
            offsets: [5.0, 0.0, 0.0],
            offset_flags: [true, true, false],
            clockwise: true,
            ..Default::default()
        };
        let start = at(0.0, 0.0, 0.0);
        let arc = compute_arc(Plane::XY, &start, &start, &words).unwrap();
        assert!((arc.angular_travel + 2.0 * PI).abs() < 1e-9);
    }

    #[test]
    fn test_radius_format() {
        let start = at(0.0, 0.0, 0.0);
        let end = at(10.0, 0.0, 0.0);
        let short = ArcWords { radius: Some(10.0), clockwise: true, ..Default::default() };
        let long = ArcWords { radius: Some(-10.0), clockwise: true, ..Default::default() };
        let a = compute_arc(Plane::XY, &start, &end, &short).unwrap();
        let b = compute_arc(Plane::XY, &start, &end, &long).unwrap();
        assert!(a.angular_travel.abs() < PI);
        assert!(b.angular_travel.abs() > PI);
        assert!((a.angular_travel.abs() + b.angular_travel.abs() - 2.0 * PI).abs() < 1e-9);
        let p = a.point_at(1.0, &end);
        assert!(vector::length(&p, &end) < 1e-9);

        let too_small = ArcWords { radius: Some(4.0), clockwise: true, ..Default::default() };
        assert_eq!(
            compute_arc(Plane::XY, &start, &end, &too_small).unwrap_err(),
            StatusCode::ArcSpecificationError
        );
    }

    #[test]
    fn test_radius_mismatch() {
        let words = ArcWords {
            offsets: [-10.0, 0.0, 0.0],
            offset_flags: [true, true, false],
            clockwise: false,
            ..Default::default()
        };
        let err = compute_arc(Plane::XY, &at(10.0, 0.0, 0.0), &at(0.0, 11.0, 0.0), &words).unwrap_err();
        assert_eq!(err, StatusCode::ArcRadiusOutOfTolerance);
    }

    #[test]
    fn test_missing_plane_offsets() {
        let words = ArcWords {
            offsets: [0.0, 0.0, 3.0],
            offset_flags: [false, false, true],
            ..Default::default()
        };
        let err = compute_arc(Plane::XY, &at(0.0, 0.0, 0.0), &at(1.0, 1.0, 0.0), &words).unwrap_err();
        assert_eq!(err, StatusCode::ArcSpecificationError);
    }

    #[test]
    fn test_chords_end_on_target() {
        let words = ArcWords {
            offsets: [-10.0, 0.0, 0.0],
            offset_flags: [true, true, false],
            clockwise: false,
            ..Default::default()
        };
        let start = at(10.0, 0.0, 0.0);
        let end = at(0.0, 10.0, 2.0);
        let arc = compute_arc(Plane::XY, &start, &end, &words).unwrap();
        let mut gm = GCodeState::default();
        gm.target = end;
        gm.move_time = 0.1;
        let n = chord_count(arc.length(&end), arc.radius, gm.move_time, 0.01, (0.05, 2.0), 1e-4);
        assert!(n > 1);
        let mut run = ArcRun::new(arc, gm, n);
        let mut count = 0;
        let mut last = start;
        while let Some(chord) = run.next_chord() {
            count += 1;
            let r = chord.target[0].hypot(chord.target[1]);
            assert!((r - 10.0).abs() < 1e-9);
            assert!(chord.target[2] >= last[2]);
            last = chord.target;
        }
        assert_eq!(count, n);
        assert_eq!(last, end);
        assert!(run.is_done());
    }
}
