// src/planner/zoid.rs - jerk-limited velocity math and the trapezoid solver
/// Velocity profiles are built from S-curve halves of constant jerk. Going
/// from `v0` to `v1` at jerk `J` takes `2*sqrt(|v1-v0|/J)` minutes and covers
/// `(v0+v1)*sqrt(|v1-v0|/J)`, which is what every length and velocity
/// function below is built on.
use krusty_shared::config::PlannerConfig;
use krusty_shared::vector::fp_zero;

use super::buffer::Buffer;

const NEWTON_ITERATIONS: usize = 8;
const BISECTION_ITERATIONS: usize = 64;

/// Which regions the solver ended up using for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoidCase {
    #[default]
    Unplanned,
    /// Too short to execute at its entry/exit velocities; one forced segment.
    ForceFit,
    /// Fits in a single nominal segment.
    SingleSegment,
    BodyOnly,
    HeadOnly,
    TailOnly,
    /// Rate-limited: never reaches the requested cruise.
    HeadTail,
    /// Requested-fit: head, body and tail (some possibly empty).
    HeadBodyTail,
}

#[derive(Debug, Clone, Copy)]
pub struct ZoidConfig {
    /// Minutes.
    pub nominal_segment_time: f64,
    /// Minutes.
    pub min_segment_time: f64,
    pub velocity_tolerance: f64,
    pub iteration_max: u32,
    pub iteration_error: f64,
}

impl ZoidConfig {
    pub fn from_config(planner: &PlannerConfig) -> Self {
        Self {
            nominal_segment_time: planner.nominal_segment_time(),
            min_segment_time: planner.min_segment_time(),
            velocity_tolerance: planner.velocity_tolerance,
            iteration_max: planner.iteration_max,
            iteration_error: planner.iteration_error,
        }
    }
}

/// Distance needed to change velocity between `v0` and `v1`.
pub fn target_length(v0: f64, v1: f64, jerk: f64) -> f64 {
    (v0 + v1) * ((v1 - v0).abs() / jerk).sqrt()
}

/// Highest velocity reachable from `v0` over `length` (Newton-Raphson on
/// the length equation, starting from an estimate that is never below the
/// root so the iteration converges from above).
pub fn target_velocity(v0: f64, length: f64, jerk: f64) -> f64 {
    if length <= 0.0 {
        return v0;
    }
    let l2 = length * length;
    let mut v1 = length.powf(2.0 / 3.0) * jerk.cbrt() + v0;
    for _ in 0..NEWTON_ITERATIONS {
        let f = (v1 - v0) * (v0 + v1) * (v0 + v1) / l2 - jerk;
        let df = (v0 + v1) * (3.0 * v1 - v0) / l2;
        if df <= 0.0 {
            break;
        }
        let next = v1 - f / df;
        let done = (next - v1).abs() <= 1e-9 * v1.max(1.0);
        v1 = next;
        if done {
            break;
        }
    }
    v1.max(v0)
}

/// Lowest velocity a decel from `v` can reach within `length`. Zero when a
/// full stop fits.
pub fn decel_velocity(v: f64, length: f64, jerk: f64) -> f64 {
    if v <= 0.0 || target_length(v, 0.0, jerk) <= length {
        return 0.0;
    }
    let jl2 = jerk * length * length;
    let (mut lo, mut hi) = (0.0, v);
    for _ in 0..BISECTION_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        if (v - mid) * (v + mid) * (v + mid) > jl2 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    hi
}

fn body_only(bf: &mut Buffer, case: ZoidCase) {
    bf.head_length = 0.0;
    bf.body_length = bf.length;
    bf.tail_length = 0.0;
    bf.zoid = case;
}

/// Fill in head/body/tail lengths and the cruise velocity of a buffer whose
/// `entry_velocity`, `cruise_velocity` (requested) and `exit_velocity` are
/// set. Lengths always sum to the buffer length. Entry velocity is only
/// lowered in the degraded tail-only case, and then only by rounding.
pub fn calculate_trapezoid(bf: &mut Buffer, cfg: &ZoidConfig) {
    let length = bf.length;
    let jerk = bf.jerk;
    bf.head_length = 0.0;
    bf.body_length = 0.0;
    bf.tail_length = 0.0;
    if length <= 0.0 {
        bf.zoid = ZoidCase::BodyOnly;
        return;
    }

    let average = bf.entry_velocity + bf.exit_velocity;
    let naive_time = if average > 0.0 { 2.0 * length / average } else { f64::INFINITY };

    // too short to run at the velocities it must join at
    if naive_time < cfg.min_segment_time {
        bf.cruise_velocity = (length / cfg.min_segment_time).min(bf.cruise_vmax);
        body_only(bf, ZoidCase::ForceFit);
        tracing::debug!("Force-fit move of {:.5}mm at {:.1}mm/min", length, bf.cruise_velocity);
        return;
    }
    if naive_time <= cfg.nominal_segment_time {
        bf.cruise_velocity = bf.entry_velocity.max(bf.exit_velocity);
        body_only(bf, ZoidCase::SingleSegment);
        return;
    }

    let tolerance = cfg.velocity_tolerance;
    if bf.cruise_velocity - bf.entry_velocity < tolerance && bf.cruise_velocity - bf.exit_velocity < tolerance {
        body_only(bf, ZoidCase::BodyOnly);
        return;
    }

    let min_body = cfg.min_segment_time * bf.cruise_velocity;
    let min_length = target_length(bf.entry_velocity, bf.exit_velocity, jerk);

    if length <= min_length + min_body {
        if bf.entry_velocity > bf.exit_velocity + tolerance {
            if length < min_length {
                let entry = target_velocity(bf.exit_velocity, length, jerk);
                tracing::debug!("Tail-only move lowers entry {:.3} -> {:.3}", bf.entry_velocity, entry);
                bf.entry_velocity = entry;
            }
            bf.cruise_velocity = bf.entry_velocity;
            bf.tail_length = length;
            bf.zoid = ZoidCase::TailOnly;
            return;
        }
        if bf.exit_velocity > bf.entry_velocity + tolerance {
            if length < min_length {
                bf.exit_velocity = target_velocity(bf.entry_velocity, length, jerk);
            }
            bf.cruise_velocity = bf.exit_velocity;
            bf.head_length = length;
            bf.zoid = ZoidCase::HeadOnly;
            return;
        }
    }

    let mut head = target_length(bf.entry_velocity, bf.cruise_velocity, jerk);
    let mut tail = target_length(bf.exit_velocity, bf.cruise_velocity, jerk);
    let min_head = cfg.min_segment_time * (bf.cruise_velocity + bf.entry_velocity);
    let min_tail = cfg.min_segment_time * (bf.cruise_velocity + bf.exit_velocity);
    if head < min_head {
        head = 0.0;
    }
    if tail < min_tail {
        tail = 0.0;
    }

    if length < head + tail {
        rate_limited(bf, cfg);
        return;
    }

    let mut body = length - head - tail;
    if body > 0.0 && body < min_body && (head > 0.0 || tail > 0.0) {
        // fold a body too short to execute into the head and tail
        if head > 0.0 && tail > 0.0 {
            head += body / 2.0;
            tail = length - head;
        } else if head > 0.0 {
            head = length - tail;
        } else {
            tail = length - head;
        }
        body = 0.0;
    }
    if fp_zero(head) && fp_zero(tail) {
        bf.cruise_velocity = bf.entry_velocity.max(bf.exit_velocity);
    }
    bf.head_length = head;
    bf.body_length = body;
    bf.tail_length = tail;
    bf.zoid = ZoidCase::HeadBodyTail;
}

/// Head and tail meet before reaching the requested cruise velocity.
fn rate_limited(bf: &mut Buffer, cfg: &ZoidConfig) {
    let length = bf.length;
    let jerk = bf.jerk;
    let entry = bf.entry_velocity;
    let exit = bf.exit_velocity;

    if (entry - exit).abs() < cfg.velocity_tolerance {
        let cruise = target_velocity(entry.max(exit), length / 2.0, jerk).min(bf.cruise_vmax);
        let min_head = cfg.min_segment_time * (cruise + entry);
        if length / 2.0 < min_head {
            bf.cruise_velocity = entry.max(exit);
            body_only(bf, ZoidCase::BodyOnly);
            return;
        }
        bf.cruise_velocity = cruise;
        bf.head_length = length / 2.0;
        bf.tail_length = length - bf.head_length;
        bf.zoid = ZoidCase::HeadTail;
        return;
    }

    // bracket the cruise between the higher end velocity and the request
    let overshoot = |cruise: f64| target_length(entry, cruise, jerk) + target_length(exit, cruise, jerk) - length;
    let mut lo = entry.max(exit);
    let mut hi = bf.cruise_velocity.max(lo);
    if overshoot(lo) > 0.0 {
        tracing::warn!(
            "Rate-limited move of {:.4}mm cannot join {:.2} and {:.2}, falling back to one region",
            length, entry, exit
        );
        if entry > exit {
            bf.cruise_velocity = entry;
            bf.tail_length = length;
            bf.zoid = ZoidCase::TailOnly;
        } else {
            bf.cruise_velocity = exit;
            bf.head_length = length;
            bf.zoid = ZoidCase::HeadOnly;
        }
        return;
    }
    let mut converged = false;
    for _ in 0..cfg.iteration_max {
        let mid = 0.5 * (lo + hi);
        if overshoot(mid) <= 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if (hi - lo) <= cfg.iteration_error * hi {
            converged = true;
            break;
        }
    }
    if !converged {
        tracing::warn!("Rate-limited cruise search stopped at {:.3}mm/min", lo);
    }

    let cruise = lo;
    let mut head = target_length(entry, cruise, jerk);
    let min_head = cfg.min_segment_time * (cruise + entry);
    let min_tail = cfg.min_segment_time * (cruise + exit);
    if head < min_head {
        head = 0.0;
    }
    let mut tail = length - head;
    if tail < min_tail {
        tail = 0.0;
        head = length;
    }
    bf.cruise_velocity = cruise;
    bf.head_length = head;
    bf.tail_length = tail;
    bf.zoid = ZoidCase::HeadTail;
}
