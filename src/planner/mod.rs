// src/planner/mod.rs - jerk-limited lookahead planner
//! Moves are queued into a fixed ring of buffers. Each new move replans the
//! queue backward (braking velocities) and forward (entry/exit/trapezoid)
//! so that every boundary velocity is reachable from both sides and the
//! newest move always ends at rest.

pub mod arc;
pub mod buffer;
pub mod junction;
pub mod zoid;

use krusty_shared::config::AxisConfig;
use krusty_shared::gcode::{GCodeState, PathControl};
use krusty_shared::vector::{self, fp_eq, AxisVector};
use krusty_shared::{Config, StatusCode, AXES};

pub use arc::ArcGeometry;
pub use buffer::{Buffer, BufferPool, BufferState, Coolant, MoveState, MoveType, Payload, SyncOp};
pub use junction::JunctionDeviation;
pub use zoid::{ZoidCase, ZoidConfig};

use zoid::{calculate_trapezoid, target_length, target_velocity};

#[derive(Debug, Clone)]
pub struct Planner {
    pool: BufferPool,
    /// Where the last queued move ends.
    position: AxisVector,
    axes: [AxisConfig; AXES],
    junction: JunctionDeviation,
    exact_path_factor: f64,
    zoid: ZoidConfig,
    min_move_length: f64,
    headroom: usize,
    exec_requested: bool,
}

impl Planner {
    pub fn new(config: &Config) -> Self {
        let axes = config.axes.to_array();
        Self {
            pool: BufferPool::new(config.planner.buffers),
            position: vector::zero(),
            junction: JunctionDeviation::new(&axes, config.machine.junction_acceleration),
            axes,
            exact_path_factor: config.machine.exact_path_factor,
            zoid: ZoidConfig::from_config(&config.planner),
            min_move_length: config.planner.min_move_length,
            headroom: config.planner.headroom,
            exec_requested: false,
        }
    }

    pub fn position(&self) -> &AxisVector {
        &self.position
    }

    pub fn set_position(&mut self, position: &AxisVector) {
        self.position = *position;
    }

    pub fn set_axis_position(&mut self, axis: usize, value: f64) {
        self.position[axis] = value;
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    pub fn available(&self) -> usize {
        self.pool.available()
    }

    /// Enough free buffers to accept another block.
    pub fn has_headroom(&self) -> bool {
        self.pool.available() > self.headroom
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Queued buffers from oldest to newest.
    pub fn queued(&self) -> Vec<&Buffer> {
        self.pool
            .queued_indices()
            .into_iter()
            .map(|i| self.pool.get(i))
            .collect()
    }

    /// Set when a commit should wake the runtime.
    pub fn take_exec_request(&mut self) -> bool {
        std::mem::take(&mut self.exec_requested)
    }

    /// Queue a straight feed or traverse to `gm.target`. Moves shorter than
    /// the minimum are rejected without touching the planner position.
    pub fn aline(&mut self, gm: &GCodeState) -> Result<(), StatusCode> {
        let length = vector::length(&gm.target, &self.position);
        if length < self.min_move_length {
            return Err(StatusCode::MinimumLengthMove);
        }
        let unit = vector::unit(&self.position, &gm.target);
        let jerk = self.line_jerk(&unit);
        let index = self.pool.get_write_buffer().ok_or(StatusCode::BufferFull)?;
        let bf = self.pool.get_mut(index);
        bf.payload = Payload::Line;
        bf.gm = gm.clone();
        bf.length = length;
        bf.unit = unit;
        bf.exit_unit = unit;
        bf.set_jerk(jerk);
        self.admit(index);
        self.position = gm.target;
        Ok(())
    }

    /// Queue a whole arc as one buffer.
    pub fn arc(&mut self, gm: &GCodeState, arc: ArcGeometry) -> Result<(), StatusCode> {
        let length = arc.length(&gm.target);
        if length < self.min_move_length {
            return Err(StatusCode::MinimumLengthMove);
        }
        let jerk = self.arc_jerk(&arc, &gm.target, length);
        let index = self.pool.get_write_buffer().ok_or(StatusCode::BufferFull)?;
        let bf = self.pool.get_mut(index);
        bf.unit = arc.start_tangent(&gm.target);
        bf.exit_unit = arc.end_tangent(&gm.target);
        bf.payload = Payload::Arc(arc);
        bf.gm = gm.clone();
        bf.length = length;
        bf.set_jerk(jerk);
        self.admit(index);
        self.position = gm.target;
        Ok(())
    }

    pub fn dwell(&mut self, gm: &GCodeState, seconds: f64) -> Result<(), StatusCode> {
        self.queue_stopped(gm, Payload::Dwell { seconds })
    }

    /// Queue an operation that runs when the runtime reaches it.
    pub fn queue_command(&mut self, gm: &GCodeState, op: SyncOp) -> Result<(), StatusCode> {
        self.queue_stopped(gm, Payload::Sync(op))
    }

    /// Non-motion buffers are never replanned, so motion before them always
    /// comes to rest.
    fn queue_stopped(&mut self, gm: &GCodeState, payload: Payload) -> Result<(), StatusCode> {
        let index = self.pool.get_write_buffer().ok_or(StatusCode::BufferFull)?;
        let bf = self.pool.get_mut(index);
        bf.payload = payload;
        bf.gm = gm.clone();
        bf.replannable = false;
        self.pool.commit_write_buffer();
        self.exec_requested = true;
        Ok(())
    }

    /// Drop everything queued. The caller re-syncs positions.
    pub fn flush(&mut self) {
        self.pool.flush();
        self.exec_requested = false;
    }

    /// Replan the whole queue after a feedhold. The head of the queue starts
    /// from rest because nothing runs before it.
    pub fn replan_from_rest(&mut self) {
        let queued = self.pool.queued_indices();
        let Some(&first) = queued.first() else {
            return;
        };
        for &index in &queued {
            let bf = self.pool.get_mut(index);
            if bf.payload.is_motion() && bf.gm.path_control != PathControl::ExactStop {
                bf.replannable = true;
            }
        }
        {
            let bf = self.pool.get_mut(first);
            if bf.payload.is_motion() {
                bf.entry_velocity = 0.0;
                bf.entry_vmax = 0.0;
                bf.delta_vmax = target_velocity(0.0, bf.length, bf.jerk);
                bf.exit_vmax = bf.exit_vmax.min(bf.cruise_vmax.min(bf.delta_vmax));
                bf.braking_velocity = bf.delta_vmax;
            }
        }
        // each run of motion ends at rest before a non-motion buffer
        for (n, &index) in queued.iter().enumerate() {
            let ends_run = queued
                .get(n + 1)
                .is_none_or(|&next| !self.pool.get(next).payload.is_motion());
            if self.pool.get(index).payload.is_motion() && ends_run {
                self.plan_block_list(index);
            }
        }
        tracing::debug!("Replanned {} buffers from rest", queued.len());
    }

    /// Tightest jerk any axis allows along `unit`.
    fn line_jerk(&self, unit: &AxisVector) -> f64 {
        let mut jerk = f64::INFINITY;
        for (u, axis) in unit.iter().zip(self.axes.iter()) {
            if u.abs() > vector::EPSILON {
                jerk = jerk.min(axis.jerk_max / u.abs());
            }
        }
        if jerk.is_finite() { jerk } else { self.axes[0].jerk_max }
    }

    fn arc_jerk(&self, arc: &ArcGeometry, target: &AxisVector, length: f64) -> f64 {
        let (a0, a1, _) = arc.plane.axes();
        let mut jerk = self.axes[a0].jerk_max.min(self.axes[a1].jerk_max);
        for (i, axis) in self.axes.iter().enumerate() {
            if i == a0 || i == a1 {
                continue;
            }
            let share = (target[i] - arc.start[i]).abs() / length;
            if share > vector::EPSILON {
                jerk = jerk.min(axis.jerk_max / share);
            }
        }
        jerk
    }

    /// Set the velocity limits of a freshly loaded motion buffer, replan and
    /// commit it.
    fn admit(&mut self, index: usize) {
        let prev = self.pool.get(self.pool.prev(index));
        let prev_limits = (prev.state.is_occupied() && prev.payload.is_motion())
            .then(|| (prev.exit_unit, prev.exit_vmax, prev.cruise_vmax));

        let bf = self.pool.get(index);
        let exact_stop = bf.gm.path_control == PathControl::ExactStop;
        let scale = if bf.gm.path_control == PathControl::ExactPath {
            self.exact_path_factor
        } else {
            1.0
        };
        let cruise_vmax = if bf.gm.move_time > 0.0 {
            bf.length / bf.gm.move_time
        } else {
            tracing::warn!("Move on line {} has no move time, using axis limits", bf.gm.line_number);
            self.axes.iter().map(|a| a.feedrate_max).fold(f64::INFINITY, f64::min)
        };
        let junction = match prev_limits {
            Some((exit_unit, exit_vmax, prev_cruise)) => self
                .junction
                .velocity(&exit_unit, &bf.unit, scale)
                .min(exit_vmax)
                .min(prev_cruise),
            None => 0.0,
        };
        let delta_vmax = target_velocity(0.0, bf.length, bf.jerk);

        let bf = self.pool.get_mut(index);
        bf.replannable = !exact_stop;
        bf.cruise_vmax = cruise_vmax;
        bf.delta_vmax = delta_vmax;
        if exact_stop {
            bf.entry_vmax = 0.0;
            bf.exit_vmax = 0.0;
        } else {
            bf.entry_vmax = cruise_vmax.min(junction);
            bf.exit_vmax = cruise_vmax.min(bf.entry_vmax + delta_vmax);
        }
        bf.braking_velocity = delta_vmax;

        self.plan_block_list(index);
        self.pool.commit_write_buffer();
        self.exec_requested = true;
    }

    /// Two-pass replan ending at `newest`, which is planned to stop.
    fn plan_block_list(&mut self, newest: usize) {
        let mut bp = newest;
        loop {
            let pv = self.pool.prev(bp);
            if pv == newest || !self.pool.get(pv).replannable {
                break;
            }
            bp = pv;
            let nx = self.pool.get(self.pool.next(bp));
            let limit = nx.entry_vmax.min(nx.braking_velocity);
            let b = self.pool.get_mut(bp);
            b.braking_velocity = target_velocity(limit, b.length, b.jerk);
        }
        while bp != newest {
            self.plan_buffer(bp, false);
            bp = self.pool.next(bp);
        }
        self.plan_buffer(newest, true);
    }

    fn plan_buffer(&mut self, index: usize, last: bool) {
        let prev = self.pool.get(self.pool.prev(index));
        let head_of_queue = self.pool.run_index() == Some(index) || !prev.state.is_occupied();
        let (prev_exit, prev_replannable) = if head_of_queue {
            (None, false)
        } else {
            (Some(prev.exit_velocity), prev.replannable)
        };
        let nx = self.pool.get(self.pool.next(index));
        let (nx_entry_vmax, nx_braking) = (nx.entry_vmax, nx.braking_velocity);

        let zoid = self.zoid;
        let bf = self.pool.get_mut(index);
        if bf.move_state == MoveState::Run {
            if !last {
                raise_running_exit(bf, nx_entry_vmax, nx_braking);
            }
            return;
        }
        // the head of the queue enters at the exit of the move before it
        let entry = prev_exit.unwrap_or(bf.entry_velocity);
        bf.entry_velocity = entry;
        bf.cruise_velocity = bf.cruise_vmax;
        if last {
            bf.exit_velocity = 0.0;
            calculate_trapezoid(bf, &zoid);
            return;
        }
        let reachable = target_velocity(entry, bf.length, bf.jerk);
        bf.exit_velocity = bf.exit_vmax.min(nx_entry_vmax).min(nx_braking).min(reachable);
        calculate_trapezoid(bf, &zoid);

        // later arrivals cannot improve a buffer already at one of its caps
        let exit = bf.exit_velocity;
        if fp_eq(exit, bf.exit_vmax)
            || fp_eq(exit, nx_entry_vmax)
            || (!prev_replannable && fp_eq(exit, reachable))
        {
            bf.replannable = false;
        }
    }
}

/// The runtime has started this buffer, so its entry, head and cruise are
/// spoken for. Until the tail begins only the exit may rise, which shortens
/// the tail and lengthens the body.
fn raise_running_exit(bf: &mut Buffer, nx_entry_vmax: f64, nx_braking: f64) {
    if bf.zoid == ZoidCase::ForceFit {
        bf.replannable = false;
        return;
    }
    let exit = bf.exit_vmax.min(nx_entry_vmax).min(nx_braking).min(bf.cruise_velocity);
    if exit > bf.exit_velocity {
        bf.exit_velocity = exit;
        bf.tail_length = target_length(bf.cruise_velocity, exit, bf.jerk);
        bf.body_length = (bf.length - bf.head_length - bf.tail_length).max(0.0);
    }
    if fp_eq(exit, bf.exit_vmax) || fp_eq(exit, nx_entry_vmax) || fp_eq(exit, bf.cruise_velocity) {
        bf.replannable = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krusty_shared::gcode::PathControl;

    fn gm_to(target: [f64; 3], feed: f64, from: &AxisVector) -> GCodeState {
        let mut gm = GCodeState::default();
        gm.target[..3].copy_from_slice(&target);
        gm.feed_rate = feed;
        gm.move_time = vector::length(&gm.target, from) / feed;
        gm
    }

    fn queue(planner: &mut Planner, target: [f64; 3], feed: f64) {
        let gm = gm_to(target, feed, &planner.position().clone());
        planner.aline(&gm).unwrap();
    }

    #[test]
    fn test_single_move_starts_and_ends_at_rest() {
        let mut planner = Planner::new(&Config::default());
        queue(&mut planner, [100.0, 0.0, 0.0], 1000.0);
        let queued = planner.queued();
        assert_eq!(queued.len(), 1);
        let bf = queued[0];
        assert_eq!(bf.entry_velocity, 0.0);
        assert_eq!(bf.exit_velocity, 0.0);
        assert!((bf.cruise_velocity - 1000.0).abs() < 1e-9);
        assert!(planner.take_exec_request());
        assert!(!planner.take_exec_request());
        assert_eq!(planner.position()[0], 100.0);
    }

    #[test]
    fn test_collinear_moves_blend() {
        let mut planner = Planner::new(&Config::default());
        for i in 1..=4 {
            queue(&mut planner, [10.0 * i as f64, 0.0, 0.0], 2000.0);
        }
        let queued = planner.queued();
        for pair in queued.windows(2) {
            assert!((pair[0].exit_velocity - pair[1].entry_velocity).abs() < 1e-6);
            assert!(pair[0].exit_velocity > 0.0);
        }
        assert_eq!(queued[3].exit_velocity, 0.0);
        for bf in &queued {
            let total = bf.head_length + bf.body_length + bf.tail_length;
            assert!((total - bf.length).abs() < 1e-9);
            assert!(bf.cruise_velocity >= bf.entry_velocity.max(bf.exit_velocity) - 1e-9);
        }
    }

    #[test]
    fn test_exact_stop_stops_at_every_boundary() {
        let mut planner = Planner::new(&Config::default());
        for i in 1..=3 {
            let mut gm = gm_to([10.0 * i as f64, 0.0, 0.0], 2000.0, &planner.position().clone());
            gm.path_control = PathControl::ExactStop;
            planner.aline(&gm).unwrap();
        }
        for bf in planner.queued() {
            assert_eq!(bf.entry_velocity, 0.0);
            assert_eq!(bf.exit_velocity, 0.0);
        }
    }

    #[test]
    fn test_reversal_stops_at_junction() {
        let mut planner = Planner::new(&Config::default());
        queue(&mut planner, [10.0, 0.0, 0.0], 2000.0);
        queue(&mut planner, [0.0, 0.0, 0.0], 2000.0);
        let queued = planner.queued();
        assert_eq!(queued[0].exit_velocity, 0.0);
        assert_eq!(queued[1].entry_velocity, 0.0);
    }

    #[test]
    fn test_short_move_rejected() {
        let mut planner = Planner::new(&Config::default());
        let gm = gm_to([0.00005, 0.0, 0.0], 1000.0, &vector::zero());
        assert_eq!(planner.aline(&gm), Err(StatusCode::MinimumLengthMove));
        assert!(planner.is_empty());
        assert_eq!(planner.position()[0], 0.0);
    }

    #[test]
    fn test_command_between_moves_forces_stop() {
        let mut planner = Planner::new(&Config::default());
        queue(&mut planner, [10.0, 0.0, 0.0], 2000.0);
        planner
            .queue_command(&GCodeState::default(), SyncOp::CoolantOff)
            .unwrap();
        queue(&mut planner, [20.0, 0.0, 0.0], 2000.0);
        let queued = planner.queued();
        assert_eq!(queued.len(), 3);
        assert_eq!(queued[0].exit_velocity, 0.0);
        assert_eq!(queued[1].move_type(), MoveType::Command);
        assert_eq!(queued[2].entry_velocity, 0.0);
    }

    #[test]
    fn test_full_queue_rejects() {
        let mut planner = Planner::new(&Config::default());
        for i in 1..=28 {
            queue(&mut planner, [i as f64, 0.0, 0.0], 1000.0);
        }
        assert!(!planner.has_headroom());
        let gm = gm_to([40.0, 0.0, 0.0], 1000.0, &planner.position().clone());
        assert_eq!(planner.aline(&gm), Err(StatusCode::BufferFull));
    }

    #[test]
    fn test_replan_from_rest_after_trim() {
        let mut planner = Planner::new(&Config::default());
        for i in 1..=3 {
            queue(&mut planner, [20.0 * i as f64, 0.0, 0.0], 3000.0);
        }
        let run = planner.pool_mut().get_run_buffer().unwrap();
        planner.pool_mut().get_mut(run).replannable = false;
        planner.pool_mut().get_mut(run).trim_front(12.0);
        planner.replan_from_rest();
        let queued = planner.queued();
        assert!((queued[0].length - 8.0).abs() < 1e-9);
        assert_eq!(queued[0].entry_velocity, 0.0);
        assert!((queued[0].exit_velocity - queued[1].entry_velocity).abs() < 1e-6);
        assert_eq!(queued[2].exit_velocity, 0.0);
    }

    #[test]
    fn test_running_move_exit_rises_until_locked() {
        let mut planner = Planner::new(&Config::default());
        queue(&mut planner, [50.0, 0.0, 0.0], 1000.0);
        let run = planner.pool_mut().get_run_buffer().unwrap();
        planner.pool_mut().get_mut(run).move_state = MoveState::Run;
        let started = planner.pool().get(run).clone();
        assert_eq!(started.exit_velocity, 0.0);

        queue(&mut planner, [100.0, 0.0, 0.0], 1000.0);
        let bf = planner.pool().get(run);
        assert_eq!(bf.entry_velocity, started.entry_velocity);
        assert_eq!(bf.cruise_velocity, started.cruise_velocity);
        assert_eq!(bf.head_length, started.head_length);
        assert!((bf.exit_velocity - 1000.0).abs() < 1e-9);
        assert!(bf.tail_length.abs() < 1e-9);
        assert!((bf.head_length + bf.body_length - 50.0).abs() < 1e-9);
        assert_eq!(planner.queued()[1].entry_velocity, bf.exit_velocity);
    }

    #[test]
    fn test_locked_running_move_is_left_alone() {
        let mut planner = Planner::new(&Config::default());
        queue(&mut planner, [50.0, 0.0, 0.0], 1000.0);
        let run = planner.pool_mut().get_run_buffer().unwrap();
        let bf = planner.pool_mut().get_mut(run);
        bf.move_state = MoveState::Run;
        bf.replannable = false;

        queue(&mut planner, [100.0, 0.0, 0.0], 1000.0);
        let queued = planner.queued();
        assert_eq!(queued[0].exit_velocity, 0.0);
        assert_eq!(queued[1].entry_velocity, 0.0);
    }

    #[test]
    fn test_head_of_queue_keeps_its_entry() {
        let mut planner = Planner::new(&Config::default());
        queue(&mut planner, [50.0, 0.0, 0.0], 1000.0);
        queue(&mut planner, [100.0, 0.0, 0.0], 1000.0);
        planner.pool_mut().get_run_buffer().unwrap();
        planner.pool_mut().free_run_buffer();

        queue(&mut planner, [150.0, 0.0, 0.0], 1000.0);
        let queued = planner.queued();
        assert_eq!(queued.len(), 2);
        assert!((queued[0].entry_velocity - 1000.0).abs() < 1e-9);
        assert!((queued[0].exit_velocity - 1000.0).abs() < 1e-9);
        assert_eq!(queued[1].exit_velocity, 0.0);
    }
}
