// Planner and executor invariants checked over fixed and randomized programs

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use krusty_cnc::canonical::state::HoldState;
use krusty_cnc::canonical::CanonicalMachine;
use krusty_cnc::executor::{Phase, SegmentRecord};
use krusty_cnc::gcode::{execute_block, GCodeBlock};
use krusty_cnc::planner::{Buffer, Planner, ZoidCase};
use krusty_cnc::Machine;
use krusty_shared::Config;

const MAX_TICKS: u64 = 5_000_000;

fn run_line(cm: &mut CanonicalMachine, planner: &mut Planner, line: &str) {
    let block = GCodeBlock::parse(line).unwrap().unwrap();
    execute_block(&block, cm, planner).unwrap();
}

fn assert_regions_fill_length(queued: &[&Buffer]) {
    for bf in queued.iter().filter(|b| b.payload.is_motion()) {
        let total = bf.head_length + bf.body_length + bf.tail_length;
        assert!(
            (total - bf.length).abs() <= 1e-6 * bf.length.max(1e-3),
            "{:?}: {} + {} + {} != {}",
            bf.zoid, bf.head_length, bf.body_length, bf.tail_length, bf.length
        );
    }
}

fn assert_velocities_join(queued: &[&Buffer]) {
    for pair in queued.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if !a.payload.is_motion() || !b.payload.is_motion() {
            continue;
        }
        assert!(
            (a.exit_velocity - b.entry_velocity).abs() <= 1e-6 * a.exit_velocity.max(1.0),
            "exit {} != entry {}",
            a.exit_velocity, b.entry_velocity
        );
    }
}

fn assert_within_limits(queued: &[&Buffer]) {
    for bf in queued.iter().filter(|b| b.payload.is_motion()) {
        let slack = 1e-6 * bf.cruise_vmax.max(1.0);
        assert!(bf.cruise_velocity <= bf.cruise_vmax + slack);
        assert!(bf.entry_velocity <= bf.entry_vmax + slack);
        assert!(bf.exit_velocity <= bf.exit_vmax + slack);
        if bf.zoid == ZoidCase::ForceFit {
            continue;
        }
        assert!(bf.entry_velocity <= bf.cruise_velocity + slack);
        assert!(bf.exit_velocity <= bf.cruise_velocity + slack);
    }
}

fn random_program(seed: u64, moves: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut lines = Vec::with_capacity(moves);
    for n in 1..=moves {
        let x: f64 = rng.random_range(0.0..40.0);
        let y: f64 = rng.random_range(0.0..40.0);
        let line = if rng.random_bool(0.2) {
            format!("N{} G0 X{:.3} Y{:.3}", n, x, y)
        } else {
            let z: f64 = rng.random_range(0.0..5.0);
            let feed: f64 = rng.random_range(2000.0..12000.0);
            format!("N{} G1 X{:.3} Y{:.3} Z{:.3} F{:.0}", n, x, y, z, feed)
        };
        lines.push(line);
    }
    lines
}

#[test]
fn test_queue_invariants_hold_after_every_admission() {
    let config = Config::default();
    for seed in 0..8 {
        let mut cm = CanonicalMachine::new(&config);
        let mut planner = Planner::new(&config);
        for line in random_program(seed, 20) {
            run_line(&mut cm, &mut planner, &line);
            let queued = planner.queued();
            assert_regions_fill_length(&queued);
            assert_velocities_join(&queued);
            assert_within_limits(&queued);
            let last = queued.last().unwrap();
            assert_eq!(last.exit_velocity, 0.0);
        }
    }
}

#[test]
fn test_sync_command_stops_motion_before_it() {
    let config = Config::default();
    let mut cm = CanonicalMachine::new(&config);
    let mut planner = Planner::new(&config);
    for line in ["G1 X10 F3000", "G1 X20", "M8", "G1 X30", "G1 X40"] {
        run_line(&mut cm, &mut planner, line);
    }
    let queued = planner.queued();
    assert_eq!(queued[1].exit_velocity, 0.0);
    assert_eq!(queued[3].entry_velocity, 0.0);
    assert_velocities_join(&queued);
}

/// Second difference of velocity between consecutive samples of one ramp
/// is bounded by `jerk * dt^2`.
fn assert_jerk_bounded(log: &[SegmentRecord], jerk: f64) {
    let ramp = |p: Phase| match p {
        Phase::Head1 | Phase::Head2 => 1,
        Phase::Tail1 | Phase::Tail2 => 2,
        _ => 0,
    };
    let mut checked = 0;
    for w in log.windows(3) {
        let (a, b, c) = (&w[0], &w[1], &w[2]);
        let group = ramp(b.phase);
        if group == 0 || ramp(a.phase) != group || ramp(c.phase) != group {
            continue;
        }
        if a.line != b.line || b.line != c.line || w.iter().any(|s| s.forced || s.hold) {
            continue;
        }
        let dt = b.time;
        if (a.time - dt).abs() > 1e-9 * dt || (c.time - dt).abs() > 1e-9 * dt {
            continue;
        }
        let second = (c.velocity - 2.0 * b.velocity + a.velocity).abs();
        let bound = jerk * dt * dt;
        assert!(
            second <= bound * (1.0 + 1e-6) + 1e-9,
            "line {}: {} > {}",
            b.line, second, bound
        );
        checked += 1;
    }
    assert!(checked > 0);
}

#[test]
fn test_segment_jerk_stays_within_limit() {
    let config = Config::default();
    let jerk = config.axes.x.jerk_max;
    let mut machine = Machine::new(config);
    machine.runtime_mut().enable_segment_log();
    machine.submit("N1 G1 X20 F3000\nN2 X25 F800\nN3 X60 F6000\nN4 X55\nN5 X56 F200\nN6 G0 X0");
    assert!(machine.run_until_idle(MAX_TICKS));
    assert_jerk_bounded(machine.runtime().segment_log(), jerk);
}

fn assert_on_model_position(machine: &Machine) {
    let model = *machine.cm().position();
    let runtime = machine.runtime().position();
    let kinematics = machine.kinematics();
    let expected = kinematics.steps(&model, &[0; krusty_shared::MOTORS]);
    assert_eq!(machine.pipeline().position(), expected);
    for motor in 0..4 {
        let half_step = 0.5 / kinematics.steps_per_unit(motor).unwrap();
        assert!((runtime[motor] - model[motor]).abs() <= half_step);
    }
}

#[test]
fn test_program_ends_on_model_position() {
    for seed in [3, 11] {
        let mut machine = Machine::new(Config::default());
        machine.submit(&random_program(seed, 25).join("\n"));
        assert!(machine.run_until_idle(MAX_TICKS));
        assert_on_model_position(&machine);
    }
}

#[test]
fn test_feedhold_does_not_change_final_position() {
    let program = "G1 X30 Y5 F4000\nG1 X10 Y25\nG2 X20 Y35 I10 J0\nG1 X0 Y0 Z3 F6000";

    let mut plain = Machine::new(Config::default());
    plain.submit(program);
    assert!(plain.run_until_idle(MAX_TICKS));

    let mut held = Machine::new(Config::default());
    let requests = held.requests();
    held.submit(program);
    assert!(held.run_until(MAX_TICKS, |m| m.runtime().position()[0] >= 15.0));
    requests.request_feedhold();
    assert!(held.run_until(MAX_TICKS, |m| m.status().hold_state == HoldState::Hold));
    assert!(held.run_until(MAX_TICKS, |m| !m.pipeline().is_busy()));
    requests.request_cycle_start();
    assert!(held.run_until_idle(MAX_TICKS));

    assert_eq!(held.pipeline().position(), plain.pipeline().position());
    for axis in 0..3 {
        assert!((held.runtime().position()[axis] - plain.runtime().position()[axis]).abs() < 1e-9);
    }
    assert_on_model_position(&held);
}

#[test]
fn test_inch_round_trip_matches_millimeters() {
    let config = Config::default();
    let mut inches = CanonicalMachine::new(&config);
    let mut planner_in = Planner::new(&config);
    let mut millimeters = CanonicalMachine::new(&config);
    let mut planner_mm = Planner::new(&config);

    let inch_program = ["G20 G1 X1 Y2 F10", "G21 G1 Z5.08", "G20 G1 X2", "G91 G1 Y-0.5", "G21 G90 G0 X60"];
    let mm_program = ["G1 X25.4 Y50.8 F254", "G1 Z5.08", "G1 X50.8", "G1 Y38.1", "G0 X60"];
    for (a, b) in inch_program.iter().zip(mm_program.iter()) {
        run_line(&mut inches, &mut planner_in, a);
        run_line(&mut millimeters, &mut planner_mm, b);
        for axis in 0..3 {
            assert!((inches.position()[axis] - millimeters.position()[axis]).abs() < 1e-3);
        }
    }
    for (a, b) in planner_in.queued().iter().zip(planner_mm.queued().iter()) {
        assert!((a.gm.move_time - b.gm.move_time).abs() < 1e-9);
    }
}

#[test]
fn test_replanning_keeps_started_part_of_running_move() {
    let mut machine = Machine::new(Config::default());
    machine.submit("G1 X10 F1000");
    assert!(machine.run_until(MAX_TICKS, |m| m.runtime().is_running()));
    let pool = machine.planner().pool();
    let run = pool.run_index().unwrap();
    let before = pool.get(run).clone();
    assert_eq!(before.exit_velocity, 0.0);

    machine.submit("G1 X20\nG1 X30\nG1 X30 Y10");
    assert!(machine.run_until(MAX_TICKS, |m| m.pending_lines() == 0));
    assert!(machine.runtime().is_running());
    let pool = machine.planner().pool();
    assert_eq!(pool.run_index(), Some(run));
    let after = pool.get(run);
    assert_eq!(after.entry_velocity, before.entry_velocity);
    assert_eq!(after.cruise_velocity, before.cruise_velocity);
    assert_eq!(after.head_length, before.head_length);
    assert!(after.exit_velocity > 0.0);
    assert!(after.exit_velocity <= after.cruise_velocity);
    assert!(machine.planner().queued().len() >= 3);
    assert!(machine.run_until_idle(MAX_TICKS));
    assert_eq!(machine.runtime().position()[..2], [30.0, 10.0]);
}

#[test]
fn test_running_move_is_frozen_once_its_tail_starts() {
    let mut config = Config::default();
    config.axes.x.jerk_max = 1.0e6;
    let mut machine = Machine::new(config);
    machine.submit("G1 X100 F1000");
    // the tail from 1000mm/min takes close to four seconds at this jerk
    assert!(machine.run_until(MAX_TICKS, |m| m.runtime().phase() == Phase::Tail2));
    let run = machine.planner().pool().run_index().unwrap();

    machine.submit("G1 X200");
    assert!(machine.run_until(MAX_TICKS, |m| m.pending_lines() == 0));
    let pool = machine.planner().pool();
    assert_eq!(pool.run_index(), Some(run));
    assert_eq!(pool.get(run).exit_velocity, 0.0);
    assert_eq!(machine.planner().queued()[1].entry_velocity, 0.0);

    assert!(machine.run_until_idle(MAX_TICKS));
    assert_eq!(machine.runtime().position()[0], 200.0);
    assert_on_model_position(&machine);
}

#[test]
fn test_queue_flush_waits_for_hold_then_resyncs() {
    let mut machine = Machine::new(Config::default());
    let requests = machine.requests();
    machine.submit("G1 X100 F3000\nG1 Y50");
    assert!(machine.run_until(MAX_TICKS, |m| m.runtime().position()[0] >= 20.0));
    machine.submit("!%");
    assert!(requests.queue_flush_pending());

    let mut held_before_flush = false;
    assert!(machine.run_until(MAX_TICKS, |m| {
        if m.planner().is_empty() {
            return true;
        }
        held_before_flush |= m.status().hold_state == HoldState::Hold;
        false
    }));
    assert!(held_before_flush);
    assert!(!requests.queue_flush_pending());
    assert_eq!(machine.status().hold_state, HoldState::Off);
    assert!(machine.is_idle());

    let stopped = *machine.runtime().position();
    assert!(stopped[0] > 20.0 && stopped[0] < 30.0, "stopped at X{:.3}", stopped[0]);
    assert_eq!(stopped[1], 0.0);
    assert_on_model_position(&machine);
    assert_eq!(machine.planner().position()[0], machine.cm().position()[0]);

    machine.submit("G1 X30 F1000");
    assert!(machine.run_until_idle(MAX_TICKS));
    assert_eq!(machine.runtime().position()[..2], [30.0, 0.0]);
    assert_eq!(machine.pipeline().position()[..2], [1200, 0]);
    assert_on_model_position(&machine);
}
