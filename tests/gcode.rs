// G-code blocks through the parser and interpreter into the planner queue

use krusty_cnc::canonical::CanonicalMachine;
use krusty_cnc::gcode::{execute_block, is_block_deleted, GCodeBlock, GCodeError};
use krusty_cnc::planner::{Coolant, Payload, Planner, SyncOp};
use krusty_shared::gcode::{CoordSystem, MotionMode, Plane};
use krusty_shared::{Config, StatusCode};

fn machine() -> (CanonicalMachine, Planner) {
    let config = Config::default();
    (CanonicalMachine::new(&config), Planner::new(&config))
}

fn run(cm: &mut CanonicalMachine, planner: &mut Planner, line: &str) -> Result<(), StatusCode> {
    match GCodeBlock::parse(line) {
        Ok(Some(block)) => execute_block(&block, cm, planner),
        Ok(None) => Ok(()),
        Err(e) => Err(e.status()),
    }
}

#[test]
fn test_full_block_with_comments() {
    let block = GCodeBlock::parse("N42 G17 G1 X1.5 Y-2 (move) F1200 M8 ; flood on").unwrap().unwrap();
    assert_eq!(block.line_number, Some(42));
    assert_eq!(block.motion, Some(MotionMode::StraightFeed));
    assert_eq!(block.plane, Some(Plane::XY));
    assert_eq!(block.feed_rate, Some(1200.0));
    assert_eq!(block.values[..2], [1.5, -2.0]);
    assert!(block.flags[0] && block.flags[1] && !block.flags[2]);
}

#[test]
fn test_parse_errors_map_to_status() {
    let cases = [
        ("G1 X1..2", StatusCode::MalformedNumber),
        ("G1 G0 X1", StatusCode::GcodeModalGroupViolation),
        ("G99", StatusCode::UnrecognizedCommand),
        ("G1 X1 (open", StatusCode::MalformedNumber),
    ];
    for (line, status) in cases {
        let err: GCodeError = GCodeBlock::parse(line).unwrap_err();
        assert_eq!(err.status(), status, "{}", line);
    }
}

#[test]
fn test_block_delete_and_empty_lines() {
    assert!(is_block_deleted("/G1 X5"));
    assert!(is_block_deleted("  /G1 X5"));
    assert!(!is_block_deleted("G1 X5"));
    assert_eq!(GCodeBlock::parse("   ").unwrap(), None);
    assert_eq!(GCodeBlock::parse("(just a note)").unwrap(), None);
}

#[test]
fn test_program_queues_in_order() {
    let (mut cm, mut planner) = machine();
    for line in ["G21 G90 G54", "M3 S8000", "M7", "G0 X10 Y10", "G1 Z-1 F300", "M9", "M5", "M30"] {
        run(&mut cm, &mut planner, line).unwrap();
    }
    // work offset updates are interleaved wherever the coordinate system is set
    let payloads: Vec<Payload> = planner
        .queued()
        .iter()
        .map(|b| b.payload.clone())
        .filter(|p| !matches!(p, Payload::Sync(SyncOp::SetWorkOffset { .. })))
        .collect();
    assert_eq!(payloads.len(), 7);
    assert!(matches!(payloads[0], Payload::Sync(SyncOp::Spindle { .. })));
    assert_eq!(payloads[1], Payload::Sync(SyncOp::Coolant { coolant: Coolant::Mist, on: true }));
    assert_eq!(payloads[2], Payload::Line);
    assert_eq!(payloads[3], Payload::Line);
    assert_eq!(payloads.last(), Some(&Payload::Sync(SyncOp::ProgramEnd)));
}

#[test]
fn test_work_offsets_shift_targets() {
    let (mut cm, mut planner) = machine();
    run(&mut cm, &mut planner, "G10 L2 P2 X100 Y50").unwrap();
    run(&mut cm, &mut planner, "G55").unwrap();
    assert_eq!(cm.gm().coord_system, CoordSystem::new(2).unwrap());
    run(&mut cm, &mut planner, "G0 X1 Y1").unwrap();
    assert_eq!(cm.position()[..2], [101.0, 51.0]);
    run(&mut cm, &mut planner, "G92 X0").unwrap();
    run(&mut cm, &mut planner, "G0 X5").unwrap();
    assert_eq!(cm.position()[0], 106.0);
    run(&mut cm, &mut planner, "G92.1").unwrap();
    run(&mut cm, &mut planner, "G53 G0 X5").unwrap();
    assert_eq!(cm.position()[0], 5.0);
}

#[test]
fn test_errors_leave_model_unchanged() {
    let (mut cm, mut planner) = machine();
    assert_eq!(run(&mut cm, &mut planner, "G1 X10"), Err(StatusCode::GcodeFeedrateError));
    assert_eq!(run(&mut cm, &mut planner, "G2 X10 Y0 F100"), Err(StatusCode::ArcSpecificationError));
    assert_eq!(run(&mut cm, &mut planner, "G3 X10 R0 F100"), Err(StatusCode::ArcSpecificationError));
    assert_eq!(cm.position()[..2], [0.0, 0.0]);
    assert!(planner.is_empty());
}

#[test]
fn test_inverse_time_feed_is_not_modal() {
    let (mut cm, mut planner) = machine();
    run(&mut cm, &mut planner, "G93 G1 X10 F2").unwrap();
    assert!((planner.queued()[0].gm.move_time - 0.5).abs() < 1e-12);
    assert_eq!(run(&mut cm, &mut planner, "G1 X20"), Err(StatusCode::GcodeFeedrateError));
    assert_eq!(cm.position()[0], 10.0);
    run(&mut cm, &mut planner, "G1 X20 F4").unwrap();
    assert!((planner.queued()[1].gm.move_time - 0.25).abs() < 1e-12);
    // back to units per minute: the inverse-time value does not carry over
    assert_eq!(run(&mut cm, &mut planner, "G94 G1 X30"), Err(StatusCode::GcodeFeedrateError));
    run(&mut cm, &mut planner, "G94 G1 X30 F600").unwrap();
    assert_eq!(planner.queued().len(), 3);
}
