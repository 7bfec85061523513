// src/gcode/interpreter.rs - run a parsed block against the canonical machine
use krusty_shared::gcode::{CoordSystem, MotionMode};
use krusty_shared::StatusCode;

use super::block::{describe_axes, CoolantCommand, GCodeBlock, NonModal, ProgramFlow};
use crate::canonical::arc::ArcWords;
use crate::canonical::CanonicalMachine;
use crate::planner::{Coolant, Planner};

/// Execute one block in the fixed order of the canonical machine: modes
/// first, then non-modal actions, then motion, then program flow. G53
/// lasts for this block only.
pub fn execute_block(
    block: &GCodeBlock,
    cm: &mut CanonicalMachine,
    planner: &mut Planner,
) -> Result<(), StatusCode> {
    let consumes_axes = block.non_modal.is_some_and(NonModal::uses_axes);
    if consumes_axes && block.motion.is_some() && block.has_axes() {
        return Err(StatusCode::GcodeModalGroupViolation);
    }
    let result = execute(block, consumes_axes, cm, planner);
    cm.set_absolute_override(false);
    if let Err(code) = &result {
        tracing::debug!("Block rejected ({}): {}", code, describe_axes(block));
    }
    result
}

fn execute(
    block: &GCodeBlock,
    consumes_axes: bool,
    cm: &mut CanonicalMachine,
    planner: &mut Planner,
) -> Result<(), StatusCode> {
    if let Some(line) = block.line_number {
        cm.set_line_number(line);
    }
    // F is read in the units this block selects
    if let Some(units) = block.units {
        cm.set_units_mode(units);
    }
    if let Some(mode) = block.feed_rate_mode {
        cm.set_feed_rate_mode(mode);
    }
    if let Some(feed) = block.feed_rate {
        cm.set_feed_rate(feed);
    }
    if let Some(speed) = block.spindle_speed {
        cm.set_spindle_speed(speed);
    }
    if let Some(tool) = block.tool {
        cm.select_tool(tool);
    }
    if block.tool_change {
        cm.change_tool(planner)?;
    }
    if let Some(state) = block.spindle {
        cm.spindle_control(planner, state)?;
    }
    match block.coolant {
        Some(CoolantCommand::Mist) => cm.coolant_control(planner, Coolant::Mist, true)?,
        Some(CoolantCommand::Flood) => cm.coolant_control(planner, Coolant::Flood, true)?,
        Some(CoolantCommand::Off) => cm.coolant_off(planner)?,
        None => {}
    }
    if block.non_modal == Some(NonModal::Dwell) {
        let seconds = block.p.unwrap_or(0.0);
        if seconds < 0.0 {
            return Err(StatusCode::ValueOutOfRange);
        }
        cm.dwell(planner, seconds)?;
    }
    if let Some(plane) = block.plane {
        cm.set_plane(plane);
    }
    if let Some(coord) = block.coord_system {
        cm.set_coord_system(planner, coord)?;
    }
    if let Some(mode) = block.path_control {
        cm.set_path_control(mode);
    }
    if let Some(mode) = block.distance_mode {
        cm.set_distance_mode(mode);
    }
    if block.absolute_override {
        cm.set_absolute_override(true);
    }

    if let Some(code) = block.non_modal {
        execute_non_modal(code, block, cm, planner)?;
    }
    if !consumes_axes {
        execute_motion(block, cm, planner)?;
    }

    match block.program_flow {
        Some(ProgramFlow::Stop) => cm.program_stop(planner)?,
        Some(ProgramFlow::OptionalStop) => cm.optional_program_stop(planner)?,
        Some(ProgramFlow::End) => cm.program_end(planner)?,
        None => {}
    }
    Ok(())
}

fn execute_non_modal(
    code: NonModal,
    block: &GCodeBlock,
    cm: &mut CanonicalMachine,
    planner: &mut Planner,
) -> Result<(), StatusCode> {
    let (values, flags) = (&block.values, &block.flags);
    match code {
        NonModal::Dwell => Ok(()),
        NonModal::SetCoordData => {
            if block.l != Some(2.0) {
                return Err(StatusCode::ValueOutOfRange);
            }
            let coord = match block.p {
                Some(p) if p == 0.0 => cm.gm().coord_system,
                Some(p) if (1.0..=6.0).contains(&p) && p.fract() == 0.0 => {
                    CoordSystem::new(p as u8).ok_or(StatusCode::ValueOutOfRange)?
                }
                _ => return Err(StatusCode::ValueOutOfRange),
            };
            cm.set_coord_offsets(planner, coord, values, flags)
        }
        NonModal::GotoG28 => cm.goto_g28_position(planner, values, flags),
        NonModal::SetG28 => {
            cm.set_g28_position();
            Ok(())
        }
        NonModal::GotoG30 => cm.goto_g30_position(planner, values, flags),
        NonModal::SetG30 => {
            cm.set_g30_position();
            Ok(())
        }
        NonModal::SetAbsoluteOrigin => {
            if !block.has_axes() {
                return Err(StatusCode::GcodeAxisWordMissing);
            }
            cm.set_absolute_origin(planner, values, flags)
        }
        NonModal::SetOriginOffsets => {
            if !block.has_axes() {
                return Err(StatusCode::GcodeAxisWordMissing);
            }
            cm.set_origin_offsets(planner, values, flags)
        }
        NonModal::ResetOriginOffsets => cm.reset_origin_offsets(planner),
        NonModal::SuspendOriginOffsets => cm.suspend_origin_offsets(planner),
        NonModal::ResumeOriginOffsets => cm.resume_origin_offsets(planner),
    }
}

fn execute_motion(block: &GCodeBlock, cm: &mut CanonicalMachine, planner: &mut Planner) -> Result<(), StatusCode> {
    let mode = match block.motion {
        Some(mode) => {
            cm.set_motion_mode(mode);
            mode
        }
        // axis words alone continue the modal motion
        None if block.has_axes() => cm.gm().motion_mode,
        None => return Ok(()),
    };
    let (values, flags) = (&block.values, &block.flags);
    match mode {
        MotionMode::StraightTraverse => cm.straight_traverse(planner, values, flags),
        MotionMode::StraightFeed => cm.straight_feed(planner, values, flags),
        MotionMode::CwArc | MotionMode::CcwArc => {
            if !block.has_axes() && !block.has_offsets() {
                return Err(StatusCode::GcodeAxisWordMissing);
            }
            let words = ArcWords {
                offsets: block.offsets,
                offset_flags: block.offset_flags,
                radius: block.radius,
                clockwise: mode == MotionMode::CwArc,
            };
            cm.arc_feed(planner, values, flags, &words)
        }
        MotionMode::CancelMotionMode => {
            if block.has_axes() {
                tracing::debug!("Axis words ignored with motion cancelled");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{Payload, SyncOp};
    use krusty_shared::gcode::{DistanceMode, PathControl, UnitsMode};
    use krusty_shared::Config;

    fn run(lines: &[&str]) -> (CanonicalMachine, Planner) {
        let config = Config::default();
        let mut cm = CanonicalMachine::new(&config);
        let mut planner = Planner::new(&config);
        for line in lines {
            if let Some(block) = GCodeBlock::parse(line).unwrap() {
                execute_block(&block, &mut cm, &mut planner).unwrap();
            }
        }
        (cm, planner)
    }

    #[test]
    fn test_modal_motion_continues() {
        let (cm, planner) = run(&["G1 X10 F600", "Y10", "X0"]);
        assert_eq!(planner.queued().len(), 3);
        assert_eq!(cm.position()[..2], [0.0, 10.0]);
    }

    #[test]
    fn test_units_apply_to_feed_in_same_block() {
        let (cm, _) = run(&["G20 G1 X1 F10"]);
        assert_eq!(cm.gm().units_mode, UnitsMode::Inches);
        assert!((cm.gm().feed_rate - 254.0).abs() < 1e-9);
        assert!((cm.position()[0] - 25.4).abs() < 1e-9);
    }

    #[test]
    fn test_g53_lasts_one_block() {
        let (cm, _) = run(&["G10 L2 P1 X5", "G53 G0 X1", "G0 X1"]);
        assert!(!cm.gm().absolute_override);
        assert_eq!(cm.position()[0], 6.0);
    }

    #[test]
    fn test_g10_current_system_and_range() {
        let (cm, _) = run(&["G55", "G10 L2 P0 Y7"]);
        let g55 = CoordSystem::new(2).unwrap();
        assert_eq!(cm.offsets().coord(g55)[1], 7.0);

        let config = Config::default();
        let mut cm = CanonicalMachine::new(&config);
        let mut planner = Planner::new(&config);
        let block = GCodeBlock::parse("G10 L2 P9 X1").unwrap().unwrap();
        assert_eq!(execute_block(&block, &mut cm, &mut planner), Err(StatusCode::ValueOutOfRange));
        let block = GCodeBlock::parse("G10 L20 P1 X1").unwrap().unwrap();
        assert_eq!(execute_block(&block, &mut cm, &mut planner), Err(StatusCode::ValueOutOfRange));
    }

    #[test]
    fn test_axis_conflict_with_non_modal() {
        let config = Config::default();
        let mut cm = CanonicalMachine::new(&config);
        let mut planner = Planner::new(&config);
        let block = GCodeBlock::parse("G92 G1 X0").unwrap().unwrap();
        assert_eq!(
            execute_block(&block, &mut cm, &mut planner),
            Err(StatusCode::GcodeModalGroupViolation)
        );
        let block = GCodeBlock::parse("G92").unwrap().unwrap();
        assert_eq!(execute_block(&block, &mut cm, &mut planner), Err(StatusCode::GcodeAxisWordMissing));
    }

    #[test]
    fn test_arc_without_words() {
        let config = Config::default();
        let mut cm = CanonicalMachine::new(&config);
        let mut planner = Planner::new(&config);
        let block = GCodeBlock::parse("G2 F100").unwrap().unwrap();
        assert_eq!(execute_block(&block, &mut cm, &mut planner), Err(StatusCode::GcodeAxisWordMissing));
    }

    #[test]
    fn test_mode_words() {
        let (cm, _) = run(&["G91 G61"]);
        assert_eq!(cm.gm().distance_mode, DistanceMode::Incremental);
        assert_eq!(cm.gm().path_control, PathControl::ExactStop);
    }

    #[test]
    fn test_execution_order_in_block() {
        // spindle before dwell before motion before program end
        let (_, planner) = run(&["M3 S1000 G4 P0.5", "G1 X5 F100 M2"]);
        let kinds: Vec<_> = planner
            .queued()
            .iter()
            .map(|b| match &b.payload {
                Payload::Sync(SyncOp::Spindle { .. }) => "spindle",
                Payload::Dwell { .. } => "dwell",
                Payload::Line => "line",
                Payload::Sync(SyncOp::SetWorkOffset { .. }) => "offset",
                Payload::Sync(SyncOp::ProgramEnd) => "end",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["spindle", "dwell", "line", "offset", "end"]);
    }
}
