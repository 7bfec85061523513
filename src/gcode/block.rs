// src/gcode/block.rs - one block's words sorted into modal groups
use krusty_shared::gcode::{
    CoordSystem, DistanceMode, FeedRateMode, MotionMode, PathControl, Plane, SpindleState, UnitsMode,
};
use krusty_shared::vector::{self, AxisVector};
use krusty_shared::Axis;

use super::parser::{GCodeCommand, GCodeError, GCodeParser};
use crate::canonical::AxisFlags;

/// Group 0 codes that act once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonModal {
    Dwell,
    SetCoordData,
    GotoG28,
    SetG28,
    SetAbsoluteOrigin,
    GotoG30,
    SetG30,
    SetOriginOffsets,
    ResetOriginOffsets,
    SuspendOriginOffsets,
    ResumeOriginOffsets,
}

impl NonModal {
    /// Codes that consume the block's axis words.
    pub fn uses_axes(self) -> bool {
        matches!(
            self,
            NonModal::SetCoordData
                | NonModal::GotoG28
                | NonModal::GotoG30
                | NonModal::SetAbsoluteOrigin
                | NonModal::SetOriginOffsets
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramFlow {
    Stop,
    OptionalStop,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoolantCommand {
    Mist,
    Flood,
    Off,
}

/// Parsed block: every field is `None` (or unset) when the block does not
/// mention it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GCodeBlock {
    pub line_number: Option<u32>,
    pub motion: Option<MotionMode>,
    pub non_modal: Option<NonModal>,
    pub plane: Option<Plane>,
    pub units: Option<UnitsMode>,
    pub distance_mode: Option<DistanceMode>,
    pub feed_rate_mode: Option<FeedRateMode>,
    pub path_control: Option<PathControl>,
    pub coord_system: Option<CoordSystem>,
    /// G53
    pub absolute_override: bool,
    pub program_flow: Option<ProgramFlow>,
    pub spindle: Option<SpindleState>,
    pub coolant: Option<CoolantCommand>,
    pub tool_change: bool,
    pub tool: Option<u8>,
    pub spindle_speed: Option<f64>,
    pub feed_rate: Option<f64>,
    pub values: AxisVector,
    pub flags: AxisFlags,
    /// I, J, K
    pub offsets: [f64; 3],
    pub offset_flags: [bool; 3],
    pub radius: Option<f64>,
    pub p: Option<f64>,
    pub l: Option<f64>,
}

/// Modal groups checked for conflicts within one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    NonModal,
    AbsoluteOverride,
    Motion,
    Plane,
    Distance,
    FeedRateMode,
    Units,
    CoordSystem,
    PathControl,
    Stopping,
    Spindle,
    Coolant,
    ToolChange,
}

/// `G61.1` -> (61, 1)
fn code_parts(value: f64) -> (u32, u32) {
    let major = value.trunc();
    let minor = ((value - major) * 10.0).round();
    (major as u32, minor as u32)
}

impl GCodeBlock {
    pub fn has_axes(&self) -> bool {
        self.flags.iter().any(|f| *f)
    }

    pub fn has_offsets(&self) -> bool {
        self.offset_flags.iter().any(|f| *f)
    }

    /// Parse one block. `Ok(None)` for blocks with nothing but comments.
    pub fn parse(src: &str) -> Result<Option<GCodeBlock>, GCodeError> {
        let mut block = GCodeBlock {
            values: vector::zero(),
            ..Default::default()
        };
        let mut groups: Vec<Group> = Vec::new();
        let mut any = false;
        for command in GCodeParser::new(src) {
            let (letter, value) = match command? {
                GCodeCommand::Word { letter, value, .. } => (letter, value),
                GCodeCommand::Comment(..) => continue,
            };
            any = true;
            let mut claim = |group: Group| {
                if groups.contains(&group) {
                    return Err(GCodeError::ModalGroupViolation { letter, value });
                }
                groups.push(group);
                Ok(())
            };
            match letter {
                'G' | 'M' if value < 0.0 => {
                    return Err(GCodeError::UnsupportedCode { letter, value });
                }
                'G' => {
                    let group = block.set_g(value)?;
                    claim(group)?;
                }
                'M' => {
                    let group = block.set_m(value)?;
                    claim(group)?;
                }
                'N' => {
                    if value < 0.0 {
                        return Err(GCodeError::ValueOutOfRange { letter, value });
                    }
                    block.line_number = Some(value as u32);
                }
                'F' => block.feed_rate = Some(value),
                'S' => block.spindle_speed = Some(value),
                'T' => {
                    if !(0.0..=255.0).contains(&value) {
                        return Err(GCodeError::ValueOutOfRange { letter, value });
                    }
                    block.tool = Some(value as u8);
                }
                'P' => block.p = Some(value),
                'L' => block.l = Some(value),
                'R' => block.radius = Some(value),
                'I' | 'J' | 'K' => {
                    let i = (letter as u8 - b'I') as usize;
                    block.offsets[i] = value;
                    block.offset_flags[i] = true;
                }
                _ => match Axis::from_letter(letter) {
                    Some(axis) => {
                        block.values[axis.index()] = value;
                        block.flags[axis.index()] = true;
                    }
                    None => return Err(GCodeError::UnsupportedCode { letter, value }),
                },
            }
        }
        Ok(any.then_some(block))
    }

    fn set_g(&mut self, value: f64) -> Result<Group, GCodeError> {
        let unsupported = GCodeError::UnsupportedCode { letter: 'G', value };
        let group = match code_parts(value) {
            (0, 0) => self.motion(MotionMode::StraightTraverse),
            (1, 0) => self.motion(MotionMode::StraightFeed),
            (2, 0) => self.motion(MotionMode::CwArc),
            (3, 0) => self.motion(MotionMode::CcwArc),
            (80, 0) => self.motion(MotionMode::CancelMotionMode),
            (4, 0) => self.non_modal(NonModal::Dwell),
            (10, 0) => self.non_modal(NonModal::SetCoordData),
            (28, 0) => self.non_modal(NonModal::GotoG28),
            (28, 1) => self.non_modal(NonModal::SetG28),
            (28, 3) => self.non_modal(NonModal::SetAbsoluteOrigin),
            (30, 0) => self.non_modal(NonModal::GotoG30),
            (30, 1) => self.non_modal(NonModal::SetG30),
            (92, 0) => self.non_modal(NonModal::SetOriginOffsets),
            (92, 1) => self.non_modal(NonModal::ResetOriginOffsets),
            (92, 2) => self.non_modal(NonModal::SuspendOriginOffsets),
            (92, 3) => self.non_modal(NonModal::ResumeOriginOffsets),
            (53, 0) => {
                // group 0 in name, but it accompanies motion
                self.absolute_override = true;
                Group::AbsoluteOverride
            }
            (17, 0) => {
                self.plane = Some(Plane::XY);
                Group::Plane
            }
            (18, 0) => {
                self.plane = Some(Plane::XZ);
                Group::Plane
            }
            (19, 0) => {
                self.plane = Some(Plane::YZ);
                Group::Plane
            }
            (20, 0) => {
                self.units = Some(UnitsMode::Inches);
                Group::Units
            }
            (21, 0) => {
                self.units = Some(UnitsMode::Millimeters);
                Group::Units
            }
            (major @ 54..=59, 0) => {
                let coord = CoordSystem::new((major - 53) as u8).ok_or(unsupported)?;
                self.coord_system = Some(coord);
                Group::CoordSystem
            }
            (61, 0) => {
                self.path_control = Some(PathControl::ExactStop);
                Group::PathControl
            }
            (61, 1) => {
                self.path_control = Some(PathControl::ExactPath);
                Group::PathControl
            }
            (64, 0) => {
                self.path_control = Some(PathControl::Continuous);
                Group::PathControl
            }
            (90, 0) => {
                self.distance_mode = Some(DistanceMode::Absolute);
                Group::Distance
            }
            (91, 0) => {
                self.distance_mode = Some(DistanceMode::Incremental);
                Group::Distance
            }
            (93, 0) => {
                self.feed_rate_mode = Some(FeedRateMode::InverseTime);
                Group::FeedRateMode
            }
            (94, 0) => {
                self.feed_rate_mode = Some(FeedRateMode::UnitsPerMinute);
                Group::FeedRateMode
            }
            _ => return Err(unsupported),
        };
        Ok(group)
    }

    fn motion(&mut self, mode: MotionMode) -> Group {
        self.motion = Some(mode);
        Group::Motion
    }

    fn non_modal(&mut self, code: NonModal) -> Group {
        self.non_modal = Some(code);
        Group::NonModal
    }

    fn set_m(&mut self, value: f64) -> Result<Group, GCodeError> {
        let group = match code_parts(value) {
            (0, 0) => {
                self.program_flow = Some(ProgramFlow::Stop);
                Group::Stopping
            }
            (1, 0) => {
                self.program_flow = Some(ProgramFlow::OptionalStop);
                Group::Stopping
            }
            (2, 0) | (30, 0) => {
                self.program_flow = Some(ProgramFlow::End);
                Group::Stopping
            }
            (3, 0) => {
                self.spindle = Some(SpindleState::Cw);
                Group::Spindle
            }
            (4, 0) => {
                self.spindle = Some(SpindleState::Ccw);
                Group::Spindle
            }
            (5, 0) => {
                self.spindle = Some(SpindleState::Off);
                Group::Spindle
            }
            (6, 0) => {
                self.tool_change = true;
                Group::ToolChange
            }
            (7, 0) => {
                self.coolant = Some(CoolantCommand::Mist);
                Group::Coolant
            }
            (8, 0) => {
                self.coolant = Some(CoolantCommand::Flood);
                Group::Coolant
            }
            (9, 0) => {
                self.coolant = Some(CoolantCommand::Off);
                Group::Coolant
            }
            _ => return Err(GCodeError::UnsupportedCode { letter: 'M', value }),
        };
        Ok(group)
    }
}

/// Axis words of a block as a readable list, for logging.
pub fn describe_axes(block: &GCodeBlock) -> String {
    Axis::ALL
        .iter()
        .filter(|a| block.flags[a.index()])
        .map(|a| format!("{}{}", a, block.values[a.index()]))
        .collect::<Vec<_>>()
        .join(" ")
}
