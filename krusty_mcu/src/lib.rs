// krusty_mcu: the step pipeline that would run on the motion controller.
//
// Three stages hand segments down the line: the EXEC stage (the segment
// executor in the host crate) fills the prep buffer, LOAD moves it into the
// DDA runtime, and the DDA tick rations step pulses across the motors.

pub mod dda;
pub mod driver;
pub mod fake;
pub mod pipeline;
pub mod power;
pub mod segment;

pub use driver::{NullDriver, StepDriver};
pub use pipeline::{DdaEvent, LoadOutcome, PipelineStats, StepPipeline};
pub use segment::{Segment, SegmentKind};
