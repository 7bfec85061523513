// krusty-cnc: G-code motion core with a jerk-limited lookahead planner,
// segment executor and step pipeline driven in simulated time

pub mod canonical;
pub mod controller;
pub mod executor;
pub mod gcode;
pub mod host;
pub mod kinematics;
pub mod machine;
pub mod planner;
pub mod report;

pub use machine::{Machine, MachineRequests};
