// krusty_shared: configuration, status codes and modal types shared by the
// motion core, the step pipeline and the simulator

pub mod axis;
pub mod config;
pub mod gcode;
pub mod status;
pub mod vector;

pub use axis::{Axis, AxisMode, AXES, COORDS, MOTORS};
pub use config::{load_config, Config, ConfigError};
pub use status::{Flow, StatResult, StatusCode};
pub use vector::AxisVector;
