//! Offline simulator: runs G-code through the motion core and step
//! pipeline on emulated drivers and writes segment and step traces.

pub mod run;
pub mod settings;
pub mod trace;

pub use run::{run_program, SimError, SimReport};
pub use settings::{load_settings, SimSettings};
