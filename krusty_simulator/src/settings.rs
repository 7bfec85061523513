//! Run settings for the simulator, layered from an optional file and
//! `KRUSTY_SIM_*` environment variables.

use std::path::{Path, PathBuf};

use config::{Config as Layers, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "KRUSTY_SIM";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    /// Directory receiving the trace files.
    pub output_dir: PathBuf,
    /// Machine configuration (TOML); built-in defaults when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_config: Option<PathBuf>,
    /// Give up after this many DDA ticks.
    pub max_ticks: u64,
    /// Request a feedhold once this much machine time has passed, then
    /// resume as soon as the hold settles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_at_seconds: Option<f64>,
    /// Also write every controller response to `responses.jsonl`.
    pub jsonl: bool,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("sim_output"),
            machine_config: None,
            max_ticks: 200_000_000,
            hold_at_seconds: None,
            jsonl: false,
        }
    }
}

/// Build the settings from defaults, then `path` (if given), then the
/// environment.
pub fn load_settings(path: Option<&Path>) -> Result<SimSettings, ConfigError> {
    let mut builder = Layers::builder();
    if let Some(path) = path {
        tracing::debug!("Reading simulator settings from {}", path.display());
        builder = builder.add_source(File::from(path));
    }
    builder
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()?
        .try_deserialize()
}
