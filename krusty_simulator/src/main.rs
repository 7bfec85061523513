//! krusty-sim: run a G-code file on emulated drivers and write traces.

use std::path::PathBuf;

use clap::Parser;

use krusty_shared::{load_config, Config};
use krusty_simulator::{load_settings, run_program};

#[derive(Parser, Debug)]
#[command(name = "krusty-sim", about = "Offline motion simulation with segment and step traces.")]
struct Cli {
    /// G-code program to run
    gcode: PathBuf,
    /// Machine configuration (TOML); overrides `machine_config` in the settings
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Simulator settings file (any format the config crate reads)
    #[arg(short, long)]
    settings: Option<PathBuf>,
    /// Output directory for the trace files
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Feedhold after this many seconds of machine time, then resume
    #[arg(long)]
    hold_at: Option<f64>,
    /// Print the effective settings as TOML and exit
    #[arg(long)]
    dump_settings: bool,
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let mut settings = load_settings(cli.settings.as_deref())?;
    if let Some(dir) = cli.output {
        settings.output_dir = dir;
    }
    if let Some(path) = cli.config {
        settings.machine_config = Some(path);
    }
    if cli.hold_at.is_some() {
        settings.hold_at_seconds = cli.hold_at;
    }
    if cli.dump_settings {
        println!("{}", toml::to_string_pretty(&settings)?);
        return Ok(());
    }

    let config = match &settings.machine_config {
        Some(path) => load_config(&path.to_string_lossy())?,
        None => Config::default(),
    };
    let program = std::fs::read_to_string(&cli.gcode)?;
    tracing::info!(
        "Simulating {} into {}",
        cli.gcode.display(),
        settings.output_dir.display()
    );

    let report = run_program(config, &settings, &program)?;
    if report.underflows > 0 {
        tracing::warn!("{} step pipeline underflows", report.underflows);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.completed {
        return Err("simulation did not finish within max_ticks".into());
    }
    Ok(())
}
