use std::io::Write;

use tempfile::{tempdir, NamedTempFile};

use krusty_shared::Config;
use krusty_simulator::trace::{StepRow, RESPONSES_FILE, SEGMENTS_FILE, STEPS_FILE};
use krusty_simulator::{load_settings, run_program, SimSettings};

fn settings_in(dir: &std::path::Path) -> SimSettings {
    SimSettings {
        output_dir: dir.to_path_buf(),
        ..SimSettings::default()
    }
}

#[test]
fn test_traces_account_for_every_step() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let report = run_program(Config::default(), &settings, "G1 X10 Y-5 F600\nG0 X0\nM2").unwrap();

    assert!(report.completed);
    assert_eq!(report.errors, 0);
    assert_eq!(report.driver_position[0], 0);
    assert_eq!(report.driver_position[1], -200);
    assert_eq!(report.pulses[0], 800);
    assert_eq!(report.pulses[1], 200);
    assert_eq!(report.total_pulses, 1000);

    let mut reader = csv::Reader::from_path(dir.path().join(STEPS_FILE)).unwrap();
    let rows: Vec<StepRow> = reader.deserialize().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len() as u64, report.segments);
    assert_eq!(rows.iter().map(|r| r.m1).sum::<i64>(), 0);
    assert_eq!(rows.iter().map(|r| r.m2).sum::<i64>(), -200);
    assert_eq!(rows.iter().map(|r| r.m1.abs()).sum::<i64>(), 800);

    let mut reader = csv::Reader::from_path(dir.path().join(SEGMENTS_FILE)).unwrap();
    let headers = reader.headers().unwrap().clone();
    let x = headers.iter().position(|h| h == "x").unwrap();
    let y = headers.iter().position(|h| h == "y").unwrap();
    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len() as u64, report.segments);
    let last = records.last().unwrap();
    assert_eq!(last[x].parse::<f64>().unwrap(), 0.0);
    assert_eq!(last[y].parse::<f64>().unwrap(), -5.0);
    assert!(!dir.path().join(RESPONSES_FILE).exists());
}

#[test]
fn test_feedhold_run_finishes_on_target() {
    let dir = tempdir().unwrap();
    let mut settings = settings_in(dir.path());
    settings.hold_at_seconds = Some(0.3);
    settings.jsonl = true;
    // 50mm at 3000mm/min runs for about a second
    let report = run_program(Config::default(), &settings, "G1 X50 F3000\nG1 X1..2").unwrap();

    assert!(report.completed);
    assert!(report.held);
    assert_eq!(report.errors, 1);
    assert_eq!(report.position[0], 50.0);
    assert_eq!(report.driver_position[0], 2000);
    assert_eq!(report.pulses[0], 2000);

    let mut reader = csv::Reader::from_path(dir.path().join(SEGMENTS_FILE)).unwrap();
    let hold = reader.headers().unwrap().iter().position(|h| h == "hold").unwrap();
    assert!(reader.records().any(|r| &r.unwrap()[hold] == "true"));

    let responses = std::fs::read_to_string(dir.path().join(RESPONSES_FILE)).unwrap();
    assert!(responses.lines().count() >= 2);
}

#[test]
fn test_tick_budget_stops_long_runs() {
    let dir = tempdir().unwrap();
    let mut settings = settings_in(dir.path());
    settings.max_ticks = 10_000;
    let report = run_program(Config::default(), &settings, "G1 X500 F100").unwrap();
    assert!(!report.completed);
    assert!(report.ticks >= 10_000);
    assert!(report.position[0] < 500.0);
}

#[test]
fn test_settings_file_then_environment() {
    let mut file = NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(file, "output_dir = \"traces\"\nhold_at_seconds = 1.5\nmax_ticks = 42").unwrap();

    let settings = load_settings(Some(file.path())).unwrap();
    assert_eq!(settings.output_dir, std::path::PathBuf::from("traces"));
    assert_eq!(settings.hold_at_seconds, Some(1.5));
    assert_eq!(settings.max_ticks, 42);
    assert!(!settings.jsonl);

    // SAFETY: no other test in this binary reads the environment
    unsafe { std::env::set_var("KRUSTY_SIM_JSONL", "true") };
    let settings = load_settings(Some(file.path())).unwrap();
    unsafe { std::env::remove_var("KRUSTY_SIM_JSONL") };
    assert!(settings.jsonl);
    assert_eq!(settings.max_ticks, 42);

    assert_eq!(load_settings(None).unwrap(), SimSettings::default());
}
