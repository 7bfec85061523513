//! Trace files written off the simulation thread.
//!
//! The run loop sends one event per emitted segment (and per controller
//! response) over a channel; a writer thread turns them into
//! `segments.csv`, `steps.csv` and optionally `responses.jsonl`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use krusty_cnc::executor::{Phase, SegmentRecord};
use krusty_shared::MOTORS;

pub const SEGMENTS_FILE: &str = "segments.csv";
pub const STEPS_FILE: &str = "steps.csv";
pub const RESPONSES_FILE: &str = "responses.jsonl";

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("trace writer stopped early")]
    Closed,
    #[error("trace writer panicked")]
    WriterPanicked,
}

pub enum TraceEvent {
    /// A segment and the absolute motor step targets at its end.
    Segment {
        record: SegmentRecord,
        steps: [i64; MOTORS],
    },
    Response(String),
}

#[derive(Debug, Serialize)]
struct SegmentRow {
    index: u64,
    line: u32,
    phase: Phase,
    /// Machine time at the end of the segment.
    time_s: f64,
    duration_ms: f64,
    velocity: f64,
    x: f64,
    y: f64,
    z: f64,
    a: f64,
    b: f64,
    c: f64,
    forced: bool,
    hold: bool,
}

/// Steps issued to each motor during one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRow {
    pub index: u64,
    pub line: u32,
    pub m1: i64,
    pub m2: i64,
    pub m3: i64,
    pub m4: i64,
    pub m5: i64,
    pub m6: i64,
}

/// What the writer put on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TraceCounts {
    pub segments: u64,
    pub responses: u64,
    /// Sum of segment durations.
    pub motion_seconds: f64,
}

pub struct TraceWriter {
    tx: Sender<TraceEvent>,
    handle: JoinHandle<Result<TraceCounts, TraceError>>,
}

impl TraceWriter {
    /// Create the output directory and files, then start the writer thread.
    pub fn spawn(dir: &Path, jsonl: bool) -> Result<Self, TraceError> {
        std::fs::create_dir_all(dir)?;
        let segments = csv::Writer::from_path(dir.join(SEGMENTS_FILE))?;
        let steps = csv::Writer::from_path(dir.join(STEPS_FILE))?;
        let responses = if jsonl {
            Some(BufWriter::new(File::create(dir.join(RESPONSES_FILE))?))
        } else {
            None
        };
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("sim-trace".to_string())
            .spawn(move || write_events(rx, segments, steps, responses))?;
        Ok(Self { tx, handle })
    }

    pub fn send(&self, event: TraceEvent) -> Result<(), TraceError> {
        self.tx.send(event).map_err(|_| TraceError::Closed)
    }

    /// Close the channel and wait for everything to be flushed.
    pub fn finish(self) -> Result<TraceCounts, TraceError> {
        drop(self.tx);
        self.handle.join().map_err(|_| TraceError::WriterPanicked)?
    }
}

fn write_events(
    rx: Receiver<TraceEvent>,
    mut segments: csv::Writer<File>,
    mut steps: csv::Writer<File>,
    mut responses: Option<BufWriter<File>>,
) -> Result<TraceCounts, TraceError> {
    let mut counts = TraceCounts::default();
    let mut previous = [0i64; MOTORS];
    while let Ok(event) = rx.recv() {
        match event {
            TraceEvent::Segment { record, steps: target } => {
                let seconds = record.time * 60.0;
                counts.motion_seconds += seconds;
                let p = record.position;
                segments.serialize(SegmentRow {
                    index: counts.segments,
                    line: record.line,
                    phase: record.phase,
                    time_s: counts.motion_seconds,
                    duration_ms: seconds * 1000.0,
                    velocity: record.velocity,
                    x: p[0],
                    y: p[1],
                    z: p[2],
                    a: p[3],
                    b: p[4],
                    c: p[5],
                    forced: record.forced,
                    hold: record.hold,
                })?;
                let d: [i64; MOTORS] = std::array::from_fn(|m| target[m] - previous[m]);
                steps.serialize(StepRow {
                    index: counts.segments,
                    line: record.line,
                    m1: d[0],
                    m2: d[1],
                    m3: d[2],
                    m4: d[3],
                    m5: d[4],
                    m6: d[5],
                })?;
                previous = target;
                counts.segments += 1;
            }
            TraceEvent::Response(line) => {
                if let Some(out) = responses.as_mut() {
                    writeln!(out, "{}", line)?;
                }
                counts.responses += 1;
            }
        }
    }
    segments.flush()?;
    steps.flush()?;
    if let Some(out) = responses.as_mut() {
        out.flush()?;
    }
    tracing::debug!("Trace writer done after {} segments", counts.segments);
    Ok(counts)
}
