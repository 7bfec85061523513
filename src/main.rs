// src/main.rs - run G-code from a file or stdin through the motion core
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::mpsc;

use krusty_cnc::host::forward_lines;
use krusty_cnc::{Machine, MachineRequests};
use krusty_shared::{load_config, Config};

/// Ticks simulated between checks of the input channel.
const TICKS_PER_POLL: u64 = 1_000;

#[derive(Parser, Debug)]
#[command(name = "krusty-cnc", version, about = "Jerk-limited CNC motion core")]
struct Args {
    /// G-code file; stdin when omitted
    file: Option<PathBuf>,
    /// Machine configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print the effective configuration and exit
    #[arg(long)]
    dump_config: bool,
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            load_config(&path.to_string_lossy())?
        }
        None => Config::default(),
    };
    if args.dump_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut machine = Machine::new(config);
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let reader = tokio::spawn(read_lines(args.file.clone(), tx, machine.requests()));

    let mut input_open = true;
    loop {
        // keep a few lines ahead of the controller
        while input_open && machine.pending_lines() < 4 {
            match rx.try_recv() {
                Ok(line) => machine.submit(&line),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => input_open = false,
            }
        }
        for _ in 0..TICKS_PER_POLL {
            machine.tick();
        }
        for response in machine.take_responses() {
            println!("{}", response);
        }
        if !input_open && machine.is_idle() {
            break;
        }
        if machine.pending_lines() == 0 && machine.is_idle() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
    reader.await??;

    let position = machine.runtime().position();
    tracing::info!(
        "Finished in {:.3}s simulated: X{:.3} Y{:.3} Z{:.3} A{:.3}",
        machine.pipeline().elapsed_seconds(),
        position[0], position[1], position[2], position[3]
    );
    let stats = machine.pipeline().stats();
    tracing::info!("Pipeline: {:?}", stats);
    Ok(())
}

async fn read_lines(
    path: Option<PathBuf>,
    tx: mpsc::Sender<String>,
    requests: Arc<MachineRequests>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(&path).await?;
            forward_lines(BufReader::new(file), tx, requests).await?;
        }
        None => forward_lines(BufReader::new(tokio::io::stdin()), tx, requests).await?,
    }
    Ok(())
}
