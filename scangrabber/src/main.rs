/*!
# Scan Grabber Application

Multi-sensor client for 2D rangefinders streaming LMDscandata telegrams over
TCP. Every configured device gets one session; scans are decoded, rotated into
the shared reference frame by the device's mounting yaw and handed to a
consumer as point sets.

## Features

- TCP session per device with startup handshake and stop on exit
- Incremental STX/ETX telegram reassembly and LMDscandata decoding
- Per-device yaw alignment into one reference frame
- Live output mode (one JSON line per scan on stdout)
- Synthetic sensor for running without hardware
- End-of-run summary with per-device scan rates

## Usage

### Run against the configured devices
```bash
scangrabber --config scangrabber.toml
```

### Live output mode
```bash
scangrabber --live --decimation 2
```

### JSON summary
```bash
scangrabber --summary-json
```

### Synthetic sensor
```bash
scangrabber simulate --port 2111 --rate-hz 15
```
*/

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use clap::{Parser, Subcommand};
use crossbeam_channel::bounded;
use tracing::{info, warn};
use lmd_shared::PointSet;

mod config;
mod orchestrator;
mod output;
mod session;
mod simulator;

use config::AppConfig;
use orchestrator::SessionOrchestrator;
use simulator::SyntheticSensor;

#[derive(Parser)]
#[command(name = "scangrabber")]
#[command(about = "Multi-sensor LMDscandata client producing aligned 2D point sets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "scangrabber.toml")]
    config: PathBuf,

    /// Write every scan to stdout as a JSON line
    #[arg(long)]
    live: bool,

    /// Keep every n-th point in live output
    #[arg(long, default_value = "1")]
    decimation: usize,

    /// Print the end-of-run summary as JSON
    #[arg(long)]
    summary_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "scangrabber.toml")]
        output: PathBuf,
    },

    /// Serve synthetic scan data on a TCP port
    Simulate {
        /// TCP bind address
        #[arg(short, long, default_value = "127.0.0.1")]
        bind_addr: String,

        /// TCP port to listen on
        #[arg(short, long, default_value = "2111")]
        port: u16,

        /// Scans per second
        #[arg(long, default_value = "15")]
        rate_hz: f64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Log to stderr to keep stdout clean for live output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Config { output }) => generate_config_file(output),
        Some(Commands::Simulate { bind_addr, port, rate_hz }) => run_simulator(bind_addr, port, rate_hz),
        None => run_scanners(cli.config, cli.live, cli.decimation, cli.summary_json),
    }
}

/// Install the Ctrl+C handler and return the flag it clears
fn shutdown_flag() -> Result<Arc<AtomicBool>, Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        handler_flag.store(false, Ordering::SeqCst);
    })?;
    Ok(running)
}

/// Connect to every configured device and poll until Ctrl+C
fn run_scanners(
    config_path: PathBuf,
    live: bool,
    decimation: usize,
    summary_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        warn!("⚠️ Config file {} not found, using defaults", config_path.display());
        AppConfig::new()
    };

    info!("🚀 Starting scan grabber with {} device(s)", config.devices.len());
    let running = shutdown_flag()?;

    let (point_tx, point_rx) = bounded::<PointSet>(config.scanner.channel_buffer_size);
    let consumer = output::spawn_consumer(
        point_rx,
        live,
        decimation,
        Duration::from_secs(config.scanner.stats_interval_seconds.max(1)),
    );

    // One cooperative loop polls every device on this thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let summary = runtime.block_on(async {
        let mut orchestrator = SessionOrchestrator::new(&config);
        if orchestrator.connect_all().await > 0 {
            orchestrator.run(Arc::clone(&running), &point_tx).await;
        } else {
            warn!("⚠️ No device connected, skipping the poll loop");
        }
        orchestrator.shutdown().await
    });

    drop(point_tx);
    let consumer_stats = consumer.join().map_err(|_| "Consumer thread panicked")?;
    info!("📈 Consumer received {} scans ({} points, {} write errors)",
          consumer_stats.scans, consumer_stats.points, consumer_stats.write_errors);

    let report = if summary_json {
        format!("{}\n", serde_json::to_string_pretty(&summary)?)
    } else {
        summary.to_string()
    };

    // Live mode owns stdout
    if live {
        eprint!("{}", report);
        eprintln!("Process Terminated.");
    } else {
        print!("{}", report);
        println!("Process Terminated.");
    }

    Ok(())
}

/// Serve synthetic scans until Ctrl+C
fn run_simulator(bind_addr: String, port: u16, rate_hz: f64) -> Result<(), Box<dyn std::error::Error>> {
    let running = shutdown_flag()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let sensor = SyntheticSensor::bind(&format!("{}:{}", bind_addr, port), rate_hz).await?;
        sensor.serve(running).await
    })?;

    println!("✅ Synthetic sensor stopped");
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the device list, then run:");
    println!("   scangrabber --config {}", output_path.display());

    Ok(())
}
