//! framerec command-line recorder
//!
//! Drives a [`FrameRecorder`] against a synthetic render surface: counts down,
//! records for a fixed time, waits for processing to finish, then prints the
//! final frame statistics as JSON.

use anyhow::{bail, Context, Result};
use clap::Parser;
use rust_framerec::capture::SyntheticSurface;
use rust_framerec::clock::SystemClock;
use rust_framerec::config::{OutputQuality, RecorderConfig};
use rust_framerec::recorder::FrameRecorder;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Record a synthetic surface to numbered image files
#[derive(Parser, Debug)]
#[command(name = "framerec")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (FRAMEREC_* environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Capture rate in frames per second
    #[arg(long)]
    fps: Option<f64>,

    /// Capture width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Capture height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Countdown before recording, in seconds
    #[arg(long)]
    countdown: Option<f64>,

    /// Write JPEG at this quality (1-100) instead of PNG
    #[arg(long)]
    lossy: Option<u8>,

    /// Layer to leave out of the capture (repeatable)
    #[arg(long = "ignore-layer")]
    ignore_layers: Vec<u8>,

    /// Recording length in seconds, excluding the countdown
    #[arg(short, long, default_value_t = 2.0)]
    seconds: f64,

    /// Give up on processing after this many seconds
    #[arg(long, default_value_t = 60.0)]
    process_timeout: f64,

    /// Render loop rate in ticks per second
    #[arg(long, default_value_t = 120.0)]
    tick_rate: f64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn recorder_config(&self) -> Result<RecorderConfig> {
        let mut config = RecorderConfig::load(self.config.as_deref())
            .context("Failed to load recorder configuration")?;
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(fps) = self.fps {
            config.frame_rate = fps;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(countdown) = self.countdown {
            config.countdown_secs = countdown;
        }
        if let Some(quality) = self.lossy {
            config.quality = OutputQuality::Lossy { quality };
        }
        Ok(config.sanitized())
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn seconds(value: f64, what: &str) -> Result<Duration> {
    if !(value.is_finite() && value >= 0.0) {
        bail!("{what} must be a non-negative number of seconds, got {value}");
    }
    Ok(Duration::from_secs_f64(value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = cli.recorder_config()?;
    let record_for = seconds(cli.seconds, "--seconds")?;
    let process_timeout = seconds(cli.process_timeout, "--process-timeout")?;
    if !(cli.tick_rate.is_finite() && cli.tick_rate > 0.0) {
        bail!("--tick-rate must be positive");
    }
    let tick = Duration::from_secs_f64(1.0 / cli.tick_rate);

    let mut surface = SyntheticSurface::new(config.width, config.height);
    let mut recorder = FrameRecorder::new(config, Arc::new(SystemClock::new()));
    for layer in &cli.ignore_layers {
        recorder.add_layer_to_ignore(*layer);
    }

    recorder
        .start_recording()
        .context("Failed to start recording")?;

    let mut recording_since: Option<Instant> = None;
    let mut processing_since: Option<Instant> = None;
    while !recorder.is_idling() {
        recorder.tick(&mut surface);

        if recorder.is_recording() {
            let since = *recording_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= record_for {
                recorder.stop_recording();
            }
        }
        if recorder.is_processing() {
            let since = *processing_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= process_timeout {
                info!(
                    in_flight = recorder.counters().in_flight(),
                    "Processing timeout reached"
                );
                recorder.stop_processing();
            }
        }
        thread::sleep(tick);
    }

    let stats = recorder.stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).context("Failed to serialize frame stats")?
    );
    Ok(())
}
