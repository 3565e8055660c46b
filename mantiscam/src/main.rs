/*!
# MantisCam Control CLI

Command-line front end for a running MantisCam camera backend.

## Usage

### Set and verify the exposure
```bash
mantiscam exposure 20
```

### Auto-exposure on a processed plane
```bash
mantiscam auto-exposure --frame-name HDR --target-mean 30000
```

### Record 500 frames and wait for the backend to finish
```bash
mantiscam record --frames 500
```

### Record until Ctrl+C
```bash
mantiscam record --until-stop
```

### Generate a configuration file
```bash
mantiscam config --output mantiscam.toml
```
*/

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mantiscam::config::AppConfig;
use mantiscam::{AutoExposureParams, CameraClient, HealthBridge, TracingHealthSink, ZmqTransport};
use serde_json::Value;
use shared::message::{FileNaming, FolderNaming};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "mantiscam")]
#[command(about = "Control client for the MantisCam camera backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "mantiscam.toml")]
    config: PathBuf,

    /// Backend host, overrides the configuration file
    #[arg(long)]
    host: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the exposure and verify it from frame telemetry
    Exposure {
        /// Exposure in milliseconds
        exposure_ms: f64,

        /// Verification timeout per attempt in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Report a missing confirmation instead of failing
        #[arg(long)]
        lenient: bool,
    },

    /// Run closed-loop auto-exposure
    AutoExposure {
        /// Frame to meter on ("Raw" or a processed frame name)
        #[arg(long, default_value = "Raw")]
        frame_name: String,

        #[arg(long, default_value = "30000")]
        target_mean: f64,

        #[arg(long, default_value = "0.1")]
        min_exp_ms: f64,

        #[arg(long, default_value = "1000")]
        max_exp_ms: f64,

        #[arg(long, default_value = "10")]
        max_iter: u32,

        #[arg(long, default_value = "500")]
        hysteresis: f64,

        /// Channel of a multi-channel frame to meter on
        #[arg(long)]
        sub_frame_type: Option<String>,

        /// Meter on the brightest channel
        #[arg(long)]
        use_max_channel: bool,
    },

    /// Start a recording
    Record {
        /// Frames to record
        #[arg(short = 'n', long, default_value = "100")]
        frames: u32,

        /// Frames per output file (defaults to all frames in one file, or 1000 with --until-stop)
        #[arg(long)]
        frames_per_file: Option<u32>,

        /// Record until Ctrl+C instead of a fixed frame count
        #[arg(long)]
        until_stop: bool,

        /// Return as soon as the recording started
        #[arg(long)]
        no_wait: bool,
    },

    /// Stop a running recording
    Stop {
        #[arg(long, default_value = "10")]
        timeout_s: u64,
    },

    /// List the processed frame names the backend publishes
    Frames {
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// Stop once no new name appeared for this long
        #[arg(long, default_value = "1000")]
        settle_ms: u64,
    },

    /// Show the hardware node catalog
    Nodes,

    /// Write a hardware node
    SetNode {
        name: String,

        /// Value, parsed as JSON when possible
        value: String,
    },

    /// Set the recording file name (omit for timestamp-only names)
    FileName { name: Option<String> },

    /// Set the recording folder name (omit for timestamp-only names)
    FolderName {
        name: Option<String>,

        /// Write recordings straight into the save directory
        #[arg(long, conflicts_with = "name")]
        no_new_folder: bool,
    },

    /// Set the directory the backend saves recordings into
    SaveDir { path: String },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "mantiscam.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        return generate_config_file(output);
    }

    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(host) = &cli.host {
        config.camera.host = host.clone();
    }

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::from_str(&config.logging.level)
            .with_context(|| format!("Invalid log level '{}'", config.logging.level))?
    };

    // Logs go to stderr so stdout only carries results
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    let transport = ZmqTransport::new(config.endpoints());
    let health = HealthBridge::new(TracingHealthSink, config.health_throttle());
    let mut camera = CameraClient::connect(transport, health, config.client_options())
        .context("Failed to connect to camera backend")?;

    run_command(&mut camera, cli.command)?;

    camera.close();
    Ok(())
}

fn run_command(camera: &mut CameraClient<ZmqTransport>, command: Commands) -> Result<()> {
    match command {
        Commands::Exposure { exposure_ms, timeout_ms, lenient } => {
            let timeout = timeout_ms.map(Duration::from_millis);
            if camera.set_exposure(exposure_ms, !lenient, timeout)? {
                println!("✅ Exposure set to {} ms", exposure_ms);
            } else {
                println!("⚠️ Exposure {} ms sent but not confirmed", exposure_ms);
            }
        }

        Commands::AutoExposure {
            frame_name,
            target_mean,
            min_exp_ms,
            max_exp_ms,
            max_iter,
            hysteresis,
            sub_frame_type,
            use_max_channel,
        } => {
            let params = AutoExposureParams {
                min_exp_ms,
                max_exp_ms,
                max_iter,
                hysteresis,
                sub_frame_type,
                use_max_channel,
                frame_timeout: camera.options().frame_timeout,
                ..AutoExposureParams::new(frame_name, target_mean)
            };
            let exposure = camera.run_auto_exposure(&params)?;
            println!("✅ Auto-exposure finished at {} ms", exposure);
        }

        Commands::Record { frames, frames_per_file, until_stop, no_wait } => {
            if until_stop {
                record_until_stop(camera, frames_per_file)?;
            } else if camera.start_recording("n_frames", frames, frames_per_file, !no_wait, true)? {
                println!("✅ Recording of {} frames {}", frames, if no_wait { "started" } else { "finished" });
            }
        }

        Commands::Stop { timeout_s } => {
            camera.stop_recording(Duration::from_secs(timeout_s), true)?;
            println!("⏹️ Recording stopped");
        }

        Commands::Frames { timeout_ms, settle_ms } => {
            let names = camera.isp_frame_names(
                Duration::from_millis(timeout_ms),
                Duration::from_millis(settle_ms),
                true,
            )?;
            if names.is_empty() {
                println!("No processed frames received");
            }
            for name in names {
                println!("{}", name);
            }
        }

        Commands::Nodes => {
            let catalog = camera.refresh_catalog(None)?;
            if catalog.is_fallback() {
                println!("(backend did not publish a catalog, showing fallback)");
            }
            for node in catalog.nodes() {
                let value = node.value.as_ref().map(Value::to_string).unwrap_or_else(|| "-".to_string());
                let access = if node.writable { "rw" } else { "ro" };
                println!(
                    "{:<24} {:<8} {} {}/{} = {} {}",
                    node.name,
                    format!("{:?}", node.kind).to_lowercase(),
                    access,
                    node.topic,
                    node.command,
                    value,
                    node.unit.as_deref().unwrap_or("")
                );
            }
        }

        Commands::SetNode { name, value } => {
            let parsed = serde_json::from_str(&value).unwrap_or(Value::String(value));
            camera.set_node(&name, parsed)?;
            println!("✅ Node '{}' written", name);
        }

        Commands::FileName { name } => {
            camera.set_file_name(name.map_or(FileNaming::Timestamp, FileNaming::Custom))?;
        }

        Commands::FolderName { name, no_new_folder } => {
            let naming = match (name, no_new_folder) {
                (_, true) => FolderNaming::NoNewFolder,
                (Some(name), false) => FolderNaming::Custom(name),
                (None, false) => FolderNaming::Timestamp,
            };
            camera.set_folder_name(naming)?;
        }

        Commands::SaveDir { path } => {
            camera.set_save_dir(&path)?;
        }

        Commands::Config { output } => generate_config_file(&output)?,
    }

    Ok(())
}

/// Record until Ctrl+C or until the backend ends the recording on its own
fn record_until_stop(camera: &mut CameraClient<ZmqTransport>, frames_per_file: Option<u32>) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 Received Ctrl+C, stopping recording...");
        flag.store(false, Ordering::SeqCst);
    })?;

    if !camera.start_recording("until_stop", 0, frames_per_file, false, true)? {
        bail!("Recording did not start");
    }
    println!("🔴 Recording, press Ctrl+C to stop");

    while running.load(Ordering::SeqCst) {
        if camera.wait_recording_state(false, Duration::from_millis(250))? {
            warn!("⚠️ Backend ended the recording on its own");
            return Ok(());
        }
    }

    camera.stop_recording(Duration::from_secs(10), true)?;
    info!("Recording stopped by user");
    println!("⏹️ Recording stopped");
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: &Path) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   mantiscam --config {} <command>", output_path.display());

    Ok(())
}
