//! capture_ctl - one-shot capture, upload and inspection commands.
//!
//! Uses the same configuration as the daemon; flags override the request
//! defaults only.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use edge_capture::{pipeline_from_config, CaptureRequest, CaptureSchedule, EdgeConfig};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run turntable captures and uploads without the HTTP daemon"
)]
struct Args {
    /// JSON config file; environment overrides still apply on top.
    #[arg(long, global = true, env = "EDGE_CAPTURE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture a full rotation for a job.
    Capture {
        /// Job identifier (used as the job directory name).
        car_code: String,
        /// Turntable speed in rotations per minute.
        #[arg(long)]
        rpm: Option<f64>,
        /// Number of frames to keep.
        #[arg(long)]
        frames: Option<u32>,
    },
    /// Package a captured job and upload it to the ingestion core.
    Upload { car_code: String },
    /// Package a captured job without uploading.
    Package { car_code: String },
    /// Print how many frames are on disk for a job.
    Progress { car_code: String },
    /// Print the capture schedule for the given speed and frame count.
    Schedule {
        #[arg(long)]
        rpm: Option<f64>,
        #[arg(long)]
        frames: Option<u32>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = EdgeConfig::load_from(args.config.as_deref())?;
    let pipeline = pipeline_from_config(&cfg);

    match args.command {
        Command::Capture {
            car_code,
            rpm,
            frames,
        } => {
            let request = CaptureRequest {
                identifier: car_code,
                rpm: rpm.unwrap_or(cfg.defaults.rpm),
                frames: frames.unwrap_or(cfg.defaults.frames),
            };
            let outcome = pipeline.capture(&request)?;
            if let Some(note) = &outcome.note {
                log::info!("{}", note);
            }
            println!("{}", serde_json::to_string_pretty(&outcome.manifest)?);
            if outcome.partial {
                log::warn!(
                    "only {} of {} frames captured",
                    outcome.frames,
                    request.frames
                );
            }
        }
        Command::Upload { car_code } => {
            let receipt = pipeline.upload(&car_code)?;
            if !receipt.success {
                log::warn!("ingestion core did not report success");
            }
            println!("{}", serde_json::to_string_pretty(&receipt.body)?);
        }
        Command::Package { car_code } => {
            let packaged = pipeline.package(&car_code)?;
            println!(
                "{} ({} frames, {} bytes)",
                packaged.archive.display(),
                packaged.frames,
                packaged.bytes
            );
        }
        Command::Progress { car_code } => {
            let frames = pipeline.progress(&car_code)?;
            println!("{}", frames);
        }
        Command::Schedule { rpm, frames } => {
            let schedule = CaptureSchedule::compute(
                rpm.unwrap_or(cfg.defaults.rpm),
                frames.unwrap_or(cfg.defaults.frames),
                cfg.capture.slack_ms,
            )?;
            println!(
                "revolution={:.3}s interval={}ms timeout={}ms expected_frames={}",
                schedule.revolution_secs,
                schedule.frame_interval_ms,
                schedule.process_timeout_ms,
                schedule.expected_frames()
            );
        }
    }
    Ok(())
}
