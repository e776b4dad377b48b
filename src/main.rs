use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use track_slam::live_status::{current_timestamp, LiveStatus};
use track_slam::worker::WorkerOptions;
use track_slam::{CycleOutput, Session, SlamConfig, SlamPipeline, SlamWorker, TrackMap};

#[derive(Parser, Debug)]
#[command(name = "track_slam")]
#[command(about = "Cone-track EKF-SLAM - replay a recorded pose/detection session", long_about = None)]
struct Args {
    /// Recorded session (.json or .json.gz)
    #[arg(long)]
    session: PathBuf,

    /// JSON config overriding the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(long, default_value = "track_slam_sessions")]
    output_dir: String,

    /// Write live status every N cycles (0 = only at the end)
    #[arg(long, default_value = "10")]
    status_every: u64,

    /// Pace messages by their timestamps and run through the worker thread
    #[arg(long, default_value_t = false)]
    realtime: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("[{}] Track SLAM Starting", ts_now());
    println!("  Session: {}", args.session.display());
    println!("  Output Dir: {}", args.output_dir);
    println!("  Mode: {}", if args.realtime { "realtime (worker)" } else { "replay" });

    let config = match &args.config {
        Some(path) => SlamConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SlamConfig::default(),
    };

    let session = Session::load(&args.session)
        .with_context(|| format!("loading session {}", args.session.display()))?;
    let (poses, vision, lidar) = session.counts();
    println!(
        "[{}] Loaded {} messages ({} pose, {} vision, {} lidar)",
        ts_now(),
        session.len(),
        poses,
        vision,
        lidar
    );

    std::fs::create_dir_all(&args.output_dir)?;
    let status_path = format!("{}/live_status.json", args.output_dir);

    let (outputs, final_map, mut status) = if args.realtime {
        run_realtime(config, session, &args, &status_path)?
    } else {
        run_replay(config, session, &args, &status_path)?
    };

    let cycles_path = format!("{}/cycles_{}.json", args.output_dir, ts_now_clean());
    std::fs::write(&cycles_path, serde_json::to_string(&outputs)?)?;

    let map_path = format!("{}/map_{}_final.json", args.output_dir, ts_now_clean());
    std::fs::write(&map_path, serde_json::to_string_pretty(&final_map)?)?;

    status.timestamp = current_timestamp();
    let final_status_path = format!("{}/live_status_final.json", args.output_dir);
    let _ = status.save(&final_status_path);

    println!("\n=== Final Stats ===");
    println!("Cycles: {} ({} vision, {} lidar, {} failed)", status.cycles, status.vision_cycles, status.lidar_cycles, status.failed_cycles);
    println!("Landmarks: {} (added {}, pruned {})", final_map.cones.len(), status.landmarks_added, status.landmarks_pruned);
    println!("Detections: {} ({} rejected, {} updates skipped)", status.detections_processed, status.detections_rejected, status.updates_skipped);
    println!("Latency: last {:.2} ms, max {:.2} ms", status.last_latency_ms, status.max_latency_ms);
    println!("Dropped inputs: {}", status.dropped_inputs);
    println!("[{}] Wrote {} and {}", ts_now(), cycles_path, map_path);

    Ok(())
}

/// Feed every message straight into the pipeline, in file order.
fn run_replay(
    config: SlamConfig,
    session: Session,
    args: &Args,
    status_path: &str,
) -> Result<(Vec<CycleOutput>, TrackMap, LiveStatus)> {
    let started_at = current_timestamp();
    let mut pipeline = SlamPipeline::new(config)?;
    let mut outputs = Vec::new();

    for msg in session.messages {
        for output in pipeline.handle(msg.into()) {
            let cycle = output.stats.cycle;
            outputs.push(output);
            if args.status_every > 0 && (cycle + 1) % args.status_every == 0 {
                let status = pipeline.status_mut();
                status.touch(started_at);
                if let Err(e) = status.save(status_path) {
                    log::warn!("Failed to write status: {}", e);
                }
            }
        }
    }

    let summary = pipeline.finish();
    Ok((outputs, summary.final_map, summary.status))
}

/// Submit messages to the worker thread at their recorded pace.
fn run_realtime(
    config: SlamConfig,
    session: Session,
    args: &Args,
    status_path: &str,
) -> Result<(Vec<CycleOutput>, TrackMap, LiveStatus)> {
    let options = WorkerOptions {
        status_path: Some(status_path.to_string()),
        status_every: args.status_every,
        ..WorkerOptions::default()
    };
    let (worker, handle, output_rx) = SlamWorker::spawn(config, options)?;

    let mut outputs = Vec::new();
    let mut last_stamp: Option<f64> = None;
    for msg in session.messages {
        let stamp = msg.timestamp();
        if let Some(prev) = last_stamp {
            let gap = stamp - prev;
            if gap > 0.0 && gap.is_finite() {
                sleep(Duration::from_secs_f64(gap.min(1.0)));
            }
        }
        last_stamp = Some(stamp);
        handle.submit(msg.into())?;
        outputs.extend(output_rx.try_iter());
    }

    handle.shutdown()?;
    let summary = worker.join()?;
    outputs.extend(output_rx.try_iter());
    Ok((outputs, summary.final_map, summary.status))
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
