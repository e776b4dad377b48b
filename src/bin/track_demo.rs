/// Synthetic session generator
///
/// Drives a vehicle down a straight cone-lined track (blue on the left,
/// yellow on the right, big orange at the start line) and records pose,
/// vision and lidar messages for replay with `track_slam --session`.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use track_slam::{ConeColor, Detection, DetectionBatch, PoseStamped, Session, SessionMessage};

#[derive(Parser, Debug)]
struct Args {
    /// Output session path (.json or .json.gz)
    #[arg(long, default_value = "demo_session.json.gz")]
    output: PathBuf,

    /// Track length in meters
    #[arg(long, default_value = "150.0")]
    length: f64,

    /// Cone spacing along the track
    #[arg(long, default_value = "5.0")]
    spacing: f64,

    /// Half the track width
    #[arg(long, default_value = "2.5")]
    half_width: f64,

    /// Vehicle speed (m/s)
    #[arg(long, default_value = "5.0")]
    speed: f64,

    /// Message rate per stream (Hz)
    #[arg(long, default_value = "10.0")]
    rate: f64,
}

struct Cone {
    x: f64,
    y: f64,
    color: ConeColor,
}

fn build_track(args: &Args) -> Vec<Cone> {
    let mut cones = vec![
        Cone { x: 0.0, y: args.half_width + 0.5, color: ConeColor::OrangeBig },
        Cone { x: 0.0, y: -args.half_width - 0.5, color: ConeColor::OrangeBig },
    ];
    let count = (args.length / args.spacing).floor() as usize;
    for i in 1..=count {
        let x = i as f64 * args.spacing;
        cones.push(Cone { x, y: args.half_width, color: ConeColor::Blue });
        cones.push(Cone { x, y: -args.half_width, color: ConeColor::Yellow });
    }
    cones
}

/// Range/bearing to every cone inside the sensor's range and field of view.
fn observe(cones: &[Cone], x: f64, max_range: f64, half_fov: f64, colored: bool) -> Vec<Detection> {
    cones
        .iter()
        .filter_map(|c| {
            let dx = c.x - x;
            let dy = c.y;
            let range = (dx * dx + dy * dy).sqrt();
            let bearing = dy.atan2(dx);
            if range > max_range || bearing.abs() > half_fov {
                return None;
            }
            let color = if colored { c.color } else { ConeColor::Unknown };
            Some(Detection::new(range, bearing, color))
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    anyhow::ensure!(args.rate > 0.0 && args.speed > 0.0, "rate and speed must be positive");
    anyhow::ensure!(args.spacing > 0.0, "spacing must be positive");

    let cones = build_track(&args);
    let dt = 1.0 / args.rate;
    let steps = (args.length / (args.speed * dt)).ceil() as usize;

    let mut session = Session::default();
    for k in 0..steps {
        let t = k as f64 * dt;
        let x = args.speed * t;

        session.push(SessionMessage::Pose(PoseStamped::planar(t, x, 0.0, 0.0, (0.01, 0.01, 0.001))));
        session.push(SessionMessage::Vision(DetectionBatch {
            timestamp: t + 0.02,
            detections: observe(&cones, x, 15.0, 60f64.to_radians(), true),
        }));
        session.push(SessionMessage::Lidar(DetectionBatch {
            timestamp: t + 0.05,
            detections: observe(&cones, x, 20.0, 90f64.to_radians(), false),
        }));
    }

    session.save(&args.output)?;
    let (poses, vision, lidar) = session.counts();
    println!(
        "Wrote {} ({} cones, {} pose / {} vision / {} lidar messages)",
        args.output.display(),
        cones.len(),
        poses,
        vision,
        lidar
    );
    Ok(())
}
