use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::slam::CycleOutput;
use crate::types::DetectionSource;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    // Cycle counters
    pub cycles: u64,
    pub vision_cycles: u64,
    pub lidar_cycles: u64,
    pub failed_cycles: u64,
    // Detection bookkeeping
    pub detections_processed: u64,
    pub detections_rejected: u64,
    pub updates_applied: u64,
    pub updates_skipped: u64,
    pub landmarks_added: u64,
    pub landmarks_pruned: u64,
    // Map
    pub landmark_count: usize,
    pub local_cone_count: usize,
    // Vehicle pose (map frame)
    pub pose_x: f64,
    pub pose_y: f64,
    pub pose_heading_deg: f64,
    // Timing
    pub last_stamp: f64,
    pub last_latency_ms: f64,
    pub max_latency_ms: f64,
    // Input queues
    pub dropped_inputs: u64,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0,
            cycles: 0,
            vision_cycles: 0,
            lidar_cycles: 0,
            failed_cycles: 0,
            detections_processed: 0,
            detections_rejected: 0,
            updates_applied: 0,
            updates_skipped: 0,
            landmarks_added: 0,
            landmarks_pruned: 0,
            landmark_count: 0,
            local_cone_count: 0,
            pose_x: 0.0,
            pose_y: 0.0,
            pose_heading_deg: 0.0,
            last_stamp: 0.0,
            last_latency_ms: 0.0,
            max_latency_ms: 0.0,
            dropped_inputs: 0,
        }
    }

    /// Fold one cycle's output into the running counters.
    pub fn record_cycle(&mut self, output: &CycleOutput) {
        let stats = &output.stats;
        self.cycles += 1;
        match stats.source {
            Some(DetectionSource::Vision) => self.vision_cycles += 1,
            Some(DetectionSource::Lidar) => self.lidar_cycles += 1,
            None => {}
        }
        self.detections_processed += stats.detections as u64;
        self.detections_rejected += stats.rejected as u64;
        self.updates_applied += stats.updates as u64;
        self.updates_skipped += stats.skipped as u64;
        self.landmarks_added += stats.augments as u64;
        self.landmarks_pruned += stats.pruned as u64;

        self.landmark_count = stats.landmark_count;
        self.local_cone_count = output.local_map.cones.len();
        self.pose_x = output.pose.x;
        self.pose_y = output.pose.y;
        self.pose_heading_deg = output.pose.heading.to_degrees();

        self.last_stamp = output.stamp;
        self.last_latency_ms = stats.latency_ms;
        self.max_latency_ms = self.max_latency_ms.max(stats.latency_ms);
    }

    pub fn record_failure(&mut self) {
        self.failed_cycles += 1;
    }

    /// Refresh the wall-clock fields before writing.
    pub fn touch(&mut self, started_at: f64) {
        self.timestamp = current_timestamp();
        self.uptime_seconds = (self.timestamp - started_at).max(0.0) as u64;
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slam::{CycleStats, SlamEvent};
    use crate::types::{Pose2D, TrackMap};

    fn output(source: DetectionSource, latency_ms: f64) -> CycleOutput {
        CycleOutput {
            stamp: 1.5,
            pose: Pose2D::new(1.0, 2.0, std::f64::consts::FRAC_PI_2),
            global_map: TrackMap::default(),
            local_map: TrackMap::default(),
            stats: CycleStats {
                source: Some(source),
                detections: 4,
                updates: 2,
                augments: 1,
                rejected: 1,
                landmark_count: 9,
                latency_ms,
                ..CycleStats::default()
            },
            events: vec![SlamEvent::LandmarksPruned { count: 0 }],
        }
    }

    #[test]
    fn test_record_cycle_accumulates() {
        let mut status = LiveStatus::new();
        status.record_cycle(&output(DetectionSource::Vision, 3.0));
        status.record_cycle(&output(DetectionSource::Lidar, 1.0));

        assert_eq!(status.cycles, 2);
        assert_eq!(status.vision_cycles, 1);
        assert_eq!(status.lidar_cycles, 1);
        assert_eq!(status.detections_processed, 8);
        assert_eq!(status.updates_applied, 4);
        assert_eq!(status.landmarks_added, 2);
        assert_eq!(status.detections_rejected, 2);
        assert_eq!(status.landmark_count, 9);
        assert!((status.pose_heading_deg - 90.0).abs() < 1e-9);
        assert_eq!(status.last_latency_ms, 1.0);
        assert_eq!(status.max_latency_ms, 3.0);
    }

    #[test]
    fn test_save_writes_json() {
        let path = std::env::temp_dir().join(format!("track_slam_status_{}.json", std::process::id()));
        let path_str = path.to_string_lossy().to_string();
        let mut status = LiveStatus::new();
        status.record_failure();
        status.save(&path_str).unwrap();

        let loaded: LiveStatus = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.failed_cycles, 1);
        let _ = fs::remove_file(&path);
    }
}
