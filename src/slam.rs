// slam.rs — Per-cycle orchestration for cone-track SLAM
//
// Pure computation: no threads, channels or file I/O. One synchronized
// (pose, detection batch) pair goes in, a global and a local map come out.
// The worker and the replay binary both drive this type.

use std::fs;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{SlamError, SlamResult};
use crate::filters::{AssociationPolicy, DetectionOutcome, EkfSlam, EkfSlamConfig, SkipReason};
use crate::transform::PoseTransform;
use crate::types::{
    ConeColor, DetectionBatch, DetectionSource, MapCone, MeasureNoise, Pose2D, PoseMat,
    PoseStamped, TrackMap, MAP_FRAME, VEHICLE_FRAME,
};
use crate::window::{flatten, MapWindow};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamConfig {
    // ── Measurement model ──
    pub range_std: f64,
    pub bearing_std: f64,

    // ── Association ──
    pub association_radius: f64,
    pub association_policy: AssociationPolicy,

    // ── Map maintenance ──
    pub min_observations: u32,
    pub symmetrize: bool,

    // ── Local map window ──
    pub forward_limit: f64,
    pub lateral_limit: f64,

    // ── Initial state ──
    pub initial_pose: Pose2D,
    pub initial_variance: f64,
    pub capture_origin: bool,

    // ── Synchronization ──
    pub sync_queue_size: usize,
    pub sync_slop: f64,
}

impl Default for SlamConfig {
    fn default() -> Self {
        Self {
            range_std: 1.0,
            bearing_std: 0.8,
            association_radius: 2.0,
            association_policy: AssociationPolicy::FirstCandidate,
            min_observations: 7,
            symmetrize: true,
            forward_limit: 10.0,
            lateral_limit: 10.0,
            initial_pose: Pose2D::new(3.0, 0.0, 0.0),
            initial_variance: 0.01,
            capture_origin: true,
            sync_queue_size: 20,
            sync_slop: 0.2,
        }
    }
}

impl SlamConfig {
    pub fn validate(&self) -> SlamResult<()> {
        let non_negative = [
            ("range_std", self.range_std),
            ("bearing_std", self.bearing_std),
            ("initial_variance", self.initial_variance),
            ("sync_slop", self.sync_slop),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(SlamError::InvalidConfig(format!("{} must be finite and >= 0, got {}", name, value)));
            }
        }

        let positive = [
            ("association_radius", self.association_radius),
            ("forward_limit", self.forward_limit),
            ("lateral_limit", self.lateral_limit),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(SlamError::InvalidConfig(format!("{} must be finite and > 0, got {}", name, value)));
            }
        }

        if !self.initial_pose.is_finite() {
            return Err(SlamError::InvalidConfig("initial_pose must be finite".into()));
        }
        if self.sync_queue_size == 0 {
            return Err(SlamError::InvalidConfig("sync_queue_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Read a JSON config; missing fields keep their defaults.
    pub fn load(path: &Path) -> SlamResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: SlamConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Q = diag(range_std², bearing_std²)
    #[rustfmt::skip]
    pub fn sensor_noise(&self) -> MeasureNoise {
        MeasureNoise::new(
            self.range_std * self.range_std, 0.0,
            0.0, self.bearing_std * self.bearing_std,
        )
    }

    pub fn filter_config(&self) -> EkfSlamConfig {
        EkfSlamConfig {
            sensor_noise: self.sensor_noise(),
            association_radius: self.association_radius,
            association_policy: self.association_policy,
            min_observations: self.min_observations,
            symmetrize: self.symmetrize,
        }
    }

    pub fn window(&self) -> MapWindow {
        MapWindow::new(self.forward_limit, self.lateral_limit)
    }

    pub fn initial_covariance(&self) -> PoseMat {
        PoseMat::identity() * self.initial_variance
    }
}

// ─── Events emitted by a cycle ───────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SlamEvent {
    OriginCaptured { x: f64, y: f64, heading: f64 },
    LandmarkAdded { index: usize, x: f64, y: f64, color: ConeColor },
    DetectionRejected { range: f64, bearing: f64 },
    UpdateSkipped { index: usize, reason: SkipReason },
    LandmarksPruned { count: usize },
}

// ─── Cycle output ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleStats {
    pub cycle: u64,
    pub source: Option<DetectionSource>,
    pub detections: usize,
    pub updates: usize,
    pub augments: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub pruned: usize,
    pub landmark_count: usize,
    pub latency_ms: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleOutput {
    pub stamp: f64,
    pub pose: Pose2D,
    pub global_map: TrackMap,
    pub local_map: TrackMap,
    pub stats: CycleStats,
    pub events: Vec<SlamEvent>,
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct TrackSlam {
    config: SlamConfig,
    transform: PoseTransform,
    filter: EkfSlam,
    window: MapWindow,
    cycles: u64,
}

impl TrackSlam {
    pub fn new(config: SlamConfig) -> SlamResult<Self> {
        config.validate()?;
        let filter = EkfSlam::new(
            config.filter_config(),
            config.initial_pose,
            config.initial_covariance(),
        );
        Ok(Self {
            transform: PoseTransform::new(config.capture_origin),
            window: config.window(),
            filter,
            config,
            cycles: 0,
        })
    }

    pub fn config(&self) -> &SlamConfig {
        &self.config
    }

    pub fn filter(&self) -> &EkfSlam {
        &self.filter
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn origin(&self) -> Option<Pose2D> {
        self.transform.origin()
    }

    /// Run one full cycle: transform, predict, associate/update/augment each
    /// detection in order, prune, then build both maps.
    pub fn process_cycle(
        &mut self,
        pose: &PoseStamped,
        batch: &DetectionBatch,
        source: DetectionSource,
    ) -> SlamResult<CycleOutput> {
        let started = Instant::now();
        let mut events = Vec::new();

        let had_origin = self.transform.is_origin_set();
        let (planar, covariance) = self.transform.apply(pose)?;
        if !had_origin {
            if let Some(origin) = self.transform.origin() {
                events.push(SlamEvent::OriginCaptured {
                    x: origin.x,
                    y: origin.y,
                    heading: origin.heading,
                });
            }
        }

        self.filter.predict(&planar, &covariance);
        self.filter.begin_cycle();

        let mut stats = CycleStats {
            cycle: self.cycles,
            source: Some(source),
            detections: batch.detections.len(),
            ..CycleStats::default()
        };

        for detection in &batch.detections {
            match self.filter.process_detection(detection) {
                DetectionOutcome::Updated { .. } => stats.updates += 1,
                DetectionOutcome::Augmented { index } => {
                    stats.augments += 1;
                    let lm = &self.filter.landmarks()[index];
                    events.push(SlamEvent::LandmarkAdded {
                        index,
                        x: lm.x,
                        y: lm.y,
                        color: lm.color,
                    });
                }
                DetectionOutcome::UpdateSkipped { index, reason } => {
                    stats.skipped += 1;
                    events.push(SlamEvent::UpdateSkipped { index, reason });
                }
                DetectionOutcome::Rejected => {
                    stats.rejected += 1;
                    events.push(SlamEvent::DetectionRejected {
                        range: detection.range,
                        bearing: detection.bearing,
                    });
                }
            }
        }

        let pruned = self.filter.prune();
        if !pruned.is_empty() {
            stats.pruned = pruned.len();
            events.push(SlamEvent::LandmarksPruned { count: pruned.len() });
        }

        let stamp = pose.timestamp;
        let global_map = self.global_map(stamp);
        let local_map = self.local_map(stamp);

        stats.landmark_count = self.filter.landmark_count();
        stats.latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.cycles += 1;

        log::debug!(
            "cycle {} ({:?}): {} det, {} upd, {} new, {} pruned, {} landmarks, {:.2} ms",
            stats.cycle,
            source,
            stats.detections,
            stats.updates,
            stats.augments,
            stats.pruned,
            stats.landmark_count,
            stats.latency_ms
        );

        Ok(CycleOutput {
            stamp,
            pose: self.filter.pose(),
            global_map,
            local_map,
            stats,
            events,
        })
    }

    /// All landmarks in the map frame with their 2×2 covariance blocks.
    pub fn global_map(&self, stamp: f64) -> TrackMap {
        let cones = self
            .filter
            .landmarks()
            .iter()
            .enumerate()
            .map(|(k, lm)| MapCone {
                x: lm.x,
                y: lm.y,
                color: lm.color,
                covariance: self
                    .filter
                    .landmark_covariance(k)
                    .map(|cov| flatten(&cov))
                    .unwrap_or_default(),
            })
            .collect();
        TrackMap {
            stamp,
            frame: MAP_FRAME.to_string(),
            cones,
        }
    }

    /// Windowed landmarks in the vehicle frame.
    pub fn local_map(&self, stamp: f64) -> TrackMap {
        let covariances: Vec<_> = (0..self.filter.landmark_count())
            .filter_map(|k| self.filter.landmark_covariance(k))
            .collect();
        TrackMap {
            stamp,
            frame: VEHICLE_FRAME.to_string(),
            cones: self
                .window
                .select(&self.filter.pose(), self.filter.landmarks(), &covariances),
        }
    }
}
