//! EKF-SLAM over an externally localized vehicle and a cone map
//!
//! The pose block is substituted every cycle from the localization source
//! (no motion model). Detections are associated against the current map by
//! radius; matches run a joint range/bearing EKF update, misses augment the
//! state with a new landmark. Unconfirmed landmarks that fall behind the
//! vehicle are pruned once per cycle.
//!
//! State layout is documented in [`super::joint_state`].

use nalgebra::{DMatrix, DVector, SMatrix};
use serde::{Deserialize, Serialize};

use super::joint_state::JointState;
use crate::spatial::LandmarkTree;
use crate::transform::wrap_to_pi;
use crate::types::{
    landmark_offset, ConeColor, Detection, Landmark, LandmarkMat, LandmarkVec, MeasureNoise,
    MeasureVec, Pose2D, PoseMat, SparseJacobian, SPARSE_COLS,
};

/// How to pick among several landmarks inside the association radius.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationPolicy {
    /// Lowest landmark index among the candidates (oldest landmark first).
    #[default]
    FirstCandidate,
    /// Smallest Euclidean distance to the detection's map position.
    NearestCandidate,
}

#[derive(Clone, Debug)]
pub struct EkfSlamConfig {
    /// Range/bearing measurement noise Q
    pub sensor_noise: MeasureNoise,
    /// Association radius around the detection's map position
    pub association_radius: f64,
    pub association_policy: AssociationPolicy,
    /// Landmarks seen fewer times than this are prunable once behind
    pub min_observations: u32,
    /// Re-symmetrize Σ after every update
    pub symmetrize: bool,
}

impl Default for EkfSlamConfig {
    fn default() -> Self {
        Self {
            sensor_noise: MeasureNoise::new(
                1.0, 0.0, // range variance (1.0 std)
                0.0, 0.64, // bearing variance (0.8 std)
            ),
            association_radius: 2.0,
            association_policy: AssociationPolicy::FirstCandidate,
            min_observations: 7,
            symmetrize: true,
        }
    }
}

/// Why an update against a matched landmark did not run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Innovation covariance could not be inverted
    SingularInnovation,
    /// Landmark coincides with the vehicle position
    DegenerateGeometry,
}

/// Result of feeding one detection to the filter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DetectionOutcome {
    Updated { index: usize },
    Augmented { index: usize },
    UpdateSkipped { index: usize, reason: SkipReason },
    Rejected,
}

pub struct EkfSlam {
    config: EkfSlamConfig,
    state: JointState,
    landmarks: Vec<Landmark>,
    index: LandmarkTree,
    index_stale: bool,
}

impl EkfSlam {
    pub fn new(config: EkfSlamConfig, initial_pose: Pose2D, initial_covariance: PoseMat) -> Self {
        Self {
            config,
            state: JointState::new(initial_pose.to_vec(), initial_covariance),
            landmarks: Vec::new(),
            index: LandmarkTree::new(),
            index_stale: true,
        }
    }

    pub fn config(&self) -> &EkfSlamConfig {
        &self.config
    }

    pub fn state(&self) -> &JointState {
        &self.state
    }

    pub fn pose(&self) -> Pose2D {
        Pose2D::from_vec(&self.state.pose())
    }

    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    pub fn landmark_count(&self) -> usize {
        self.landmarks.len()
    }

    pub fn landmark_covariance(&self, index: usize) -> Option<LandmarkMat> {
        self.state.landmark_covariance(index)
    }

    /// Place a known landmark in the map, uncorrelated with the rest of the state.
    pub fn seed_landmark(&mut self, landmark: Landmark, covariance: LandmarkMat) -> usize {
        let index = self.state.push_landmark(&landmark.position(), &covariance);
        self.landmarks.push(landmark);
        self.index_stale = true;
        index
    }

    /// Pose substitution: trust the external localization for this cycle.
    pub fn predict(&mut self, pose: &Pose2D, covariance: &PoseMat) {
        self.state.set_pose(&pose.to_vec(), covariance);
    }

    /// Mark the spatial index for rebuild; called once at the start of each cycle.
    pub fn begin_cycle(&mut self) {
        self.index_stale = true;
    }

    /// Map position implied by a detection from the current pose.
    pub fn detection_to_map(&self, detection: &Detection) -> LandmarkVec {
        let pose = self.pose();
        let angle = pose.heading + detection.bearing;
        LandmarkVec::new(
            pose.x + detection.range * angle.cos(),
            pose.y + detection.range * angle.sin(),
        )
    }

    /// Associate one detection and run either an update or an augmentation.
    pub fn process_detection(&mut self, detection: &Detection) -> DetectionOutcome {
        if !detection.is_valid() {
            log::warn!(
                "Rejecting malformed detection: range={} bearing={}",
                detection.range,
                detection.bearing
            );
            return DetectionOutcome::Rejected;
        }

        let candidate = self.detection_to_map(detection);
        match self.associate(&candidate) {
            Some(index) => match self.update(index, detection) {
                Ok(()) => {
                    let landmark = &mut self.landmarks[index];
                    landmark.color = merged_color(landmark.color, detection.color);
                    DetectionOutcome::Updated { index }
                }
                Err(reason) => {
                    log::debug!("Skipping update of landmark {}: {:?}", index, reason);
                    DetectionOutcome::UpdateSkipped { index, reason }
                }
            },
            None => {
                let index = self.augment(detection, &candidate);
                DetectionOutcome::Augmented { index }
            }
        }
    }

    /// Landmark to update for a detection at `candidate`, if any lies within
    /// the association radius.
    pub fn associate(&mut self, candidate: &LandmarkVec) -> Option<usize> {
        if self.landmarks.is_empty() {
            return None;
        }
        self.refresh_index();

        let hits = self
            .index
            .within_radius([candidate.x, candidate.y], self.config.association_radius);

        match self.config.association_policy {
            AssociationPolicy::FirstCandidate => hits.iter().map(|h| h.index).min(),
            AssociationPolicy::NearestCandidate => hits
                .iter()
                .map(|h| {
                    let dx = h.position[0] - candidate.x;
                    let dy = h.position[1] - candidate.y;
                    (h.index, dx * dx + dy * dy)
                })
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                .map(|(index, _)| index),
        }
    }

    /// Joint EKF update against landmark `index`.
    ///
    /// H is nonzero only in the pose columns and the landmark's two columns,
    /// so ΣHᵀ and HΣ are assembled from those five rows/cols of Σ.
    pub fn update(&mut self, index: usize, detection: &Detection) -> Result<(), SkipReason> {
        let pose = self.pose();
        let landmark = self
            .state
            .landmark(index)
            .ok_or(SkipReason::DegenerateGeometry)?;

        let dx = landmark.x - pose.x;
        let dy = landmark.y - pose.y;
        let q = dx * dx + dy * dy;
        let range_hat = q.sqrt();
        if range_hat < 1e-9 {
            return Err(SkipReason::DegenerateGeometry);
        }
        let bearing_hat = wrap_to_pi(dy.atan2(dx) - pose.heading);

        let innovation = MeasureVec::new(
            detection.range - range_hat,
            wrap_to_pi(detection.bearing - bearing_hat),
        );

        // Columns: px, py, θ, lx, ly
        #[rustfmt::skip]
        let h = SparseJacobian::new(
            -dx / range_hat, -dy / range_hat,  0.0, dx / range_hat, dy / range_hat,
             dy / q,         -dx / q,         -1.0, -dy / q,        dx / q,
        );

        let base = landmark_offset(index);
        let cols = [0, 1, 2, base, base + 1];
        let n = self.state.dim();
        let sigma = self.state.sigma();

        let sigma_cc = SMatrix::<f64, SPARSE_COLS, SPARSE_COLS>::from_fn(|r, c| {
            sigma[(cols[r], cols[c])]
        });
        let s = h * sigma_cc * h.transpose() + self.config.sensor_noise;
        let s_inv = s.try_inverse().ok_or(SkipReason::SingularInnovation)?;
        if s_inv.iter().any(|v| !v.is_finite()) {
            return Err(SkipReason::SingularInnovation);
        }

        let h_dyn = DMatrix::from_fn(2, SPARSE_COLS, |r, c| h[(r, c)]);
        let sigma_cols = DMatrix::from_fn(n, SPARSE_COLS, |r, c| sigma[(r, cols[c])]);
        let sigma_rows = DMatrix::from_fn(SPARSE_COLS, n, |r, c| sigma[(cols[r], c)]);

        // K = Σ Hᵀ S⁻¹
        let pht = &sigma_cols * h_dyn.transpose();
        let gain = pht * DMatrix::from_fn(2, 2, |r, c| s_inv[(r, c)]);

        // μ ← μ + K z ;  Σ ← Σ − K (H Σ)
        let delta = &gain * DVector::from_column_slice(innovation.as_slice());
        let h_sigma = &h_dyn * &sigma_rows;
        let reduction = &gain * &h_sigma;
        self.state.apply_correction(&delta, &reduction);

        let heading = self.state.pose()[2];
        self.state.set_heading(wrap_to_pi(heading));
        if self.config.symmetrize {
            self.state.symmetrize();
        }

        self.sync_landmarks_from_state();
        self.landmarks[index].observation_count += 1;
        Ok(())
    }

    /// Append a new landmark at `position` with block Lz·Q·Lzᵀ and zero cross terms.
    pub fn augment(&mut self, detection: &Detection, position: &LandmarkVec) -> usize {
        let pose = self.pose();
        let angle = pose.heading + detection.bearing;
        let (s, c) = angle.sin_cos();
        let r = detection.range;

        // ∂(landmark)/∂(range, bearing)
        #[rustfmt::skip]
        let lz = LandmarkMat::new(
            c, -r * s,
            s,  r * c,
        );
        let covariance = lz * self.config.sensor_noise * lz.transpose();

        let index = self.state.push_landmark(position, &covariance);
        self.landmarks.push(Landmark {
            x: position.x,
            y: position.y,
            color: detection.color,
            observation_count: 1,
        });
        if !self.index_stale {
            self.index.insert([position.x, position.y], index);
        }
        index
    }

    /// Remove every landmark that is both behind the vehicle and seen fewer
    /// than `min_observations` times. Returns the removed landmarks.
    pub fn prune(&mut self) -> Vec<Landmark> {
        let pose = self.pose();
        let (sin_h, cos_h) = pose.heading.sin_cos();
        let min_observations = self.config.min_observations;

        let doomed: Vec<usize> = self
            .landmarks
            .iter()
            .enumerate()
            .filter(|(_, lm)| {
                let behind = (lm.x - pose.x) * cos_h + (lm.y - pose.y) * sin_h < 0.0;
                let noisy = lm.observation_count < min_observations;
                behind && noisy
            })
            .map(|(i, _)| i)
            .collect();

        if doomed.is_empty() {
            return Vec::new();
        }

        self.state.remove_landmarks(&doomed);

        let mut removed = Vec::with_capacity(doomed.len());
        let mut doomed_iter = doomed.iter().peekable();
        let mut kept = Vec::with_capacity(self.landmarks.len() - doomed.len());
        for (i, lm) in self.landmarks.drain(..).enumerate() {
            if doomed_iter.peek() == Some(&&i) {
                doomed_iter.next();
                removed.push(lm);
            } else {
                kept.push(lm);
            }
        }
        self.landmarks = kept;
        self.index_stale = true;
        removed
    }

    fn refresh_index(&mut self) {
        if self.index_stale || self.index.landmark_count() != self.landmarks.len() {
            self.index = LandmarkTree::from_landmarks(&self.landmarks);
            self.index_stale = false;
        }
    }

    // The update touches every landmark through cross-covariance.
    fn sync_landmarks_from_state(&mut self) {
        let mu = self.state.mu();
        for (k, lm) in self.landmarks.iter_mut().enumerate() {
            let base = landmark_offset(k);
            lm.x = mu[base];
            lm.y = mu[base + 1];
        }
    }
}

/// Color of a landmark after a matched detection of `incoming` color.
pub fn merged_color(current: ConeColor, incoming: ConeColor) -> ConeColor {
    if incoming.is_known() {
        incoming
    } else {
        current
    }
}
