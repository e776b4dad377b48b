//! Joint Gaussian over robot pose and landmark positions
//!
//! State Vector (3 + 2N):
//! [0-2]:       Pose (x, y, θ) in the map frame
//! [3+2k, 4+2k]: Position of landmark k
//!
//! The covariance grows by one 2×2 block per new landmark and shrinks by
//! deleting that block's rows/cols. All structural edits keep the mean and
//! covariance index-aligned.

use std::mem;

use crate::types::{
    landmark_offset, JointMat, JointVec, LandmarkMat, LandmarkVec, PoseMat, PoseVec, LANDMARK_DIM,
    POSE_DIM,
};

#[derive(Clone, Debug)]
pub struct JointState {
    /// State mean [x, y, θ, m1_x, m1_y, ...]
    mu: JointVec,
    /// State covariance (3+2N × 3+2N)
    sigma: JointMat,
}

impl JointState {
    pub fn new(pose: PoseVec, pose_covariance: PoseMat) -> Self {
        let mut mu = JointVec::zeros(POSE_DIM);
        mu.fixed_rows_mut::<POSE_DIM>(0).copy_from(&pose);
        let mut sigma = JointMat::zeros(POSE_DIM, POSE_DIM);
        sigma
            .fixed_view_mut::<POSE_DIM, POSE_DIM>(0, 0)
            .copy_from(&pose_covariance);
        Self { mu, sigma }
    }

    pub fn dim(&self) -> usize {
        self.mu.len()
    }

    pub fn landmark_count(&self) -> usize {
        (self.mu.len() - POSE_DIM) / LANDMARK_DIM
    }

    pub fn mu(&self) -> &JointVec {
        &self.mu
    }

    pub fn sigma(&self) -> &JointMat {
        &self.sigma
    }

    pub fn pose(&self) -> PoseVec {
        self.mu.fixed_rows::<POSE_DIM>(0).into_owned()
    }

    pub fn pose_covariance(&self) -> PoseMat {
        self.sigma
            .fixed_view::<POSE_DIM, POSE_DIM>(0, 0)
            .into_owned()
    }

    pub fn landmark(&self, index: usize) -> Option<LandmarkVec> {
        if index >= self.landmark_count() {
            return None;
        }
        Some(
            self.mu
                .fixed_rows::<LANDMARK_DIM>(landmark_offset(index))
                .into_owned(),
        )
    }

    pub fn landmark_covariance(&self, index: usize) -> Option<LandmarkMat> {
        if index >= self.landmark_count() {
            return None;
        }
        let base = landmark_offset(index);
        Some(
            self.sigma
                .fixed_view::<LANDMARK_DIM, LANDMARK_DIM>(base, base)
                .into_owned(),
        )
    }

    /// Overwrite the pose block of the mean and covariance. Cross terms
    /// between pose and landmarks are left as they are.
    pub fn set_pose(&mut self, pose: &PoseVec, covariance: &PoseMat) {
        self.mu.fixed_rows_mut::<POSE_DIM>(0).copy_from(pose);
        self.sigma
            .fixed_view_mut::<POSE_DIM, POSE_DIM>(0, 0)
            .copy_from(covariance);
    }

    /// Apply a correction `mu ← mu + delta`, `Σ ← Σ − correction`.
    pub(crate) fn apply_correction(&mut self, delta: &JointVec, sigma_reduction: &JointMat) {
        self.mu += delta;
        self.sigma -= sigma_reduction;
    }

    pub(crate) fn set_heading(&mut self, heading: f64) {
        self.mu[2] = heading;
    }

    /// Append a landmark with its own covariance block. All cross terms with
    /// the existing state start at zero.
    pub fn push_landmark(&mut self, position: &LandmarkVec, covariance: &LandmarkMat) -> usize {
        let old_n = self.dim();
        let new_n = old_n + LANDMARK_DIM;

        let mu = mem::replace(&mut self.mu, JointVec::zeros(0));
        self.mu = mu.resize_vertically(new_n, 0.0);
        self.mu
            .fixed_rows_mut::<LANDMARK_DIM>(old_n)
            .copy_from(position);

        let sigma = mem::replace(&mut self.sigma, JointMat::zeros(0, 0));
        self.sigma = sigma.resize(new_n, new_n, 0.0);
        self.sigma
            .fixed_view_mut::<LANDMARK_DIM, LANDMARK_DIM>(old_n, old_n)
            .copy_from(covariance);

        self.landmark_count() - 1
    }

    /// Delete the given landmarks (indices into the landmark list). Survivors
    /// keep their relative order.
    pub fn remove_landmarks(&mut self, indices: &[usize]) {
        if indices.is_empty() {
            return;
        }
        let mut rows: Vec<usize> = indices
            .iter()
            .filter(|&&k| k < self.landmark_count())
            .flat_map(|&k| {
                let base = landmark_offset(k);
                [base, base + 1]
            })
            .collect();
        rows.sort_unstable();
        rows.dedup();

        let mu = mem::replace(&mut self.mu, JointVec::zeros(0));
        self.mu = mu.remove_rows_at(&rows);

        let sigma = mem::replace(&mut self.sigma, JointMat::zeros(0, 0));
        self.sigma = sigma.remove_rows_at(&rows).remove_columns_at(&rows);
    }

    /// Σ ← (Σ + Σᵀ) / 2
    pub fn symmetrize(&mut self) {
        let transposed = self.sigma.transpose();
        self.sigma += transposed;
        self.sigma *= 0.5;
    }

    /// Largest |Σ_ij − Σ_ji|
    pub fn asymmetry(&self) -> f64 {
        let n = self.dim();
        let mut worst = 0.0_f64;
        for i in 0..n {
            for j in (i + 1)..n {
                worst = worst.max((self.sigma[(i, j)] - self.sigma[(j, i)]).abs());
            }
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> JointState {
        JointState::new(PoseVec::new(3.0, 0.0, 0.0), PoseMat::identity() * 0.01)
    }

    #[test]
    fn test_push_landmark_extends_blocks() {
        let mut state = base();
        let idx = state.push_landmark(&LandmarkVec::new(8.0, 0.0), &(LandmarkMat::identity() * 2.0));
        assert_eq!(idx, 0);
        assert_eq!(state.dim(), 5);
        assert_eq!(state.sigma().shape(), (5, 5));
        assert_eq!(state.landmark(0), Some(LandmarkVec::new(8.0, 0.0)));
        assert_eq!(state.sigma()[(3, 3)], 2.0);
        assert_eq!(state.sigma()[(0, 3)], 0.0);
        assert_eq!(state.sigma()[(0, 0)], 0.01);
    }

    #[test]
    fn test_remove_landmarks_keeps_order() {
        let mut state = base();
        for k in 0..4 {
            let v = k as f64;
            state.push_landmark(&LandmarkVec::new(v, -v), &(LandmarkMat::identity() * (v + 1.0)));
        }
        state.remove_landmarks(&[1, 3]);
        assert_eq!(state.landmark_count(), 2);
        assert_eq!(state.dim(), 7);
        assert_eq!(state.sigma().shape(), (7, 7));
        assert_eq!(state.landmark(0), Some(LandmarkVec::new(0.0, 0.0)));
        assert_eq!(state.landmark(1), Some(LandmarkVec::new(2.0, -2.0)));
        assert_eq!(state.landmark_covariance(1).unwrap()[(0, 0)], 3.0);
        assert_eq!(state.pose(), PoseVec::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_remove_out_of_range_is_ignored() {
        let mut state = base();
        state.push_landmark(&LandmarkVec::new(1.0, 1.0), &LandmarkMat::identity());
        state.remove_landmarks(&[5]);
        assert_eq!(state.landmark_count(), 1);
    }

    #[test]
    fn test_set_pose_leaves_cross_terms() {
        let mut state = base();
        state.push_landmark(&LandmarkVec::new(1.0, 1.0), &LandmarkMat::identity());
        let mut reduction = JointMat::zeros(5, 5);
        reduction[(0, 3)] = -0.5;
        reduction[(3, 0)] = -0.5;
        state.apply_correction(&JointVec::zeros(5), &reduction);

        state.set_pose(&PoseVec::new(1.0, 2.0, 0.3), &(PoseMat::identity() * 4.0));
        assert_eq!(state.pose(), PoseVec::new(1.0, 2.0, 0.3));
        assert_eq!(state.pose_covariance(), PoseMat::identity() * 4.0);
        assert_eq!(state.sigma()[(0, 3)], 0.5);
    }

    #[test]
    fn test_symmetrize() {
        let mut state = base();
        state.push_landmark(&LandmarkVec::new(1.0, 1.0), &LandmarkMat::identity());
        let mut reduction = JointMat::zeros(5, 5);
        reduction[(1, 4)] = 0.2;
        state.apply_correction(&JointVec::zeros(5), &reduction);
        assert!(state.asymmetry() > 0.1);
        state.symmetrize();
        assert!(state.asymmetry() < 1e-15);
        assert_eq!(state.sigma()[(1, 4)], -0.1);
    }
}
