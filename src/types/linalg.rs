//! Linear algebra type system for the track estimator
//!
//! Fixed-size aliases for the pose and per-landmark blocks, and dynamic
//! aliases for the joint state that grows and shrinks with the map.

use nalgebra::{DMatrix, DVector, SMatrix, SVector};

// ===== Block Dimensions =====
pub const POSE_DIM: usize = 3; // (x, y, heading)
pub const LANDMARK_DIM: usize = 2; // (x, y)
pub const MEASURE_DIM: usize = 2; // (range, bearing)
pub const RAW_POSE_DIM: usize = 6; // (x, y, z, roll, pitch, yaw)

/// Rows/cols of the raw 6×6 pose covariance that survive planarization.
pub const RAW_PLANAR_INDICES: [usize; POSE_DIM] = [0, 1, 5];

// ===== Pose Block Types =====
pub type PoseVec = SVector<f64, POSE_DIM>;
pub type PoseMat = SMatrix<f64, POSE_DIM, POSE_DIM>;

// ===== Landmark / Measurement Types =====
pub type LandmarkVec = SVector<f64, LANDMARK_DIM>;
pub type LandmarkMat = SMatrix<f64, LANDMARK_DIM, LANDMARK_DIM>;
pub type MeasureVec = SVector<f64, MEASURE_DIM>;
pub type MeasureNoise = SMatrix<f64, MEASURE_DIM, MEASURE_DIM>;

// Jacobian of (range, bearing) w.r.t. the five touched state entries:
// (px, py, θ, lx, ly)
pub const SPARSE_COLS: usize = POSE_DIM + LANDMARK_DIM;
pub type SparseJacobian = SMatrix<f64, MEASURE_DIM, SPARSE_COLS>;

// ===== Joint State Types =====
pub type JointVec = DVector<f64>;
pub type JointMat = DMatrix<f64>;

/// Offset of landmark `index` inside the joint mean vector.
#[inline]
pub fn landmark_offset(index: usize) -> usize {
    POSE_DIM + LANDMARK_DIM * index
}
