//! Pose normalization: raw localization output to a planar pose relative to a
//! fixed origin.

use std::f64::consts::{PI, TAU};

use nalgebra::{Quaternion, UnitQuaternion};

use crate::error::{SlamError, SlamResult};
use crate::types::{Pose2D, PoseMat, PoseStamped, RAW_PLANAR_INDICES, RAW_POSE_DIM};

/// Wrap an angle into (−π, π].
pub fn wrap_to_pi(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Yaw of a (w, x, y, z) quaternion, Z angle of the roll-pitch-yaw
/// decomposition. A zero quaternion yields 0.
pub fn yaw_from_quaternion(q: (f64, f64, f64, f64)) -> f64 {
    let raw = Quaternion::new(q.0, q.1, q.2, q.3);
    if raw.norm() < 1e-12 {
        return 0.0;
    }
    let (_roll, _pitch, yaw) = UnitQuaternion::from_quaternion(raw).euler_angles();
    yaw
}

/// Extract the (x, y, yaw) block of a row-major 6×6 covariance.
pub fn planar_covariance(raw: &[f64]) -> SlamResult<PoseMat> {
    if raw.len() != RAW_POSE_DIM * RAW_POSE_DIM {
        return Err(SlamError::InvalidPose(format!(
            "covariance has {} entries, expected {}",
            raw.len(),
            RAW_POSE_DIM * RAW_POSE_DIM
        )));
    }
    Ok(PoseMat::from_fn(|r, c| {
        raw[RAW_PLANAR_INDICES[r] * RAW_POSE_DIM + RAW_PLANAR_INDICES[c]]
    }))
}

/// Converts raw poses into the estimator's planar map frame.
///
/// The origin is captured from the first pose passed to [`PoseTransform::apply`]
/// unless capture is disabled, in which case the identity origin is used.
#[derive(Clone, Debug)]
pub struct PoseTransform {
    origin: Option<Pose2D>,
    capture_origin: bool,
}

impl PoseTransform {
    pub fn new(capture_origin: bool) -> Self {
        Self { origin: None, capture_origin }
    }

    pub fn origin(&self) -> Option<Pose2D> {
        self.origin
    }

    pub fn is_origin_set(&self) -> bool {
        self.origin.is_some()
    }

    /// Normalize a raw pose. Returns the relative planar pose and its
    /// 3×3 covariance.
    pub fn apply(&mut self, pose: &PoseStamped) -> SlamResult<(Pose2D, PoseMat)> {
        let (x, y, _z) = pose.position;
        let yaw = yaw_from_quaternion(pose.orientation);
        let absolute = Pose2D::new(x, y, yaw);
        if !absolute.is_finite() {
            return Err(SlamError::InvalidPose(format!(
                "non-finite pose at t={:.3}: ({}, {}, {})",
                pose.timestamp, x, y, yaw
            )));
        }

        let covariance = planar_covariance(&pose.covariance)?;
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(SlamError::InvalidPose(format!(
                "non-finite covariance at t={:.3}",
                pose.timestamp
            )));
        }

        let origin = match self.origin {
            Some(origin) => origin,
            None => {
                let origin = if self.capture_origin { absolute } else { Pose2D::default() };
                log::info!(
                    "Pose origin set to ({:.3}, {:.3}, {:.3})",
                    origin.x,
                    origin.y,
                    origin.heading
                );
                self.origin = Some(origin);
                origin
            }
        };

        let relative = Pose2D::new(
            absolute.x - origin.x,
            absolute.y - origin.y,
            wrap_to_pi(absolute.heading - origin.heading),
        );
        Ok((relative, covariance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_wrap_range() {
        assert_relative_eq!(wrap_to_pi(0.0), 0.0);
        assert_relative_eq!(wrap_to_pi(3.0 * PI / 2.0), -FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(-3.0 * PI / 2.0), FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(4.0 * TAU + 0.25), 0.25, epsilon = 1e-9);
        for i in -200..200 {
            let a = i as f64 * 0.173;
            let w = wrap_to_pi(a);
            assert!(w > -PI && w <= PI, "wrap({}) = {}", a, w);
        }
    }

    #[test]
    fn test_wrap_boundary_maps_to_positive_pi() {
        assert_relative_eq!(wrap_to_pi(PI), PI);
        assert_relative_eq!(wrap_to_pi(-PI), PI);
    }

    #[test]
    fn test_yaw_from_quaternion() {
        let yaw = 0.7_f64;
        let q = ((yaw / 2.0).cos(), 0.0, 0.0, (yaw / 2.0).sin());
        assert_relative_eq!(yaw_from_quaternion(q), yaw, epsilon = 1e-12);
        assert_relative_eq!(yaw_from_quaternion((0.0, 0.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_planar_covariance_picks_x_y_yaw() {
        let raw: Vec<f64> = (0..36).map(|i| i as f64).collect();
        let cov = planar_covariance(&raw).unwrap();
        assert_eq!(cov[(0, 0)], 0.0);
        assert_eq!(cov[(0, 1)], 1.0);
        assert_eq!(cov[(0, 2)], 5.0);
        assert_eq!(cov[(1, 2)], 11.0);
        assert_eq!(cov[(2, 0)], 30.0);
        assert_eq!(cov[(2, 2)], 35.0);
        assert!(planar_covariance(&raw[..35]).is_err());
    }

    #[test]
    fn test_origin_captured_from_first_pose() {
        let mut transform = PoseTransform::new(true);
        let first = PoseStamped::planar(0.0, 10.0, 5.0, 1.0, (0.1, 0.2, 0.3));
        let (pose, cov) = transform.apply(&first).unwrap();
        assert_relative_eq!(pose.x, 0.0);
        assert_relative_eq!(pose.y, 0.0);
        assert_relative_eq!(pose.heading, 0.0, epsilon = 1e-12);
        assert_relative_eq!(cov[(2, 2)], 0.3);

        let second = PoseStamped::planar(0.1, 12.0, 4.0, 1.0 + PI, (0.1, 0.2, 0.3));
        let (pose, _) = transform.apply(&second).unwrap();
        assert_relative_eq!(pose.x, 2.0);
        assert_relative_eq!(pose.y, -1.0);
        assert_relative_eq!(pose.heading.abs(), PI, epsilon = 1e-9);
    }

    #[test]
    fn test_identity_origin_when_capture_disabled() {
        let mut transform = PoseTransform::new(false);
        let first = PoseStamped::planar(0.0, 10.0, 5.0, 0.5, (0.1, 0.1, 0.1));
        let (pose, _) = transform.apply(&first).unwrap();
        assert_relative_eq!(pose.x, 10.0);
        assert_relative_eq!(pose.heading, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_pose_rejected() {
        let mut transform = PoseTransform::new(true);
        let bad = PoseStamped::planar(0.0, f64::NAN, 0.0, 0.0, (0.1, 0.1, 0.1));
        assert!(matches!(transform.apply(&bad), Err(SlamError::InvalidPose(_))));
        assert!(!transform.is_origin_set());
    }
}
