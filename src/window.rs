//! Vehicle-frame view of the map
//!
//! Landmarks are re-expressed relative to the vehicle, `rel = R(−θ)(L − p)`,
//! and kept if they fall inside a forward rectangle. Output order follows the
//! landmark order.

use nalgebra::Rotation2;
use serde::{Deserialize, Serialize};

use crate::types::{Landmark, LandmarkMat, LandmarkVec, MapCone, Pose2D};

/// Forward/lateral extent of the local map (meters)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapWindow {
    pub forward_limit: f64,
    pub lateral_limit: f64,
}

impl Default for MapWindow {
    fn default() -> Self {
        Self {
            forward_limit: 10.0,
            lateral_limit: 10.0,
        }
    }
}

impl MapWindow {
    pub fn new(forward_limit: f64, lateral_limit: f64) -> Self {
        Self { forward_limit, lateral_limit }
    }

    /// Strict bounds on every side.
    pub fn contains(&self, relative: &LandmarkVec) -> bool {
        relative.x > 0.0
            && relative.x < self.forward_limit
            && relative.y > -self.lateral_limit
            && relative.y < self.lateral_limit
    }

    /// Project landmarks into the vehicle frame and keep those in the window.
    ///
    /// `covariances` is index-aligned with `landmarks`; each selected cone's
    /// 2×2 block is rotated alongside its position.
    pub fn select(
        &self,
        pose: &Pose2D,
        landmarks: &[Landmark],
        covariances: &[LandmarkMat],
    ) -> Vec<MapCone> {
        let to_vehicle = Rotation2::new(-pose.heading);
        let rotation = to_vehicle.matrix();
        let origin = LandmarkVec::new(pose.x, pose.y);

        landmarks
            .iter()
            .zip(covariances)
            .filter_map(|(lm, cov)| {
                let relative = to_vehicle * (lm.position() - origin);
                if !self.contains(&relative) {
                    return None;
                }
                let local_cov = rotation * cov * rotation.transpose();
                Some(MapCone {
                    x: relative.x,
                    y: relative.y,
                    color: lm.color,
                    covariance: flatten(&local_cov),
                })
            })
            .collect()
    }
}

/// Row-major flattening of a 2×2 block.
pub fn flatten(m: &LandmarkMat) -> [f64; 4] {
    [m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConeColor;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn lm(x: f64, y: f64) -> Landmark {
        Landmark { x, y, color: ConeColor::Yellow, observation_count: 1 }
    }

    #[test]
    fn test_window_selection() {
        let window = MapWindow::default();
        let landmarks = [lm(5.0, 3.0), lm(-1.0, 0.0), lm(5.0, 12.0)];
        let covs = [LandmarkMat::identity(); 3];

        let local = window.select(&Pose2D::new(0.0, 0.0, 0.0), &landmarks, &covs);
        assert_eq!(local.len(), 1);
        assert_relative_eq!(local[0].x, 5.0);
        assert_relative_eq!(local[0].y, 3.0);
        assert_eq!(local[0].color, ConeColor::Yellow);
    }

    #[test]
    fn test_window_bounds_are_strict() {
        let window = MapWindow::default();
        assert!(!window.contains(&LandmarkVec::new(0.0, 0.0)));
        assert!(!window.contains(&LandmarkVec::new(10.0, 0.0)));
        assert!(!window.contains(&LandmarkVec::new(5.0, 10.0)));
        assert!(!window.contains(&LandmarkVec::new(5.0, -10.0)));
        assert!(window.contains(&LandmarkVec::new(9.99, -9.99)));
    }

    #[test]
    fn test_rotated_vehicle_frame() {
        let window = MapWindow::default();
        // Facing +y: a cone straight ahead at (2, 6) is 4 m in front
        let pose = Pose2D::new(2.0, 2.0, FRAC_PI_2);
        let landmarks = [lm(2.0, 6.0), lm(2.0, -1.0), lm(0.0, 4.0)];
        let covs = [LandmarkMat::identity(); 3];

        let local = window.select(&pose, &landmarks, &covs);
        assert_eq!(local.len(), 2);
        assert_relative_eq!(local[0].x, 4.0, epsilon = 1e-12);
        assert_relative_eq!(local[0].y, 0.0, epsilon = 1e-12);
        // (0, 4) is ahead-left
        assert_relative_eq!(local[1].x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(local[1].y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_covariance_rotates_into_vehicle_frame() {
        let window = MapWindow::default();
        let pose = Pose2D::new(0.0, 0.0, FRAC_PI_2);
        #[rustfmt::skip]
        let cov = LandmarkMat::new(
            4.0, 0.0,
            0.0, 1.0,
        );
        let local = window.select(&pose, &[lm(0.0, 5.0)], &[cov]);
        assert_eq!(local.len(), 1);
        // map-x uncertainty becomes vehicle-lateral uncertainty
        assert_relative_eq!(local[0].covariance[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(local[0].covariance[3], 4.0, epsilon = 1e-12);
        assert_relative_eq!(local[0].covariance[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_order_preserved() {
        let window = MapWindow::default();
        let landmarks = [lm(7.0, 1.0), lm(3.0, -1.0), lm(5.0, 0.0)];
        let covs = [LandmarkMat::identity(); 3];
        let local = window.select(&Pose2D::default(), &landmarks, &covs);
        let xs: Vec<f64> = local.iter().map(|c| c.x).collect();
        assert_eq!(xs, vec![7.0, 3.0, 5.0]);
    }
}
