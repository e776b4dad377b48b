pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Cone color class as reported by perception.
///
/// Lidar detections carry no color and arrive as `Unknown`. Wire codes follow
/// the driverless cone message definition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ConeColor {
    Blue,
    Yellow,
    OrangeSmall,
    OrangeBig,
    #[default]
    Unknown,
}

impl ConeColor {
    pub fn code(self) -> u8 {
        match self {
            ConeColor::Blue => 0,
            ConeColor::Yellow => 1,
            ConeColor::OrangeSmall => 2,
            ConeColor::OrangeBig => 3,
            ConeColor::Unknown => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ConeColor::Blue),
            1 => Some(ConeColor::Yellow),
            2 => Some(ConeColor::OrangeSmall),
            3 => Some(ConeColor::OrangeBig),
            4 => Some(ConeColor::Unknown),
            _ => None,
        }
    }

    pub fn is_known(self) -> bool {
        self != ConeColor::Unknown
    }
}

impl From<ConeColor> for u8 {
    fn from(color: ConeColor) -> Self {
        color.code()
    }
}

impl TryFrom<u8> for ConeColor {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        ConeColor::from_code(code).ok_or_else(|| format!("invalid cone color code {}", code))
    }
}

/// Planar vehicle pose in the map frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    /// Heading in radians, (−π, π]
    pub heading: f64,
}

impl Pose2D {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    pub fn to_vec(self) -> PoseVec {
        PoseVec::new(self.x, self.y, self.heading)
    }

    pub fn from_vec(v: &PoseVec) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.heading.is_finite()
    }
}

/// A tracked map feature. Index-aligned with the joint state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub color: ConeColor,
    pub observation_count: u32,
}

impl Landmark {
    pub fn position(&self) -> LandmarkVec {
        LandmarkVec::new(self.x, self.y)
    }
}

/// Single range/bearing cone detection relative to the vehicle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub range: f64,
    /// Relative to current heading, interpreted mod 2π
    pub bearing: f64,
    #[serde(default)]
    pub color: ConeColor,
    /// Perception-side covariance. Carried through but not used by the filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covariance: Option<[f64; 4]>,
}

impl Detection {
    pub fn new(range: f64, bearing: f64, color: ConeColor) -> Self {
        Self { range, bearing, color, covariance: None }
    }

    pub fn is_valid(&self) -> bool {
        self.range.is_finite() && self.bearing.is_finite() && self.range >= 0.0
    }
}

/// Timestamped batch of detections from one sensor pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub timestamp: f64,
    pub detections: Vec<Detection>,
}

/// Which perception pipeline produced a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Vision,
    Lidar,
}

/// Localization output: 3D pose, attitude quaternion and 6×6 covariance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    pub timestamp: f64,
    pub position: (f64, f64, f64),
    /// Quaternion (w, x, y, z)
    pub orientation: (f64, f64, f64, f64),
    /// Row-major over (x, y, z, roll, pitch, yaw)
    pub covariance: Vec<f64>,
}

impl PoseStamped {
    /// Planar pose with identity attitude and the given diagonal variances.
    pub fn planar(timestamp: f64, x: f64, y: f64, yaw: f64, variances: (f64, f64, f64)) -> Self {
        let half = yaw * 0.5;
        let mut covariance = vec![0.0; RAW_POSE_DIM * RAW_POSE_DIM];
        covariance[0] = variances.0;
        covariance[RAW_POSE_DIM + 1] = variances.1;
        covariance[RAW_POSE_DIM * RAW_POSE_DIM - 1] = variances.2;
        Self {
            timestamp,
            position: (x, y, 0.0),
            orientation: (half.cos(), 0.0, 0.0, half.sin()),
            covariance,
        }
    }
}

/// One cone of an emitted map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapCone {
    pub x: f64,
    pub y: f64,
    pub color: ConeColor,
    /// Row-major 2×2 position covariance
    pub covariance: [f64; 4],
}

/// Emitted map message (global or vehicle-local).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMap {
    pub stamp: f64,
    pub frame: String,
    pub cones: Vec<MapCone>,
}

pub const MAP_FRAME: &str = "map";
pub const VEHICLE_FRAME: &str = "base_link";
