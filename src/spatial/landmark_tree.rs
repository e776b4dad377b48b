use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::types::Landmark;

/// Landmark position tagged with its index in the joint state
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexedLandmark {
    pub position: [f64; 2],
    pub index: usize,
}

impl RTreeObject for IndexedLandmark {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedLandmark {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

/// R-Tree spatial index for radius-based data association
///
/// # Architecture
/// - Bulk-loaded from the current landmark list at the start of every cycle
/// - Landmarks created mid-cycle are inserted so later detections in the same
///   batch can associate with them
/// - Positions moved by updates inside the cycle are picked up on the next rebuild
pub struct LandmarkTree {
    tree: RTree<IndexedLandmark>,
    landmark_count: usize,
}

impl LandmarkTree {
    /// Create empty R-Tree
    pub fn new() -> Self {
        LandmarkTree {
            tree: RTree::new(),
            landmark_count: 0,
        }
    }

    /// Build R-Tree from the landmark list; indices follow list order
    pub fn from_landmarks(landmarks: &[Landmark]) -> Self {
        let entries: Vec<IndexedLandmark> = landmarks
            .iter()
            .enumerate()
            .map(|(index, lm)| IndexedLandmark {
                position: [lm.x, lm.y],
                index,
            })
            .collect();

        let landmark_count = entries.len();

        LandmarkTree {
            tree: RTree::bulk_load(entries),
            landmark_count,
        }
    }

    /// Add single landmark to tree
    pub fn insert(&mut self, position: [f64; 2], index: usize) {
        self.tree.insert(IndexedLandmark { position, index });
        self.landmark_count += 1;
    }

    /// All landmarks within `radius` of `point` (inclusive), in tree order
    pub fn within_radius(&self, point: [f64; 2], radius: f64) -> Vec<IndexedLandmark> {
        self.tree
            .locate_within_distance(point, radius * radius)
            .copied()
            .collect()
    }

    /// Total landmarks in tree
    pub fn landmark_count(&self) -> usize {
        self.landmark_count
    }

    pub fn is_empty(&self) -> bool {
        self.landmark_count == 0
    }
}

impl Default for LandmarkTree {
    fn default() -> Self {
        Self::new()
    }
}
