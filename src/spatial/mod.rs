pub mod landmark_tree;

pub use landmark_tree::{IndexedLandmark, LandmarkTree};
