pub mod ekf_slam;
pub mod joint_state;

pub use ekf_slam::{AssociationPolicy, DetectionOutcome, EkfSlam, EkfSlamConfig, SkipReason};
pub use joint_state::JointState;
