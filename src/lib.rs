// Track SLAM library
// EKF-SLAM over an externally localized vehicle and a cone-marked track

pub mod error;
pub mod filters;
pub mod live_status;
pub mod session;
pub mod slam;
pub mod spatial;
pub mod sync;
pub mod transform;
pub mod types;
pub mod window;
pub mod worker;

pub use error::{SlamError, SlamResult};
pub use filters::{AssociationPolicy, EkfSlam};
pub use session::{Session, SessionMessage};
pub use slam::{CycleOutput, SlamConfig, SlamEvent, TrackSlam};
pub use types::{ConeColor, Detection, DetectionBatch, DetectionSource, Pose2D, PoseStamped, TrackMap};
pub use worker::{SlamHandle, SlamInput, SlamPipeline, SlamWorker, WorkerOptions};
