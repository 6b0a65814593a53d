pub mod core;
pub mod models;
pub mod platform;

pub use crate::core::config::{PoseCfg, ProjectConfig, SnapshotIndex};
pub use crate::core::model_resolver::ResolvedModel;
pub use crate::core::pose_estimator::LivePoseEstimator;
pub use crate::core::pose_stream::Camera;
pub use crate::core::processor::{PoseRecorder, Processor};
pub use crate::models::frame::{CropWindow, Frame, PixelFormat};
pub use crate::models::pose::{DynamicCropping, Keypoint, LiveOptions, Pose, PoseError, PoseResult};
pub use crate::platform::inference::{BackendKind, InferenceBackend, RawOutput};
