// Data models for live pose estimation results, estimator options and errors

use crate::models::frame::CropWindow;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ==============================================================================
// Pose (Unified Result)
// ==============================================================================

/// A single estimated body part location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,          // Pixel column in the analyzed image
    pub y: f32,          // Pixel row in the analyzed image
    pub likelihood: f32, // Score-map confidence [0, 1]
}

impl Keypoint {
    pub fn new(x: f32, y: f32, likelihood: f32) -> Self {
        Self { x, y, likelihood }
    }

    pub fn is_visible(&self, threshold: f32) -> bool {
        self.likelihood > threshold
    }
}

/// Estimated pose for one frame.
///
/// Keypoints are stored joint-major: the `num_outputs` candidate instances of
/// joint 0 come first (best first), then those of joint 1, and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
    pub num_outputs: usize,
    pub timestamp: i64,
    pub processing_time_ms: u64,
}

impl Pose {
    pub fn new(keypoints: Vec<Keypoint>, num_outputs: usize) -> Self {
        Self {
            keypoints,
            num_outputs: num_outputs.max(1),
            timestamp: chrono::Utc::now().timestamp_millis(),
            processing_time_ms: 0,
        }
    }

    /// Build a pose from an `(rows, 3)` array of `x, y, likelihood` rows
    pub fn from_array(array: ArrayView2<'_, f32>, num_outputs: usize) -> PoseResult<Self> {
        if array.ncols() != 3 {
            return Err(PoseError::InferenceFailed(format!(
                "Pose tensor must have 3 columns, got shape {:?}",
                array.shape()
            )));
        }

        let keypoints = array
            .rows()
            .into_iter()
            .map(|row| Keypoint::new(row[0], row[1], row[2]))
            .collect();

        Ok(Self::new(keypoints, num_outputs))
    }

    /// Pose as an `(rows, 3)` array
    pub fn to_array(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.keypoints.len(), 3), |(row, col)| {
            let kp = &self.keypoints[row];
            match col {
                0 => kp.x,
                1 => kp.y,
                _ => kp.likelihood,
            }
        })
    }

    pub fn num_joints(&self) -> usize {
        self.keypoints.len() / self.num_outputs
    }

    /// All candidate instances of one joint, best first
    pub fn joint(&self, index: usize) -> &[Keypoint] {
        let start = (index * self.num_outputs).min(self.keypoints.len());
        let end = (start + self.num_outputs).min(self.keypoints.len());
        &self.keypoints[start..end]
    }

    /// Keypoints whose likelihood exceeds `threshold`
    pub fn detected(&self, threshold: f32) -> impl Iterator<Item = &Keypoint> {
        self.keypoints.iter().filter(move |kp| kp.is_visible(threshold))
    }

    /// Exchange the first two columns (row/column ordered graphs emit `y, x`)
    pub fn swap_xy(&mut self) {
        for kp in &mut self.keypoints {
            std::mem::swap(&mut kp.x, &mut kp.y);
        }
    }

    /// Shift every keypoint by a fixed offset
    pub fn translate(&mut self, dx: f32, dy: f32) {
        for kp in &mut self.keypoints {
            kp.x += dx;
            kp.y += dy;
        }
    }
}

// ==============================================================================
// Estimator Options
// ==============================================================================

/// Dynamic cropping parameters: `(state, detection threshold, margin)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicCropping {
    pub enabled: bool,
    pub threshold: f32, // Any body part above this counts as a detection
    pub margin: u32,    // Pixels added around the detected parts
}

impl Default for DynamicCropping {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.5,
            margin: 10,
        }
    }
}

/// Options accepted by [`crate::LivePoseEstimator::new`]
#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub cropping: Option<CropWindow>,
    pub iteration: Option<u32>,
    pub shuffle: u32,
    pub training_set_index: usize,
    pub gpu: Option<u32>,
    pub use_frozen: bool,
    pub gpu_inference: bool,
    pub dynamic: DynamicCropping,
    pub stream_poll_interval: Duration,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            cropping: None,
            iteration: None,
            shuffle: 1,
            training_set_index: 0,
            gpu: None,
            use_frozen: true,
            gpu_inference: false,
            dynamic: DynamicCropping::default(),
            stream_poll_interval: Duration::from_millis(1),
        }
    }
}

impl LiveOptions {
    pub fn validate(&self) -> PoseResult<()> {
        if self.shuffle == 0 {
            return Err(PoseError::InvalidConfig(
                "Shuffle index must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.dynamic.threshold) {
            return Err(PoseError::InvalidConfig(format!(
                "Invalid dynamic cropping threshold: {}. Must be between 0.0 and 1.0",
                self.dynamic.threshold
            )));
        }

        if let Some(window) = &self.cropping {
            window.validate()?;
        }

        Ok(())
    }
}

// ==============================================================================
// Error Types
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("It seems the model for shuffle {shuffle} and trainFraction {train_fraction} does not exist.")]
    ModelNotFound { shuffle: u32, train_fraction: f64 },

    #[error("Snapshots not found! It seems the dataset for shuffle {shuffle} has not been trained/does not exist. Please train it before using it for live inference.")]
    SnapshotsNotFound { shuffle: u32 },

    #[error("No frame provided for live pose estimation")]
    NoFrame,

    #[error("Estimator does not have a camera. Cannot start pose stream without a camera.")]
    NoCamera,

    #[error("Pose stream already running")]
    AlreadyRunning,

    #[error("Model loading failed: {0}")]
    ModelLoadFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

pub type PoseResult<T> = Result<T, PoseError>;
