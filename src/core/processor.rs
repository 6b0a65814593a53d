// Pose processors
// User plugins that post-process poses or react to them (e.g. trigger hardware)

use crate::models::pose::{Pose, PoseResult};
use std::path::Path;

/// A processor receives every estimated pose and may replace it
pub trait Processor: Send {
    /// Process a pose and return the (possibly modified) pose
    fn process(&mut self, pose: Pose) -> Pose;

    /// Persist whatever the processor collected
    fn save(&self, path: &Path) -> PoseResult<()>;
}

/// Keeps every pose it sees and writes them out as JSON
#[derive(Debug, Default)]
pub struct PoseRecorder {
    poses: Vec<Pose>,
}

impl PoseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn clear(&mut self) {
        self.poses.clear();
    }
}

impl Processor for PoseRecorder {
    fn process(&mut self, pose: Pose) -> Pose {
        self.poses.push(pose.clone());
        pose
    }

    fn save(&self, path: &Path) -> PoseResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&self.poses).map_err(std::io::Error::from)?;
        std::fs::write(path, contents)?;

        tracing::info!("Saved {} poses to {}", self.poses.len(), path.display());
        Ok(())
    }
}
