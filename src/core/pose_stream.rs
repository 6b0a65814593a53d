// Camera-driven pose stream
// Polls a camera on a blocking worker and forwards every estimated pose

use crate::models::frame::Frame;
use crate::models::pose::{Pose, PoseResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Frame source driving the pose stream
pub trait Camera: Send + Sync {
    /// Latest frame, if the camera has produced one
    fn frame(&self) -> Option<Frame>;

    /// Whether a frame arrived that has not been handed out by `frame` yet
    fn new_frame(&self) -> bool;
}

/// A running stream: its stop flag and the worker task
pub(crate) struct StreamState {
    pub running: Arc<AtomicBool>,
    pub task: JoinHandle<()>,
}

impl StreamState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

/// Estimate poses on new camera frames until `running` is cleared or the
/// receiver goes away. Failed frames are logged and skipped.
pub(crate) fn run_pose_loop<F>(
    camera: &dyn Camera,
    running: &AtomicBool,
    tx: &mpsc::Sender<Pose>,
    poll_interval: Duration,
    mut estimate: F,
) where
    F: FnMut(&Frame) -> PoseResult<Pose>,
{
    while running.load(Ordering::SeqCst) {
        let frame = match camera.new_frame().then(|| camera.frame()).flatten() {
            Some(frame) => frame,
            None => {
                std::thread::sleep(poll_interval);
                continue;
            }
        };

        match estimate(&frame) {
            Ok(pose) => {
                if tx.blocking_send(pose).is_err() {
                    tracing::debug!("Pose receiver dropped, stopping stream");
                    break;
                }
            }
            Err(e) => tracing::error!("Error estimating pose: {}", e),
        }
    }

    running.store(false, Ordering::SeqCst);
}
