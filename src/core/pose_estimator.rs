use crate::core::config::PoseCfg;
use crate::core::cropping::DynamicCropper;
use crate::core::model_resolver::ResolvedModel;
use crate::core::pose_stream::{self, Camera, StreamState};
use crate::core::predict;
use crate::core::preprocess;
use crate::core::processor::Processor;
use crate::models::frame::{CropWindow, Frame};
use crate::models::pose::{LiveOptions, Pose, PoseError, PoseResult};
use crate::platform::inference::{self, InferenceBackend};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

// ==============================================================================
// Inference Engine
// ==============================================================================

/// Per-frame state shared between direct calls and the pose stream
struct Engine {
    backend: Box<dyn InferenceBackend>,
    pose_cfg: PoseCfg,
    static_crop: Option<CropWindow>,
    cropper: DynamicCropper,
    processor: Option<Box<dyn Processor>>,
}

impl Engine {
    fn estimate(&mut self, frame: &Frame) -> PoseResult<Pose> {
        let start_time = Instant::now();

        // Dynamic cropping replaces the static crop; no window means full frame
        let crop = if self.cropper.is_enabled() {
            self.cropper.window()
        } else {
            self.static_crop
        };

        let input = preprocess::prepare(frame, crop)?;
        let raw = self.backend.run(input.tensor)?;
        let mut pose = predict::decode(raw, self.backend.kind(), &self.pose_cfg)?;
        pose.timestamp = frame.timestamp;

        if self.cropper.is_enabled() {
            if let Some(window) = input.window {
                pose.translate(window.x1 as f32, window.y1 as f32);
            }
            self.cropper.update(&pose, frame.width, frame.height);
        }

        if let Some(processor) = self.processor.as_mut() {
            pose = processor.process(pose);
        }

        pose.processing_time_ms = start_time.elapsed().as_millis() as u64;
        Ok(pose)
    }
}

fn lock_engine(engine: &Mutex<Engine>) -> PoseResult<MutexGuard<'_, Engine>> {
    engine.lock().map_err(|_| {
        PoseError::InferenceFailed("Estimator state poisoned by an earlier panic".to_string())
    })
}

// ==============================================================================
// Live Pose Estimator
// ==============================================================================

/// Loads a trained model once and estimates poses on individual frames
pub struct LivePoseEstimator {
    model: ResolvedModel,
    engine: Arc<Mutex<Engine>>,
    camera: Option<Arc<dyn Camera>>,
    poll_interval: Duration,
    stream: Mutex<Option<StreamState>>,
}

impl LivePoseEstimator {
    /// Resolve the model for `config_path` and initialize its inference backend
    pub fn new(config_path: impl AsRef<Path>, options: LiveOptions) -> PoseResult<Self> {
        let model = ResolvedModel::resolve(config_path, &options)?;
        let backend = inference::load_backend(&model)?;

        Ok(Self::with_backend(model, backend).with_poll_interval(options.stream_poll_interval))
    }

    /// Use an already initialized backend for a resolved model
    pub fn with_backend(model: ResolvedModel, backend: Box<dyn InferenceBackend>) -> Self {
        if backend.kind() != model.backend {
            tracing::warn!(
                "Backend runs a {} graph but the model resolved to {}",
                backend.kind().to_string(),
                model.backend.to_string()
            );
        }

        let engine = Engine {
            backend,
            pose_cfg: model.pose_cfg.clone(),
            static_crop: model.project.active_crop(),
            cropper: DynamicCropper::new(model.dynamic),
            processor: None,
        };

        Self {
            model,
            engine: Arc::new(Mutex::new(engine)),
            camera: None,
            poll_interval: LiveOptions::default().stream_poll_interval,
            stream: Mutex::new(None),
        }
    }

    pub fn with_processor(self, processor: Box<dyn Processor>) -> Self {
        if let Ok(mut engine) = self.engine.lock() {
            engine.processor = Some(processor);
        }
        self
    }

    pub fn with_camera(mut self, camera: Arc<dyn Camera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn model(&self) -> &ResolvedModel {
        &self.model
    }

    pub fn scorer(&self) -> &str {
        &self.model.scorer
    }

    pub fn bodyparts(&self) -> &[String] {
        &self.model.pose_cfg.all_joints_names
    }

    /// Estimate the pose in `frame`, or in the camera's latest frame when `None`
    pub fn get_pose(&self, frame: Option<&Frame>) -> PoseResult<Pose> {
        let camera_frame;
        let frame = match frame {
            Some(frame) => frame,
            None => {
                camera_frame = self
                    .camera
                    .as_ref()
                    .and_then(|camera| camera.frame())
                    .ok_or(PoseError::NoFrame)?;
                &camera_frame
            }
        };

        lock_engine(&self.engine)?.estimate(frame)
    }

    /// Forget the tracked dynamic crop window
    pub fn reset_cropping(&self) -> PoseResult<()> {
        lock_engine(&self.engine)?.cropper.reset();
        Ok(())
    }

    /// Let the processor persist what it collected
    pub fn save_processor(&self, path: impl AsRef<Path>) -> PoseResult<()> {
        let engine = lock_engine(&self.engine)?;
        match engine.processor.as_ref() {
            Some(processor) => processor.save(path.as_ref()),
            None => {
                tracing::debug!("No processor to save");
                Ok(())
            }
        }
    }

    /// Start estimating poses on every new camera frame in the background.
    /// Must be called from within a tokio runtime.
    pub fn start_pose_stream(&self) -> PoseResult<mpsc::Receiver<Pose>> {
        let camera = self.camera.clone().ok_or(PoseError::NoCamera)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            PoseError::NotSupported(format!("Pose stream requires a tokio runtime: {}", e))
        })?;

        let mut stream = self
            .stream
            .lock()
            .map_err(|_| PoseError::InferenceFailed("Stream state poisoned".to_string()))?;
        if stream.as_ref().map_or(false, StreamState::is_running) {
            return Err(PoseError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel::<Pose>(100);
        let running = Arc::new(AtomicBool::new(true));

        let engine = self.engine.clone();
        let worker_running = running.clone();
        let poll_interval = self.poll_interval;
        let task = runtime.spawn_blocking(move || {
            pose_stream::run_pose_loop(
                camera.as_ref(),
                &worker_running,
                &tx,
                poll_interval,
                |frame| lock_engine(&engine)?.estimate(frame),
            );
        });

        *stream = Some(StreamState { running, task });
        tracing::info!("Started pose stream for {}", self.model.scorer);
        Ok(rx)
    }

    /// Stop the pose stream and wait for the worker to finish
    pub async fn stop_pose_stream(&self) -> PoseResult<()> {
        let state = self
            .stream
            .lock()
            .map_err(|_| PoseError::InferenceFailed("Stream state poisoned".to_string()))?
            .take();

        let Some(state) = state else {
            return Ok(());
        };

        state.running.store(false, Ordering::SeqCst);
        state
            .task
            .await
            .map_err(|e| PoseError::InferenceFailed(format!("Pose stream worker failed: {}", e)))?;

        tracing::info!("Stopped pose stream");
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
            .lock()
            .map(|stream| stream.as_ref().map_or(false, StreamState::is_running))
            .unwrap_or(false)
    }
}

impl Drop for LivePoseEstimator {
    fn drop(&mut self) {
        if let Ok(mut stream) = self.stream.lock() {
            if let Some(state) = stream.take() {
                state.running.store(false, Ordering::SeqCst);
            }
        }
    }
}
