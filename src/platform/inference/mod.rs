// Inference backend abstraction
// Runs exported DeepLabCut graphs; implemented natively with ONNX Runtime

use crate::core::model_resolver::ResolvedModel;
use crate::models::pose::{PoseError, PoseResult};
use ndarray::{Array2, Array3, Array4};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[cfg(feature = "ml-onnx")]
pub mod onnx;

/// The three ways a trained snapshot can be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Frozen,    // Frozen graph with pose extraction baked in
    GpuNative, // Pose extraction on the GPU, emits (y, x, p)
    Standard,  // Raw score maps, pose extraction on the CPU
}

impl BackendKind {
    /// Frozen wins over GPU-native, which wins over standard
    pub fn select(use_frozen: bool, gpu_inference: bool) -> Self {
        if use_frozen {
            BackendKind::Frozen
        } else if gpu_inference {
            BackendKind::GpuNative
        } else {
            BackendKind::Standard
        }
    }

    pub fn to_string(&self) -> &'static str {
        match self {
            BackendKind::Frozen => "frozen",
            BackendKind::GpuNative => "gpu_native",
            BackendKind::Standard => "standard",
        }
    }

    /// Exported graph for a snapshot (`init_weights` has no extension)
    pub fn model_path(&self, init_weights: &Path) -> PathBuf {
        let suffix = match self {
            BackendKind::Frozen => "-frozen.onnx",
            BackendKind::GpuNative => "-gpu.onnx",
            BackendKind::Standard => ".onnx",
        };
        let mut path = OsString::from(init_weights.as_os_str());
        path.push(suffix);
        PathBuf::from(path)
    }
}

/// Network output before pose extraction
#[derive(Debug, Clone)]
pub enum RawOutput {
    /// `(rows, 3)` pose tensor from graphs with built-in extraction
    Pose(Array2<f32>),
    /// Part score maps `(H, W, J)` and optional location refinement `(H, W, J, 2)`
    ScoreMaps {
        scmap: Array3<f32>,
        locref: Option<Array4<f32>>,
    },
}

/// Inference backend trait
/// Implemented by the ONNX Runtime sessions and by test doubles
pub trait InferenceBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Run the network on a `(1, H, W, 3)` RGB batch
    fn run(&mut self, input: Array4<f32>) -> PoseResult<RawOutput>;

    /// Get model info
    fn get_model_info(&self) -> String;
}

/// Initialize the backend a resolved model asks for
pub fn load_backend(model: &ResolvedModel) -> PoseResult<Box<dyn InferenceBackend>> {
    #[cfg(feature = "ml-onnx")]
    {
        let backend = onnx::OnnxBackend::load(model)?;
        tracing::info!("{}", backend.get_model_info());
        Ok(Box::new(backend))
    }

    #[cfg(not(feature = "ml-onnx"))]
    {
        Err(PoseError::NotSupported(format!(
            "Cannot load {} backend for {:?}: enable the 'ml-onnx' feature for native inference",
            model.backend.to_string(),
            model.init_weights
        )))
    }
}

/// Reshape a network output to `shape`, reporting mismatches as inference errors
pub(crate) fn reshape<D: ndarray::Dimension>(
    array: ndarray::ArrayD<f32>,
    shape: D,
) -> PoseResult<ndarray::Array<f32, D>> {
    let from = array.shape().to_vec();
    array.into_shape_with_order(shape).map_err(|e| {
        PoseError::InferenceFailed(format!("Unexpected output shape {:?}: {}", from, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_backend_selection() {
        assert_eq!(BackendKind::select(true, true), BackendKind::Frozen);
        assert_eq!(BackendKind::select(true, false), BackendKind::Frozen);
        assert_eq!(BackendKind::select(false, true), BackendKind::GpuNative);
        assert_eq!(BackendKind::select(false, false), BackendKind::Standard);
    }

    #[test]
    fn test_model_paths() {
        let init = Path::new("/p/train/snapshot-1000");
        assert_eq!(
            BackendKind::Frozen.model_path(init),
            PathBuf::from("/p/train/snapshot-1000-frozen.onnx")
        );
        assert_eq!(
            BackendKind::GpuNative.model_path(init),
            PathBuf::from("/p/train/snapshot-1000-gpu.onnx")
        );
        assert_eq!(
            BackendKind::Standard.model_path(init),
            PathBuf::from("/p/train/snapshot-1000.onnx")
        );
    }

    #[test]
    fn test_reshape() {
        let array = ArrayD::<f32>::zeros(IxDyn(&[1, 4, 5, 3]));
        let scmap = reshape(array.clone(), ndarray::Ix3(4, 5, 3)).unwrap();
        assert_eq!(scmap.shape(), &[4, 5, 3]);
        assert!(reshape(array, ndarray::Ix2(7, 3)).is_err());
    }

    #[cfg(not(feature = "ml-onnx"))]
    #[test]
    fn test_load_without_runtime_is_unsupported() {
        let root = crate::core::model_resolver::tests::create_test_project("unsupported", &[1000]);
        let model = ResolvedModel::resolve(
            root.join("config.yaml"),
            &crate::models::pose::LiveOptions::default(),
        )
        .unwrap();
        assert!(matches!(load_backend(&model), Err(PoseError::NotSupported(_))));
        let _ = std::fs::remove_dir_all(root);
    }
}
