// ONNX Runtime backend
// One session per estimator, created once from the exported snapshot graph

use super::{reshape, BackendKind, InferenceBackend, RawOutput};
use crate::core::model_resolver::ResolvedModel;
use crate::models::pose::{PoseError, PoseResult};
use ndarray::{Array4, Ix2, Ix3, Ix4};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;

pub struct OnnxBackend {
    session: Session,
    kind: BackendKind,
    model_path: PathBuf,
    input_name: String,
    output_names: Vec<String>,
    location_refinement: bool,
}

fn load_error(e: impl std::fmt::Display) -> PoseError {
    PoseError::ModelLoadFailed(e.to_string())
}

fn inference_error(e: impl std::fmt::Display) -> PoseError {
    PoseError::InferenceFailed(e.to_string())
}

impl OnnxBackend {
    pub fn load(model: &ResolvedModel) -> PoseResult<Self> {
        let kind = model.backend;
        let model_path = kind.model_path(&model.init_weights);
        if !model_path.is_file() {
            return Err(PoseError::ModelLoadFailed(format!(
                "Exported {} graph not found at {:?}",
                kind.to_string(),
                model_path
            )));
        }

        let mut builder = Session::builder()
            .map_err(load_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error)?;

        // GPU-native graphs always run on CUDA; the others only when a device is chosen
        if kind == BackendKind::GpuNative || model.gpu.is_some() {
            let mut cuda = CUDAExecutionProvider::default();
            if let Some(device) = model.gpu {
                cuda = cuda.with_device_id(device as i32);
            }
            builder = builder
                .with_execution_providers([cuda.build()])
                .map_err(load_error)?;
        }

        let session = builder.commit_from_file(&model_path).map_err(load_error)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| load_error("graph has no inputs"))?;
        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();
        if output_names.is_empty() {
            return Err(load_error("graph has no outputs"));
        }

        Ok(Self {
            session,
            kind,
            model_path,
            input_name,
            output_names,
            location_refinement: model.pose_cfg.location_refinement,
        })
    }
}

impl InferenceBackend for OnnxBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn run(&mut self, input: Array4<f32>) -> PoseResult<RawOutput> {
        let tensor = Tensor::from_array(input).map_err(inference_error)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(inference_error)?;

        let first = outputs[self.output_names[0].as_str()]
            .try_extract_array::<f32>()
            .map_err(inference_error)?
            .to_owned();

        match self.kind {
            BackendKind::Frozen | BackendKind::GpuNative => {
                if first.len() % 3 != 0 {
                    return Err(PoseError::InferenceFailed(format!(
                        "Pose output of shape {:?} is not a list of (x, y, p) rows",
                        first.shape()
                    )));
                }
                let rows = first.len() / 3;
                Ok(RawOutput::Pose(reshape(first, Ix2(rows, 3))?))
            }
            BackendKind::Standard => {
                let shape = first.shape().to_vec();
                let (height, width, joints) = match shape.as_slice() {
                    [1, h, w, j] | [h, w, j] => (*h, *w, *j),
                    _ => {
                        return Err(PoseError::InferenceFailed(format!(
                            "Unexpected score map shape {:?}",
                            shape
                        )))
                    }
                };
                let scmap = reshape(first, Ix3(height, width, joints))?;

                let locref = match self.output_names.get(1) {
                    Some(name) if self.location_refinement => {
                        let locref = outputs[name.as_str()]
                            .try_extract_array::<f32>()
                            .map_err(inference_error)?
                            .to_owned();
                        Some(reshape(locref, Ix4(height, width, joints, 2))?)
                    }
                    _ => None,
                };

                Ok(RawOutput::ScoreMaps { scmap, locref })
            }
        }
    }

    fn get_model_info(&self) -> String {
        format!(
            "ONNX Runtime {} backend ({:?}, input '{}', outputs {:?})",
            self.kind.to_string(),
            self.model_path,
            self.input_name,
            self.output_names
        )
    }
}
