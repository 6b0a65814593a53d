// Trained model resolution
// Locates the model folder, snapshot and hyperparameters for a project config

use crate::core::config::{PoseCfg, ProjectConfig};
use crate::models::pose::{DynamicCropping, LiveOptions, PoseError, PoseResult};
use crate::platform::inference::BackendKind;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything needed to initialize an inference backend
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub project: ProjectConfig,
    pub pose_cfg: PoseCfg,
    pub model_folder: PathBuf,
    pub snapshot: String,
    pub init_weights: PathBuf,
    pub training_iterations: String,
    pub train_fraction: f64,
    pub scorer: String,
    pub scorer_legacy: String,
    pub backend: BackendKind,
    pub dynamic: DynamicCropping,
    pub gpu: Option<u32>,
}

impl ResolvedModel {
    /// Resolve the trained model described by `config_path` and `options`
    pub fn resolve(config_path: impl AsRef<Path>, options: &LiveOptions) -> PoseResult<Self> {
        let config_path = config_path.as_ref();
        options.validate()?;

        let mut project = ProjectConfig::load(config_path)?;
        if let Some(iteration) = options.iteration {
            project.iteration = iteration;
        }
        let train_fraction = project.train_fraction(options.training_set_index)?;

        if let Some(window) = options.cropping {
            project.set_cropping(window);
            tracing::info!(?window, "Overwriting cropping parameters");
        }
        project.validate()?;

        let project_path = project.project_path.clone().unwrap_or_default();
        let model_folder =
            project_path.join(model_folder(&project, train_fraction, options.shuffle));

        let path_test_config = model_folder.join("test").join("pose_cfg.yaml");
        if !path_test_config.is_file() {
            return Err(PoseError::ModelNotFound {
                shuffle: options.shuffle,
                train_fraction,
            });
        }
        let mut pose_cfg = PoseCfg::load(&path_test_config)?;

        let snapshots = list_snapshots(&model_folder.join("train"), options.shuffle)?;
        let snapshot_index = project.snapshotindex.resolve()?;
        let snapshot = select_snapshot(&snapshots, snapshot_index)?.to_string();
        tracing::info!(
            "Using {} for model {}",
            snapshot,
            model_folder.display()
        );

        let init_weights = model_folder.join("train").join(&snapshot);
        let training_iterations = snapshot
            .rsplit('-')
            .next()
            .unwrap_or_default()
            .to_string();
        pose_cfg.init_weights = Some(init_weights.clone());
        pose_cfg.batch_size = 1;

        let mut gpu_inference = options.gpu_inference;
        if options.dynamic.enabled {
            tracing::info!(dynamic = ?options.dynamic, "Starting analysis in dynamic cropping mode");
            pose_cfg.num_outputs = 1;
            gpu_inference = false;
            tracing::info!(
                "Switching num_outputs (per animal) to 1 and GPU inference to false (not supported in dynamic cropping mode)"
            );
        }

        let (scorer, scorer_legacy) = scorer_names(
            &project,
            &pose_cfg.net_type,
            options.shuffle,
            &training_iterations,
        )?;

        if pose_cfg.num_outputs > 1 {
            if gpu_inference {
                tracing::info!(
                    "Switching to CPU keypoint extraction, as multiple point extraction is not supported by GPU graphs"
                );
                gpu_inference = false;
            }
            tracing::info!("Extracting {} instances per bodypart", pose_cfg.num_outputs);
        }

        let backend = BackendKind::select(options.use_frozen, gpu_inference);
        tracing::debug!(?backend, %scorer, "Resolved model");

        Ok(Self {
            project,
            pose_cfg,
            model_folder,
            snapshot,
            init_weights,
            training_iterations,
            train_fraction,
            scorer,
            scorer_legacy,
            backend,
            dynamic: options.dynamic,
            gpu: options.gpu,
        })
    }
}

/// Model folder relative to the project directory
pub fn model_folder(project: &ProjectConfig, train_fraction: f64, shuffle: u32) -> PathBuf {
    let mut path = PathBuf::from("dlc-models");
    path.push(format!("iteration-{}", project.iteration));
    path.push(format!(
        "{}{}-trainset{}shuffle{}",
        project.task,
        project.date,
        percent(train_fraction),
        shuffle
    ));
    path
}

/// Snapshot names in `train_dir`, sorted by training iterations
pub fn list_snapshots(train_dir: &Path, shuffle: u32) -> PoseResult<Vec<String>> {
    let entries = fs::read_dir(train_dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PoseError::SnapshotsNotFound { shuffle },
        _ => PoseError::Io(e),
    })?;

    let mut snapshots: Vec<(u64, String)> = Vec::new();
    for entry in entries {
        let file_name = entry?.file_name().to_string_lossy().into_owned();
        if !file_name.contains("index") {
            continue;
        }

        let name = file_name.split('.').next().unwrap_or_default().to_string();
        match name.split('-').nth(1).and_then(|n| n.parse::<u64>().ok()) {
            Some(iterations) => snapshots.push((iterations, name)),
            None => tracing::warn!("Ignoring unrecognized snapshot file {}", file_name),
        }
    }

    if snapshots.is_empty() {
        return Err(PoseError::SnapshotsNotFound { shuffle });
    }

    snapshots.sort_by_key(|(iterations, _)| *iterations);
    Ok(snapshots.into_iter().map(|(_, name)| name).collect())
}

/// Pick a snapshot; negative indices count from the end
pub fn select_snapshot(snapshots: &[String], index: i64) -> PoseResult<&str> {
    let len = snapshots.len() as i64;
    let resolved = if index < 0 { len + index } else { index };

    if resolved < 0 || resolved >= len {
        return Err(PoseError::InvalidConfig(format!(
            "snapshotindex {} out of range, {} snapshots available",
            index, len
        )));
    }
    Ok(&snapshots[resolved as usize])
}

/// Abbreviated network name used in scorer strings
pub fn net_name(net_type: &str) -> PoseResult<String> {
    if net_type.contains("resnet") {
        return Ok(net_type.replace('_', ""));
    }

    let multiplier = net_type
        .rsplit('_')
        .next()
        .and_then(|m| m.parse::<f64>().ok())
        .ok_or_else(|| {
            PoseError::InvalidConfig(format!("Unrecognized net_type: {}", net_type))
        })?;
    Ok(format!("mobnet_{}", percent(multiplier)))
}

/// Current and legacy scorer names for a trained model
pub fn scorer_names(
    project: &ProjectConfig,
    net_type: &str,
    shuffle: u32,
    training_iterations: &str,
) -> PoseResult<(String, String)> {
    let net = net_name(net_type)?;
    let suffix = format!(
        "{}_{}{}shuffle{}_{}",
        net, project.task, project.date, shuffle, training_iterations
    );
    Ok((format!("DLC_{}", suffix), format!("DeepCut_{}", suffix)))
}

// Percentage truncated toward zero (0.57 -> 56)
fn percent(fraction: f64) -> i64 {
    (fraction * 100.0).trunc() as i64
}
