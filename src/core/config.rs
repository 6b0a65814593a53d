use crate::models::frame::CropWindow;
use crate::models::pose::{PoseError, PoseResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Snapshot selector from the project config: an index (negative counts from
/// the most trained snapshot backwards) or the keyword `all`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotIndex {
    Index(i64),
    Keyword(String),
}

impl Default for SnapshotIndex {
    fn default() -> Self {
        SnapshotIndex::Index(-1)
    }
}

impl SnapshotIndex {
    /// Resolve to a concrete index; `all` falls back to the last snapshot
    pub fn resolve(&self) -> PoseResult<i64> {
        match self {
            SnapshotIndex::Index(index) => Ok(*index),
            SnapshotIndex::Keyword(word) if word == "all" => {
                tracing::warn!(
                    "snapshotindex is set to 'all' in the config.yaml file. Running live inference with all snapshots is not possible, using snapshot index -1"
                );
                Ok(-1)
            }
            SnapshotIndex::Keyword(word) => Err(PoseError::InvalidConfig(format!(
                "Invalid snapshotindex: {}. Must be an integer or 'all'",
                word
            ))),
        }
    }
}

/// Project configuration (`config.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    #[serde(rename = "Task", deserialize_with = "scalar_string")]
    pub task: String,
    #[serde(deserialize_with = "scalar_string")]
    pub date: String,
    #[serde(default)]
    pub iteration: u32,
    #[serde(rename = "TrainingFraction")]
    pub training_fraction: Vec<f64>,
    #[serde(default)]
    pub snapshotindex: SnapshotIndex,
    #[serde(default)]
    pub cropping: bool,
    #[serde(default)]
    pub x1: u32,
    #[serde(default)]
    pub x2: u32,
    #[serde(default)]
    pub y1: u32,
    #[serde(default)]
    pub y2: u32,
    #[serde(default)]
    pub bodyparts: Vec<String>,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    /// Keys this crate does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ProjectConfig {
    /// Load the project configuration and point `project_path` at its directory
    pub fn load(path: impl AsRef<Path>) -> PoseResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PoseError::ConfigNotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let mut config: ProjectConfig = serde_yaml::from_str(&contents).map_err(|e| {
            PoseError::InvalidConfig(format!("Failed to parse {:?}: {}", path, e))
        })?;

        config.project_path = Some(
            path.parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        );
        // Crop bounds are checked once overrides are applied
        config.validate_model_fields()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> PoseResult<()> {
        self.validate_model_fields()?;

        if self.cropping {
            self.crop_window().validate()?;
        }

        Ok(())
    }

    fn validate_model_fields(&self) -> PoseResult<()> {
        if self.task.is_empty() {
            return Err(PoseError::InvalidConfig("Task cannot be empty".to_string()));
        }

        if self.training_fraction.is_empty() {
            return Err(PoseError::InvalidConfig(
                "TrainingFraction cannot be empty".to_string(),
            ));
        }

        for fraction in &self.training_fraction {
            if !(*fraction > 0.0 && *fraction <= 1.0) {
                return Err(PoseError::InvalidConfig(format!(
                    "Invalid TrainingFraction: {}. Must be in (0.0, 1.0]",
                    fraction
                )));
            }
        }

        Ok(())
    }

    /// Training fraction selected by `index`
    pub fn train_fraction(&self, index: usize) -> PoseResult<f64> {
        self.training_fraction.get(index).copied().ok_or_else(|| {
            PoseError::InvalidConfig(format!(
                "Training set index {} out of range, TrainingFraction has {} entries",
                index,
                self.training_fraction.len()
            ))
        })
    }

    pub fn crop_window(&self) -> CropWindow {
        CropWindow::new(self.x1, self.x2, self.y1, self.y2)
    }

    /// Enable cropping with the given bounds
    pub fn set_cropping(&mut self, window: CropWindow) {
        self.cropping = true;
        self.x1 = window.x1;
        self.x2 = window.x2;
        self.y1 = window.y1;
        self.y2 = window.y2;
    }

    /// Active static crop window, if any
    pub fn active_crop(&self) -> Option<CropWindow> {
        self.cropping.then(|| self.crop_window())
    }
}

/// Network hyperparameters of a trained model (`test/pose_cfg.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoseCfg {
    #[serde(default = "default_net_type")]
    pub net_type: String,
    #[serde(default = "default_stride")]
    pub stride: f32,
    #[serde(default = "default_locref_stdev")]
    pub locref_stdev: f32,
    #[serde(default = "default_true")]
    pub location_refinement: bool,
    #[serde(default)]
    pub num_joints: usize,
    #[serde(default)]
    pub all_joints_names: Vec<String>,
    #[serde(default = "default_one")]
    pub num_outputs: usize,
    #[serde(default = "default_one")]
    pub batch_size: usize,
    #[serde(default)]
    pub init_weights: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

fn default_net_type() -> String { "resnet_50".to_string() }
fn default_stride() -> f32 { 8.0 }
fn default_locref_stdev() -> f32 { 7.2801 }
fn default_true() -> bool { true }
fn default_one() -> usize { 1 }

impl PoseCfg {
    pub fn load(path: impl AsRef<Path>) -> PoseResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: PoseCfg = serde_yaml::from_str(&contents).map_err(|e| {
            PoseError::InvalidConfig(format!("Failed to parse {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PoseResult<()> {
        if !(self.stride > 0.0) {
            return Err(PoseError::InvalidConfig(format!(
                "Invalid stride: {}. Must be positive",
                self.stride
            )));
        }

        if self.num_outputs == 0 {
            return Err(PoseError::InvalidConfig(
                "num_outputs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Accept YAML strings and numbers alike (`date: 1205` is common)
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    match value {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, got {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const CONFIG_YAML: &str = "\
Task: reaching
scorer: lab
date: Jan30
project_path: /somewhere/else
bodyparts:
- hand
- finger
iteration: 2
TrainingFraction:
- 0.95
- 0.8
snapshotindex: -1
cropping: false
x1: 0
x2: 640
y1: 277
y2: 624
video_sets: {}
";

    fn get_test_dir(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push("dlc_live_config_test");
        path.push(name);
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn test_load_project_config() {
        let dir = get_test_dir("load");
        let path = dir.join("config.yaml");
        fs::write(&path, CONFIG_YAML).unwrap();

        let config = ProjectConfig::load(&path).unwrap();
        assert_eq!(config.task, "reaching");
        assert_eq!(config.date, "Jan30");
        assert_eq!(config.iteration, 2);
        assert_eq!(config.training_fraction, vec![0.95, 0.8]);
        assert_eq!(config.snapshotindex, SnapshotIndex::Index(-1));
        assert_eq!(config.bodyparts, vec!["hand", "finger"]);
        assert_eq!(config.project_path, Some(dir.clone()));
        assert!(config.extra.contains_key("scorer"));
        assert!(config.extra.contains_key("video_sets"));
        assert_eq!(config.active_crop(), None);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_config() {
        let dir = get_test_dir("missing");
        let result = ProjectConfig::load(dir.join("config.yaml"));
        assert!(matches!(result, Err(PoseError::ConfigNotFound(_))));
    }

    #[test]
    fn test_numeric_date() {
        let yaml = CONFIG_YAML.replace("date: Jan30", "date: 1205");
        let config: ProjectConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.date, "1205");
    }

    #[test]
    fn test_snapshot_index_resolution() {
        assert_eq!(SnapshotIndex::Index(3).resolve().unwrap(), 3);
        assert_eq!(SnapshotIndex::Keyword("all".into()).resolve().unwrap(), -1);
        assert!(SnapshotIndex::Keyword("best".into()).resolve().is_err());

        let yaml = CONFIG_YAML.replace("snapshotindex: -1", "snapshotindex: all");
        let config: ProjectConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.snapshotindex, SnapshotIndex::Keyword("all".into()));
    }

    #[test]
    fn test_config_validation() {
        let mut config: ProjectConfig = serde_yaml::from_str(CONFIG_YAML).unwrap();
        assert!(config.validate().is_ok());

        config.training_fraction = vec![1.5];
        assert!(config.validate().is_err());
        config.training_fraction = vec![];
        assert!(config.validate().is_err());
        config.training_fraction = vec![0.95];

        config.set_cropping(CropWindow::new(50, 10, 0, 10));
        assert!(config.validate().is_err());
        config.set_cropping(CropWindow::new(10, 50, 0, 10));
        assert!(config.validate().is_ok());
        assert_eq!(config.active_crop(), Some(CropWindow::new(10, 50, 0, 10)));
    }

    #[test]
    fn test_train_fraction_index() {
        let config: ProjectConfig = serde_yaml::from_str(CONFIG_YAML).unwrap();
        assert_eq!(config.train_fraction(1).unwrap(), 0.8);
        assert!(matches!(
            config.train_fraction(2),
            Err(PoseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_pose_cfg_defaults() {
        let cfg: PoseCfg = serde_yaml::from_str("num_joints: 4\nall_joints_names: [a, b, c, d]\n").unwrap();
        assert_eq!(cfg.net_type, "resnet_50");
        assert_eq!(cfg.stride, 8.0);
        assert_eq!(cfg.locref_stdev, 7.2801);
        assert!(cfg.location_refinement);
        assert_eq!(cfg.num_outputs, 1);
        assert_eq!(cfg.num_joints, 4);
        assert!(cfg.validate().is_ok());

        let cfg: PoseCfg = serde_yaml::from_str("stride: 0\n").unwrap();
        assert!(cfg.validate().is_err());
    }
}
