//! Experiment configuration consumed by the data pipeline.
//!
//! The document mirrors the experiment file layout (`data`, `expt`,
//! `augmentation` groups). Other top-level groups are ignored so a full
//! experiment file can be passed in unchanged. Every range check happens once,
//! in [`PipelineConfig::validate`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Dims3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub expt: ExptConfig,
    pub augmentation: AugmentationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Target is a depth-upsampled version of the source.
    SuperRes,
    /// Source and target share dims; only contrast differs.
    Contrast,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityWindow {
    pub min: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub data_path: PathBuf,
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub source: Vec<String>,
    pub target: Vec<String>,
    #[serde(default = "default_one")]
    pub down_sample: usize,
    pub source_patch: Dims3,
    pub target_patch: Dims3,
    #[serde(default)]
    pub num_examples: Option<usize>,
    pub cv_folds: usize,
    pub fold: usize,
    #[serde(default = "default_one")]
    pub patches_per_example: usize,
    #[serde(default)]
    pub normalisation: Option<IntensityWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExptConfig {
    pub mb_size: usize,
    pub epochs: usize,
    /// Consumed by the training loop, not by the pipeline.
    #[serde(default = "default_one")]
    pub save_every: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderMode {
    #[default]
    Constant,
    Reflect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMode {
    #[default]
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationConfig {
    #[serde(rename = "use")]
    pub enabled: bool,
    #[serde(default)]
    pub flip_prob: f64,
    /// Maximum absolute rotation in degrees.
    #[serde(default)]
    pub rotation: f64,
    /// `[min, max]` uniform scale range.
    #[serde(default = "default_scale")]
    pub scale: [f64; 2],
    /// Maximum absolute shear angle in degrees.
    #[serde(default)]
    pub shear: f64,
    /// `[x, y]` maximum absolute translation as a fraction of width/height.
    #[serde(default)]
    pub translate: [f64; 2],
    pub source_dims: Dims3,
    pub target_dims: Dims3,
    #[serde(default)]
    pub border: BorderMode,
    #[serde(default)]
    pub fill_value: f32,
    #[serde(default)]
    pub interpolation: InterpolationMode,
    #[serde(default = "default_min_valid_fraction")]
    pub min_valid_fraction: f64,
    #[serde(default = "default_origin_attempts")]
    pub max_origin_attempts: usize,
    #[serde(default = "default_transform_attempts")]
    pub max_transform_attempts: usize,
}

fn default_image_dir() -> String {
    "Images".to_string()
}

fn default_one() -> usize {
    1
}

fn default_scale() -> [f64; 2] {
    [1.0, 1.0]
}

fn default_min_valid_fraction() -> f64 {
    1.0
}

fn default_origin_attempts() -> usize {
    16
}

fn default_transform_attempts() -> usize {
    4
}

impl PipelineConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))
    }

    /// Target/source depth ratio R implied by the configured full-resolution dims.
    pub fn depth_ratio(&self) -> Result<usize, ConfigError> {
        let s = self.augmentation.source_dims;
        let t = self.augmentation.target_dims;
        if s.depth == 0 || t.depth % s.depth != 0 {
            return Err(ConfigError::DepthRatio(format!(
                "target depth {} is not a multiple of source depth {}",
                t.depth, s.depth
            )));
        }
        let ratio = t.depth / s.depth;
        if self.data.data_type == DataType::Contrast && ratio != 1 {
            return Err(ConfigError::DepthRatio(format!(
                "contrast data requires equal depths, got {} and {}",
                s.depth, t.depth
            )));
        }
        Ok(ratio)
    }

    /// Source dims after the depth stride.
    pub fn effective_source_dims(&self) -> Dims3 {
        strided(self.augmentation.source_dims, self.data.down_sample)
    }

    /// Target dims after the depth stride.
    pub fn effective_target_dims(&self) -> Dims3 {
        strided(self.augmentation.target_dims, self.data.down_sample)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_data()?;
        self.validate_expt()?;
        self.validate_augmentation()?;
        Ok(())
    }

    fn validate_data(&self) -> Result<(), ConfigError> {
        let d = &self.data;
        if d.source.is_empty() || d.source.iter().any(|l| l.trim().is_empty()) {
            return Err(ConfigError::invalid("data.source", "labels must be non-empty"));
        }
        if d.target.is_empty() || d.target.iter().any(|l| l.trim().is_empty()) {
            return Err(ConfigError::invalid("data.target", "labels must be non-empty"));
        }
        if let Some(shared) = d.source.iter().find(|l| d.target.contains(l)) {
            return Err(ConfigError::invalid(
                "data.source",
                format!("label {shared:?} is also a target label"),
            ));
        }
        if d.down_sample == 0 {
            return Err(ConfigError::NonPositive {
                field: "data.down_sample",
            });
        }
        if d.cv_folds == 0 {
            return Err(ConfigError::NonPositive {
                field: "data.cv_folds",
            });
        }
        if d.fold >= d.cv_folds {
            return Err(ConfigError::FoldOutOfRange {
                fold: d.fold,
                cv_folds: d.cv_folds,
            });
        }
        if d.num_examples == Some(0) {
            return Err(ConfigError::NonPositive {
                field: "data.num_examples",
            });
        }
        if d.patches_per_example == 0 {
            return Err(ConfigError::NonPositive {
                field: "data.patches_per_example",
            });
        }
        if let Some(w) = d.normalisation {
            if !(w.min.is_finite() && w.max.is_finite() && w.max > w.min) {
                return Err(ConfigError::invalid(
                    "data.normalisation",
                    format!("max ({}) must exceed min ({})", w.max, w.min),
                ));
            }
        }
        if !d.source_patch.is_positive() {
            return Err(ConfigError::NonPositive {
                field: "data.source_patch",
            });
        }
        if !d.target_patch.is_positive() {
            return Err(ConfigError::NonPositive {
                field: "data.target_patch",
            });
        }
        Ok(())
    }

    fn validate_expt(&self) -> Result<(), ConfigError> {
        if self.expt.mb_size == 0 {
            return Err(ConfigError::NonPositive {
                field: "expt.mb_size",
            });
        }
        if self.expt.epochs == 0 {
            return Err(ConfigError::NonPositive {
                field: "expt.epochs",
            });
        }
        if self.expt.save_every == 0 {
            return Err(ConfigError::NonPositive {
                field: "expt.save_every",
            });
        }
        Ok(())
    }

    fn validate_augmentation(&self) -> Result<(), ConfigError> {
        let a = &self.augmentation;
        let d = &self.data;

        if !a.source_dims.is_positive() {
            return Err(ConfigError::NonPositive {
                field: "augmentation.source_dims",
            });
        }
        if !a.target_dims.is_positive() {
            return Err(ConfigError::NonPositive {
                field: "augmentation.target_dims",
            });
        }
        if !a.source_dims.same_plane(&a.target_dims) {
            return Err(ConfigError::invalid(
                "augmentation.target_dims",
                format!(
                    "height/width {} differ from source_dims {}",
                    a.target_dims, a.source_dims
                ),
            ));
        }

        let ratio = self.depth_ratio()?;
        if a.source_dims.depth % d.down_sample != 0 {
            return Err(ConfigError::DepthRatio(format!(
                "down_sample {} does not divide source depth {}",
                d.down_sample, a.source_dims.depth
            )));
        }
        if d.target_patch.depth != ratio * d.source_patch.depth {
            return Err(ConfigError::DepthRatio(format!(
                "target_patch depth {} != {} x source_patch depth {}",
                d.target_patch.depth, ratio, d.source_patch.depth
            )));
        }
        if !d.source_patch.same_plane(&d.target_patch) {
            return Err(ConfigError::invalid(
                "data.target_patch",
                format!(
                    "height/width {} differ from source_patch {}",
                    d.target_patch, d.source_patch
                ),
            ));
        }

        let eff_source = self.effective_source_dims();
        if !d.source_patch.fits_within(&eff_source) {
            return Err(ConfigError::PatchExceedsVolume {
                field: "data.source_patch",
                patch: d.source_patch,
                volume: eff_source,
            });
        }
        let eff_target = self.effective_target_dims();
        if !d.target_patch.fits_within(&eff_target) {
            return Err(ConfigError::PatchExceedsVolume {
                field: "data.target_patch",
                patch: d.target_patch,
                volume: eff_target,
            });
        }

        if !(0.0..=1.0).contains(&a.flip_prob) {
            return Err(ConfigError::invalid(
                "augmentation.flip_prob",
                format!("{} not in [0, 1]", a.flip_prob),
            ));
        }
        if !(a.rotation.is_finite() && a.rotation >= 0.0) {
            return Err(ConfigError::invalid(
                "augmentation.rotation",
                format!("{} must be a non-negative angle", a.rotation),
            ));
        }
        let [smin, smax] = a.scale;
        if !(smin.is_finite() && smax.is_finite() && smin > 0.0 && smin <= smax) {
            return Err(ConfigError::invalid(
                "augmentation.scale",
                format!("[{smin}, {smax}] must satisfy 0 < min <= max"),
            ));
        }
        if !(a.shear.is_finite() && (0.0..90.0).contains(&a.shear)) {
            return Err(ConfigError::invalid(
                "augmentation.shear",
                format!("{} not in [0, 90)", a.shear),
            ));
        }
        for (axis, t) in ["x", "y"].iter().zip(a.translate) {
            if !(t.is_finite() && (0.0..1.0).contains(&t)) {
                return Err(ConfigError::invalid(
                    "augmentation.translate",
                    format!("{axis} fraction {t} not in [0, 1)"),
                ));
            }
        }
        if !a.fill_value.is_finite() {
            return Err(ConfigError::invalid(
                "augmentation.fill_value",
                "must be finite",
            ));
        }
        if !(a.min_valid_fraction > 0.0 && a.min_valid_fraction <= 1.0) {
            return Err(ConfigError::invalid(
                "augmentation.min_valid_fraction",
                format!("{} not in (0, 1]", a.min_valid_fraction),
            ));
        }
        if a.max_origin_attempts == 0 {
            return Err(ConfigError::NonPositive {
                field: "augmentation.max_origin_attempts",
            });
        }
        if a.max_transform_attempts == 0 {
            return Err(ConfigError::NonPositive {
                field: "augmentation.max_transform_attempts",
            });
        }
        Ok(())
    }
}

fn strided(dims: Dims3, stride: usize) -> Dims3 {
    let stride = stride.max(1);
    Dims3::new(dims.depth.div_ceil(stride), dims.height, dims.width)
}
