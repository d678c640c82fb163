use std::path::PathBuf;

use thiserror::Error;

use crate::types::Dims3;

/// Invalid static configuration. Always fatal before any worker starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("fold {fold} out of range for cv_folds={cv_folds}")]
    FoldOutOfRange { fold: usize, cv_folds: usize },
    #[error("cv_folds={cv_folds} exceeds indexed example count {examples}")]
    TooManyFolds { cv_folds: usize, examples: usize },
    #[error("{field} must be > 0")]
    NonPositive { field: &'static str },
    #[error("{field} {patch} does not fit within volume {volume}")]
    PatchExceedsVolume {
        field: &'static str,
        patch: Dims3,
        volume: Dims3,
    },
    #[error("depth ratio violated: {0}")]
    DepthRatio(String),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("no usable examples under {}", .root.display())]
    NoExamples { root: PathBuf },
    #[error("config parse error: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Which half of a pair a data problem concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeRole {
    Source,
    Target,
}

impl std::fmt::Display for VolumeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeRole::Source => f.write_str("source"),
            VolumeRole::Target => f.write_str("target"),
        }
    }
}

/// Per-example storage problem. The example is excluded and the run continues.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("{role} volume {id} has no matching {}", partner(.role))]
    MissingPartner { id: String, role: VolumeRole },
    #[error("duplicate {role} volume for {id}: {}", .path.display())]
    Duplicate {
        id: String,
        role: VolumeRole,
        path: PathBuf,
    },
    #[error("{} matches both source and target labels", .path.display())]
    AmbiguousLabel { path: PathBuf },
    #[error("{role} volume {id} has dims {actual}, expected {expected}")]
    DimensionMismatch {
        id: String,
        role: VolumeRole,
        expected: Dims3,
        actual: Dims3,
    },
    #[error("failed to decode {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },
}

fn partner(role: &VolumeRole) -> VolumeRole {
    match role {
        VolumeRole::Source => VolumeRole::Target,
        VolumeRole::Target => VolumeRole::Source,
    }
}

/// Per-sample failure to produce an in-bounds patch. The draw is skipped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AugmentationError {
    #[error("source {source_dims} and target {target_dims} do not share depth ratio {ratio}")]
    DepthRatio {
        source_dims: Dims3,
        target_dims: Dims3,
        ratio: usize,
    },
    #[error("source {source_dims} and target {target_dims} differ in spatial extent")]
    ExtentMismatch { source_dims: Dims3, target_dims: Dims3 },
    #[error("transform is not invertible")]
    Singular,
    #[error("patch {patch} does not fit volume {volume}")]
    PatchTooLarge { patch: Dims3, volume: Dims3 },
    #[error("no valid patch origin for {id} after {attempts} attempts")]
    NoValidOrigin { id: String, attempts: usize },
}

/// Umbrella error surfaced to the consumer of the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Augmentation(#[from] AugmentationError),
    #[error("resource error: {0}")]
    Resource(String),
}

impl PipelineError {
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Startup and resource errors halt the run; the rest are contained per example.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Config(_) | PipelineError::Resource(_))
    }
}
