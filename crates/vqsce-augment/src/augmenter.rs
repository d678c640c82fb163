use rand::Rng;
use tracing::debug;
use vqsce_core::config::PipelineConfig;
use vqsce_core::error::{AugmentationError, ConfigError};
use vqsce_core::types::{Patch, TransformParameters, VolumeExample};

use crate::engine::AugmentationEngine;
use crate::patch::PatchSampler;
use crate::sampler::TransformSampler;

/// Transform sampler, engine and patch sampler driven together for one visit
/// of an example.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Augmenter {
    sampler: TransformSampler,
    engine: AugmentationEngine,
    patches: PatchSampler,
    patches_per_example: usize,
    max_transform_attempts: usize,
}

impl Augmenter {
    pub fn new(
        sampler: TransformSampler,
        engine: AugmentationEngine,
        patches: PatchSampler,
        patches_per_example: usize,
        max_transform_attempts: usize,
    ) -> Self {
        Self {
            sampler,
            engine,
            patches,
            patches_per_example: patches_per_example.max(1),
            max_transform_attempts: max_transform_attempts.max(1),
        }
    }

    /// Expects a config that already passed [`PipelineConfig::validate`].
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            TransformSampler::from_config(&cfg.augmentation),
            AugmentationEngine::from_config(cfg)?,
            PatchSampler::from_config(cfg)?,
            cfg.data.patches_per_example,
            cfg.augmentation.max_transform_attempts,
        ))
    }

    pub fn sampler(&self) -> &TransformSampler {
        &self.sampler
    }

    pub fn engine(&self) -> &AugmentationEngine {
        &self.engine
    }

    pub fn patch_sampler(&self) -> &PatchSampler {
        &self.patches
    }

    pub fn patches_per_example(&self) -> usize {
        self.patches_per_example
    }

    /// `patches_per_example` patches for one visit of `example`.
    pub fn draw<R: Rng + ?Sized>(
        &self,
        example: &VolumeExample,
        rng: &mut R,
    ) -> Result<Vec<Patch>, AugmentationError> {
        self.draw_patches(example, self.patches_per_example, rng)
    }

    /// Draws `count` patches, resampling the transform whenever the current
    /// one leaves no valid origin.
    ///
    /// Mismatched volumes and oversized patches fail immediately since no
    /// transform can fix them.
    pub fn draw_patches<R: Rng + ?Sized>(
        &self,
        example: &VolumeExample,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<Patch>, AugmentationError> {
        self.engine.check_pair(&example.source, &example.target)?;
        let mut out = Vec::with_capacity(count);

        for attempt in 0..self.max_transform_attempts {
            let params = self.sampler.sample(rng);
            let pair = match self.engine.apply(&params, &example.source, &example.target) {
                Ok(pair) => pair,
                Err(AugmentationError::Singular) => {
                    debug!(example_id = %example.id, attempt, "singular transform; resampling");
                    continue;
                }
                Err(err) => return Err(err),
            };

            while out.len() < count {
                match self.patches.sample(&example.id, &pair, rng) {
                    Ok(patch) => out.push(patch),
                    Err(AugmentationError::NoValidOrigin { .. }) => break,
                    Err(err) => return Err(err),
                }
            }
            if out.len() == count {
                return Ok(out);
            }
            debug!(
                example_id = %example.id,
                attempt,
                have = out.len(),
                want = count,
                "no valid origin under transform; resampling"
            );
        }

        Err(AugmentationError::NoValidOrigin {
            id: example.id.to_string(),
            attempts: self.max_transform_attempts * self.patches.max_origin_attempts(),
        })
    }

    /// Un-augmented centred patch, for inspection.
    pub fn centre_patch(&self, example: &VolumeExample) -> Result<Patch, AugmentationError> {
        let pair = self
            .engine
            .apply(&TransformParameters::IDENTITY, &example.source, &example.target)?;
        self.patches.centre(&example.id, &pair)
    }
}
