use ndarray::s;
use rand::Rng;
use vqsce_core::config::PipelineConfig;
use vqsce_core::error::{AugmentationError, ConfigError};
use vqsce_core::types::{Dims3, ExampleId, Patch, PatchOrigin};

use crate::engine::AugmentedPair;

/// Cuts matched source/target patches out of an augmented pair.
///
/// Source slices `[d, d + dps)` pair with target slices `[R*d, R*(d + dps))`;
/// `y` and `x` are shared because both volumes have the same plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchSampler {
    source_patch: Dims3,
    target_patch: Dims3,
    depth_ratio: usize,
    max_origin_attempts: usize,
    min_valid_fraction: f64,
}

impl PatchSampler {
    pub fn new(
        source_patch: Dims3,
        depth_ratio: usize,
        max_origin_attempts: usize,
        min_valid_fraction: f64,
    ) -> Self {
        let depth_ratio = depth_ratio.max(1);
        Self {
            source_patch,
            target_patch: Dims3::new(
                source_patch.depth * depth_ratio,
                source_patch.height,
                source_patch.width,
            ),
            depth_ratio,
            max_origin_attempts: max_origin_attempts.max(1),
            min_valid_fraction,
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            cfg.data.source_patch,
            cfg.depth_ratio()?,
            cfg.augmentation.max_origin_attempts,
            cfg.augmentation.min_valid_fraction,
        ))
    }

    pub fn source_patch(&self) -> Dims3 {
        self.source_patch
    }

    pub fn target_patch(&self) -> Dims3 {
        self.target_patch
    }

    pub fn max_origin_attempts(&self) -> usize {
        self.max_origin_attempts
    }

    fn check_fits(&self, pair: &AugmentedPair) -> Result<(), AugmentationError> {
        let s = pair.source_dims();
        if !self.source_patch.fits_within(&s) {
            return Err(AugmentationError::PatchTooLarge {
                patch: self.source_patch,
                volume: s,
            });
        }
        let t = pair.target_dims();
        if !self.target_patch.fits_within(&t) {
            return Err(AugmentationError::PatchTooLarge {
                patch: self.target_patch,
                volume: t,
            });
        }
        Ok(())
    }

    /// Draws origins until one lands on a sufficiently valid window.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        id: &ExampleId,
        pair: &AugmentedPair,
        rng: &mut R,
    ) -> Result<Patch, AugmentationError> {
        self.check_fits(pair)?;
        let s = pair.source_dims();
        let p = self.source_patch;
        for _ in 0..self.max_origin_attempts {
            let origin = PatchOrigin {
                depth: rng.gen_range(0..=s.depth - p.depth),
                y: rng.gen_range(0..=s.height - p.height),
                x: rng.gen_range(0..=s.width - p.width),
            };
            let valid = pair.validity.fraction(origin.y, origin.x, p.height, p.width);
            if valid >= self.min_valid_fraction {
                return self.extract(id, pair, origin);
            }
        }
        Err(AugmentationError::NoValidOrigin {
            id: id.to_string(),
            attempts: self.max_origin_attempts,
        })
    }

    /// Deterministic patch centred in depth and plane.
    pub fn centre(&self, id: &ExampleId, pair: &AugmentedPair) -> Result<Patch, AugmentationError> {
        self.check_fits(pair)?;
        let s = pair.source_dims();
        let p = self.source_patch;
        let origin = PatchOrigin {
            depth: (s.depth - p.depth) / 2,
            y: (s.height - p.height) / 2,
            x: (s.width - p.width) / 2,
        };
        self.extract(id, pair, origin)
    }

    pub fn extract(
        &self,
        id: &ExampleId,
        pair: &AugmentedPair,
        origin: PatchOrigin,
    ) -> Result<Patch, AugmentationError> {
        self.check_fits(pair)?;
        let s = pair.source_dims();
        let p = self.source_patch;
        let in_bounds = origin.depth + p.depth <= s.depth
            && origin.y + p.height <= s.height
            && origin.x + p.width <= s.width;
        if !in_bounds {
            return Err(AugmentationError::PatchTooLarge {
                patch: p,
                volume: s,
            });
        }

        let (y, x) = (origin.y, origin.x);
        let (h, w) = (p.height, p.width);
        let d = origin.depth;
        let td = d * self.depth_ratio;
        let source = pair
            .source
            .slice(s![d..d + p.depth, y..y + h, x..x + w])
            .to_owned();
        let target = pair
            .target
            .slice(s![td..td + self.target_patch.depth, y..y + h, x..x + w])
            .to_owned();
        Ok(Patch {
            example_id: id.clone(),
            origin,
            source,
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use vqsce_core::types::Volume;

    use super::*;
    use crate::engine::ValidityMap;

    fn pair(depth: usize, h: usize, w: usize, ratio: usize) -> AugmentedPair {
        AugmentedPair {
            params: Default::default(),
            source: Volume::from_shape_fn((depth, h, w), |(d, y, x)| (d * 10_000 + y * 100 + x) as f32),
            target: Volume::from_shape_fn((depth * ratio, h, w), |(d, y, x)| {
                ((d / ratio) * 10_000 + y * 100 + x) as f32
            }),
            validity: ValidityMap::full(h, w),
        }
    }

    #[test]
    fn target_slices_follow_source_offset() {
        let sampler = PatchSampler::new(Dims3::new(2, 4, 4), 4, 8, 1.0);
        let pair = pair(5, 10, 12, 4);
        let patch = sampler
            .extract(&ExampleId::new("a"), &pair, PatchOrigin { depth: 2, y: 3, x: 5 })
            .unwrap();
        assert_eq!(patch.source_dims(), Dims3::new(2, 4, 4));
        assert_eq!(patch.target_dims(), Dims3::new(8, 4, 4));
        assert_eq!(patch.source[[0, 0, 0]], 20_305.0);
        assert_eq!(patch.target[[0, 0, 0]], 20_305.0);
        assert_eq!(patch.target[[7, 3, 3]], patch.source[[1, 3, 3]]);
    }

    #[test]
    fn random_origins_stay_in_bounds() {
        let sampler = PatchSampler::new(Dims3::new(3, 8, 8), 4, 8, 1.0);
        let pair = pair(3, 20, 11, 4);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let p = sampler.sample(&ExampleId::new("a"), &pair, &mut rng).unwrap();
            assert_eq!(p.origin.depth, 0);
            assert!(p.origin.y + 8 <= 20);
            assert!(p.origin.x + 8 <= 11);
        }
    }

    #[test]
    fn oversized_patch_is_reported() {
        let sampler = PatchSampler::new(Dims3::new(1, 16, 4), 1, 4, 1.0);
        let pair = pair(2, 8, 8, 1);
        let err = sampler.centre(&ExampleId::new("a"), &pair).unwrap_err();
        assert!(matches!(err, AugmentationError::PatchTooLarge { .. }));
    }

    #[test]
    fn invalid_windows_exhaust_attempts() {
        let sampler = PatchSampler::new(Dims3::new(1, 4, 4), 1, 6, 1.0);
        let mut pair = pair(1, 8, 8, 1);
        pair.validity = ValidityMap::from_mask(8, 8, |_, _| false);
        let mut rng = StdRng::seed_from_u64(9);
        assert_eq!(
            sampler.sample(&ExampleId::new("z"), &pair, &mut rng).unwrap_err(),
            AugmentationError::NoValidOrigin {
                id: "z".to_string(),
                attempts: 6
            }
        );
    }
}
