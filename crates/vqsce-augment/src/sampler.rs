use rand::Rng;
use vqsce_core::config::AugmentationConfig;
use vqsce_core::types::TransformParameters;

/// Draws one [`TransformParameters`] per augmentation event.
///
/// Ranges are taken from a validated [`AugmentationConfig`]; nothing is
/// checked per draw. Draw order is fixed so a seeded source reproduces the
/// same sequence of transforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformSampler {
    enabled: bool,
    flip_prob: f64,
    rotation: f64,
    scale: [f64; 2],
    shear: f64,
    translate: [f64; 2],
}

impl TransformSampler {
    pub fn from_config(cfg: &AugmentationConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            flip_prob: cfg.flip_prob,
            rotation: cfg.rotation,
            scale: cfg.scale,
            shear: cfg.shear,
            translate: cfg.translate,
        }
    }

    /// A sampler that only ever yields the identity.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            flip_prob: 0.0,
            rotation: 0.0,
            scale: [1.0, 1.0],
            shear: 0.0,
            translate: [0.0, 0.0],
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> TransformParameters {
        if !self.enabled {
            return TransformParameters::IDENTITY;
        }
        TransformParameters {
            flip_horizontal: rng.gen_bool(self.flip_prob),
            flip_vertical: rng.gen_bool(self.flip_prob),
            rotation_deg: symmetric(rng, self.rotation),
            scale: rng.gen_range(self.scale[0]..=self.scale[1]),
            shear_deg: symmetric(rng, self.shear),
            translate_x: symmetric(rng, self.translate[0]),
            translate_y: symmetric(rng, self.translate[1]),
        }
    }
}

/// Uniform in `[-bound, bound]`.
fn symmetric<R: Rng + ?Sized>(rng: &mut R, bound: f64) -> f64 {
    rng.gen_range(-bound..=bound)
}
