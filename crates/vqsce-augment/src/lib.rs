#![deny(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod affine;
pub mod augmenter;
pub mod engine;
pub mod patch;
pub mod sampler;

pub use augmenter::Augmenter;
pub use engine::{AugmentationEngine, AugmentedPair, BorderPolicy, ValidityMap};
pub use patch::PatchSampler;
pub use sampler::TransformSampler;
