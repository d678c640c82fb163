#![allow(dead_code)]

use std::collections::BTreeSet;
use std::time::Duration;

use rand::rngs::StdRng;
use vqsce_core::error::AugmentationError;
use vqsce_core::types::{ExampleId, Patch, PatchOrigin, Volume};
use vqsce_runtime::pipeline::{EpochPlan, RuntimeCaps};
use vqsce_runtime::source::PatchSource;

/// Patches whose voxels all hold their example position; draws ignore the rng.
pub struct SyntheticSource {
    ids: Vec<ExampleId>,
    patches_per_visit: usize,
    failing: BTreeSet<usize>,
    draw_delay: Duration,
}

impl SyntheticSource {
    pub fn new(len: usize) -> Self {
        Self {
            ids: (0..len).map(|i| ExampleId::new(format!("ex{i:04}"))).collect(),
            patches_per_visit: 1,
            failing: BTreeSet::new(),
            draw_delay: Duration::ZERO,
        }
    }

    pub fn with_patches_per_visit(mut self, n: usize) -> Self {
        self.patches_per_visit = n;
        self
    }

    pub fn failing(mut self, positions: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(positions);
        self
    }

    pub fn draw_delay(mut self, delay: Duration) -> Self {
        self.draw_delay = delay;
        self
    }
}

/// Bytes of one synthetic patch: source `[1, 16, 16]`, target `[4, 16, 16]`.
pub const PATCH_BYTES: u64 = (256 + 1024) * 4;

impl PatchSource for SyntheticSource {
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn example_id(&self, position: usize) -> Option<&ExampleId> {
        self.ids.get(position)
    }

    fn patches_per_visit(&self) -> usize {
        self.patches_per_visit
    }

    fn draw(&self, position: usize, _rng: &mut StdRng) -> Result<Vec<Patch>, AugmentationError> {
        if !self.draw_delay.is_zero() {
            std::thread::sleep(self.draw_delay);
        }
        let id = self.ids[position].clone();
        if self.failing.contains(&position) {
            return Err(AugmentationError::NoValidOrigin {
                id: id.to_string(),
                attempts: 1,
            });
        }
        let value = position as f32;
        Ok((0..self.patches_per_visit)
            .map(|k| Patch {
                example_id: id.clone(),
                origin: PatchOrigin {
                    depth: 0,
                    y: k,
                    x: 0,
                },
                source: Volume::from_elem((1, 16, 16), value),
                target: Volume::from_elem((4, 16, 16), value),
            })
            .collect())
    }
}

pub fn caps(num_workers: usize) -> RuntimeCaps {
    RuntimeCaps {
        max_inflight_bytes: 64 * 1024 * 1024,
        max_queue_batches: 4,
        max_queue_patches: 16,
        num_workers,
    }
}

pub fn plan(mb_size: usize, epochs: usize, seed: u64) -> EpochPlan {
    EpochPlan {
        mb_size,
        epochs,
        seed,
        shuffle: true,
    }
}
