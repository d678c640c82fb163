use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use rand::rngs::StdRng;
use tracing::warn;
use vqsce_augment::Augmenter;
use vqsce_core::error::AugmentationError;
use vqsce_core::types::{ExampleId, Patch, VolumeExample};

/// The supply of patches a pipeline epoch draws from.
///
/// A visit is one call to [`PatchSource::draw`] for one position. Positions are
/// stable for the lifetime of the source; only the visit order changes per epoch.
pub trait PatchSource: Send + Sync + 'static {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn example_id(&self, position: usize) -> Option<&ExampleId>;

    /// Upper bound on patches returned by one visit.
    fn patches_per_visit(&self) -> usize {
        1
    }

    fn draw(&self, position: usize, rng: &mut StdRng) -> Result<Vec<Patch>, AugmentationError>;
}

/// Augmented patches over a fixed set of examples, typically one side of a fold split.
#[derive(Debug, Clone)]
pub struct AugmentedSource {
    examples: Vec<Arc<VolumeExample>>,
    augmenter: Augmenter,
}

impl AugmentedSource {
    pub fn new(examples: Vec<Arc<VolumeExample>>, augmenter: Augmenter) -> Self {
        Self {
            examples,
            augmenter,
        }
    }

    pub fn examples(&self) -> &[Arc<VolumeExample>] {
        &self.examples
    }

    pub fn augmenter(&self) -> &Augmenter {
        &self.augmenter
    }
}

impl PatchSource for AugmentedSource {
    fn len(&self) -> usize {
        self.examples.len()
    }

    fn example_id(&self, position: usize) -> Option<&ExampleId> {
        self.examples.get(position).map(|e| &e.id)
    }

    fn patches_per_visit(&self) -> usize {
        self.augmenter.patches_per_example()
    }

    fn draw(&self, position: usize, rng: &mut StdRng) -> Result<Vec<Patch>, AugmentationError> {
        match self.examples.get(position) {
            Some(example) => self.augmenter.draw(example, rng),
            None => Ok(Vec::new()),
        }
    }
}

/// One un-augmented centred patch per example, for visual inspection.
///
/// Examples whose patch cannot be cut are logged and left out.
pub fn example_patches(examples: &[Arc<VolumeExample>], augmenter: &Augmenter) -> Vec<Patch> {
    examples
        .iter()
        .filter_map(|ex| match augmenter.centre_patch(ex) {
            Ok(patch) => Some(patch),
            Err(err) => {
                warn!(example_id = %ex.id, error = %err, "skipping example patch");
                None
            }
        })
        .collect()
}

/// Writes `<id>_source.npy` and `<id>_target.npy` for every patch into `dir`.
///
/// Path separators in example ids are flattened to `_`. Returns the number of
/// patches written.
pub fn write_example_patches(dir: &Path, patches: &[Patch]) -> Result<usize> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create_dir_all failed: {}", dir.display()))?;
    for patch in patches {
        let stem = patch.example_id.as_str().replace('/', "_");
        for (role, volume) in [("source", &patch.source), ("target", &patch.target)] {
            let path = dir.join(format!("{stem}_{role}.npy"));
            ndarray_npy::write_npy(&path, volume)
                .with_context(|| format!("write_npy failed: {}", path.display()))?;
        }
    }
    Ok(patches.len())
}
