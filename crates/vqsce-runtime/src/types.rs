use std::sync::Arc;

use ndarray::{Array4, ArrayView3, Axis};
use vqsce_core::error::PipelineError;
use vqsce_core::types::{ExampleId, Patch, PatchOrigin};

/// A batch is the unit of delivery to the consumer.
///
/// Invariants:
/// - `source` is `[n, d_ps, h, w]` and `target` is `[n, R * d_ps, h, w]`
/// - `example_ids` and `origins` have length `n` and align with axis 0
#[derive(Debug, Clone)]
pub struct Batch {
    pub epoch: usize,
    /// Position of this batch within its epoch.
    pub index: usize,
    pub example_ids: Arc<[ExampleId]>,
    pub origins: Arc<[PatchOrigin]>,
    pub source: Array4<f32>,
    pub target: Array4<f32>,
}

impl Batch {
    pub fn from_patches(
        epoch: usize,
        index: usize,
        patches: &[Patch],
    ) -> Result<Self, PipelineError> {
        if patches.is_empty() {
            return Err(PipelineError::resource("cannot assemble an empty batch"));
        }
        let sources: Vec<ArrayView3<'_, f32>> = patches.iter().map(|p| p.source.view()).collect();
        let targets: Vec<ArrayView3<'_, f32>> = patches.iter().map(|p| p.target.view()).collect();
        let source = ndarray::stack(Axis(0), &sources)
            .map_err(|e| PipelineError::resource(format!("stack source patches: {e}")))?;
        let target = ndarray::stack(Axis(0), &targets)
            .map_err(|e| PipelineError::resource(format!("stack target patches: {e}")))?;
        Ok(Self {
            epoch,
            index,
            example_ids: patches.iter().map(|p| p.example_id.clone()).collect(),
            origins: patches.iter().map(|p| p.origin).collect(),
            source,
            target,
        })
    }

    pub fn patch_count(&self) -> usize {
        self.example_ids.len()
    }

    pub fn size_bytes(&self) -> u64 {
        let voxels = self.source.len().saturating_add(self.target.len());
        (voxels as u64).saturating_mul(std::mem::size_of::<f32>() as u64)
    }
}

/// Emitted once per epoch, after the last batch of that epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub visits: usize,
    pub batches: usize,
    pub patches_batched: usize,
    /// Remainder smaller than `mb_size`, never padded.
    pub patches_dropped: usize,
    pub skipped_draws: usize,
}

/// Totals for a whole run, returned when the producer exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub epochs: Vec<EpochSummary>,
    pub cancelled: bool,
}

impl PipelineSummary {
    pub fn batches(&self) -> usize {
        self.epochs.iter().map(|e| e.batches).sum()
    }

    pub fn skipped_draws(&self) -> usize {
        self.epochs.iter().map(|e| e.skipped_draws).sum()
    }
}

#[cfg(test)]
mod tests {
    use vqsce_core::types::Volume;

    use super::*;

    fn patch(id: &str, fill: f32) -> Patch {
        Patch {
            example_id: ExampleId::new(id),
            origin: PatchOrigin { depth: 0, y: 1, x: 2 },
            source: Volume::from_elem((2, 3, 3), fill),
            target: Volume::from_elem((8, 3, 3), fill),
        }
    }

    #[test]
    fn stacks_patches_along_batch_axis() {
        let b = Batch::from_patches(1, 0, &[patch("a", 1.0), patch("b", 2.0)]).unwrap();
        assert_eq!(b.source.dim(), (2, 2, 3, 3));
        assert_eq!(b.target.dim(), (2, 8, 3, 3));
        assert_eq!(b.target[[1, 7, 2, 2]], 2.0);
        assert_eq!(b.example_ids[1].as_str(), "b");
        assert_eq!(b.size_bytes(), (2 * 18 + 2 * 72) * 4);
    }

    #[test]
    fn mixed_shapes_are_rejected() {
        let mut odd = patch("b", 0.0);
        odd.source = Volume::zeros((2, 3, 4));
        assert!(Batch::from_patches(0, 0, &[patch("a", 0.0), odd]).is_err());
        assert!(Batch::from_patches(0, 0, &[]).is_err());
    }
}
