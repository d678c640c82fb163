use std::path::PathBuf;
use std::sync::Arc;

use ndarray::s;
use tracing::{info, warn};
use vqsce_core::config::PipelineConfig;
use vqsce_core::error::{ConfigError, DataError, VolumeRole};
use vqsce_core::types::{Dims3, Volume, VolumeExample};

use crate::decode::VolumeDecoder;
use crate::normalise::Normaliser;
use crate::scan::{scan_pairs, LabelSet, VolumePair};

/// The slice of configuration the index needs.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub root: PathBuf,
    pub labels: LabelSet,
    /// Full-resolution dims expected from the decoder.
    pub source_dims: Dims3,
    pub target_dims: Dims3,
    pub down_sample: usize,
    pub num_examples: Option<usize>,
    pub normaliser: Option<Normaliser>,
}

impl IndexSettings {
    /// Scans `data_path/image_dir` when it exists, otherwise `data_path`.
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        let nested = cfg.data.data_path.join(&cfg.data.image_dir);
        let root = if !cfg.data.image_dir.is_empty() && nested.is_dir() {
            nested
        } else {
            cfg.data.data_path.clone()
        };
        Self {
            root,
            labels: LabelSet {
                source: cfg.data.source.clone(),
                target: cfg.data.target.clone(),
            },
            source_dims: cfg.augmentation.source_dims,
            target_dims: cfg.augmentation.target_dims,
            down_sample: cfg.data.down_sample.max(1),
            num_examples: cfg.data.num_examples,
            normaliser: cfg.data.normalisation.map(Normaliser::new),
        }
    }
}

/// Ordered, restartable index of matched volume pairs.
///
/// Scanning only touches file names; volumes are decoded lazily by
/// [`VolumeIndex::iter`], so iterating twice re-reads storage and yields the
/// same order.
pub struct VolumeIndex {
    settings: IndexSettings,
    decoder: Arc<dyn VolumeDecoder>,
    pairs: Vec<VolumePair>,
    rejected: Vec<DataError>,
}

impl std::fmt::Debug for VolumeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeIndex")
            .field("root", &self.settings.root)
            .field("pairs", &self.pairs.len())
            .field("rejected", &self.rejected.len())
            .finish()
    }
}

impl VolumeIndex {
    pub fn scan(
        settings: IndexSettings,
        decoder: Arc<dyn VolumeDecoder>,
    ) -> Result<Self, ConfigError> {
        let outcome = scan_pairs(&settings.root, &settings.labels, |p| decoder.accepts(p))
            .map_err(|e| {
                ConfigError::invalid(
                    "data.data_path",
                    format!("{}: {e}", settings.root.display()),
                )
            })?;

        for err in &outcome.rejected {
            warn!(root = %settings.root.display(), error = %err, "excluding volume");
        }

        let found = outcome.pairs.len();
        let mut pairs = outcome.pairs;
        if let Some(cap) = settings.num_examples {
            pairs.truncate(cap);
        }
        if pairs.is_empty() {
            return Err(ConfigError::NoExamples {
                root: settings.root.clone(),
            });
        }

        info!(
            root = %settings.root.display(),
            pairs = pairs.len() as u64,
            found = found as u64,
            rejected = outcome.rejected.len() as u64,
            "indexed volume pairs"
        );

        Ok(Self {
            settings,
            decoder,
            pairs,
            rejected: outcome.rejected,
        })
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn pairs(&self) -> &[VolumePair] {
        &self.pairs
    }

    pub fn rejected(&self) -> &[DataError] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> VolumeIter<'_> {
        VolumeIter {
            index: self,
            next: 0,
        }
    }

    /// Decodes, checks, normalises and strides one pair.
    pub fn load_pair(&self, pair: &VolumePair) -> Result<VolumeExample, DataError> {
        let source = self.load_volume(pair, VolumeRole::Source)?;
        let target = self.load_volume(pair, VolumeRole::Target)?;
        Ok(VolumeExample {
            id: pair.id.clone(),
            source,
            target,
        })
    }

    fn load_volume(&self, pair: &VolumePair, role: VolumeRole) -> Result<Volume, DataError> {
        let (path, expected) = match role {
            VolumeRole::Source => (&pair.source, self.settings.source_dims),
            VolumeRole::Target => (&pair.target, self.settings.target_dims),
        };
        let mut volume = self.decoder.decode(path)?;
        let actual = Dims3::of(&volume);
        if actual != expected {
            return Err(DataError::DimensionMismatch {
                id: pair.id.to_string(),
                role,
                expected,
                actual,
            });
        }
        if let Some(n) = &self.settings.normaliser {
            n.normalise_in_place(&mut volume);
        }
        Ok(stride_depth(volume, self.settings.down_sample))
    }

    /// Decodes every pair, excluding the ones that fail.
    ///
    /// Escalates to [`ConfigError::NoExamples`] when nothing survives.
    pub fn load(&self) -> Result<Vec<Arc<VolumeExample>>, ConfigError> {
        let mut examples = Vec::with_capacity(self.pairs.len());
        let mut failed: u64 = 0;
        for (pair, res) in self.pairs.iter().zip(self.iter()) {
            match res {
                Ok(ex) => examples.push(Arc::new(ex)),
                Err(err) => {
                    failed += 1;
                    warn!(example_id = %pair.id, error = %err, "excluding example");
                }
            }
        }
        if examples.is_empty() {
            return Err(ConfigError::NoExamples {
                root: self.settings.root.clone(),
            });
        }
        info!(
            root = %self.settings.root.display(),
            loaded = examples.len() as u64,
            failed = failed,
            "loaded volume pairs"
        );
        Ok(examples)
    }
}

/// Lazy decoding iterator over a [`VolumeIndex`].
pub struct VolumeIter<'a> {
    index: &'a VolumeIndex,
    next: usize,
}

impl Iterator for VolumeIter<'_> {
    type Item = Result<VolumeExample, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        let pair = self.index.pairs.get(self.next)?;
        self.next += 1;
        Some(self.index.load_pair(pair))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.index.pairs.len().saturating_sub(self.next);
        (rem, Some(rem))
    }
}

impl ExactSizeIterator for VolumeIter<'_> {}

/// Keeps every `stride`-th depth slice, starting at slice 0.
pub fn stride_depth(volume: Volume, stride: usize) -> Volume {
    if stride <= 1 {
        return volume;
    }
    let step = isize::try_from(stride).unwrap_or(isize::MAX);
    volume.slice(s![..;step, .., ..]).to_owned()
}
