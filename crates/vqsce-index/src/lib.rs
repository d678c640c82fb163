#![deny(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod decode;
pub mod folds;
pub mod index;
pub mod normalise;
pub mod scan;

pub use decode::{NpyDecoder, VolumeDecoder};
pub use folds::{DataSplit, Fold, FoldPartition};
pub use index::{IndexSettings, VolumeIndex, VolumeIter};
pub use normalise::Normaliser;
pub use scan::{LabelSet, ScanOutcome, VolumePair};
