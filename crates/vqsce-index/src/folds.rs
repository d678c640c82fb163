//! Deterministic cross-validation folds.
//!
//! Example `i` (in index order) belongs to fold `i mod cv_folds`. No randomness
//! is involved, so the partition depends only on the index order and never on
//! any run seed or per-epoch shuffling.

use tracing::info;
use vqsce_core::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    /// Positions in index order.
    pub positions: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldPartition {
    len: usize,
    cv_folds: usize,
    fold: usize,
}

#[derive(Debug, Clone)]
pub struct DataSplit<T> {
    pub training: Vec<T>,
    pub validation: Vec<T>,
}

impl FoldPartition {
    pub fn new(len: usize, cv_folds: usize, fold: usize) -> Result<Self, ConfigError> {
        if cv_folds == 0 {
            return Err(ConfigError::NonPositive {
                field: "data.cv_folds",
            });
        }
        if fold >= cv_folds {
            return Err(ConfigError::FoldOutOfRange { fold, cv_folds });
        }
        if cv_folds > len {
            return Err(ConfigError::TooManyFolds {
                cv_folds,
                examples: len,
            });
        }
        Ok(Self {
            len,
            cv_folds,
            fold,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn cv_folds(&self) -> usize {
        self.cv_folds
    }

    pub fn fold(&self) -> usize {
        self.fold
    }

    pub fn fold_of(&self, position: usize) -> usize {
        position % self.cv_folds
    }

    pub fn assignments(&self) -> Vec<usize> {
        (0..self.len).map(|p| self.fold_of(p)).collect()
    }

    pub fn folds(&self) -> Vec<Fold> {
        let mut folds: Vec<Fold> = (0..self.cv_folds)
            .map(|index| Fold {
                index,
                positions: Vec::with_capacity(self.len / self.cv_folds + 1),
            })
            .collect();
        for p in 0..self.len {
            folds[self.fold_of(p)].positions.push(p);
        }
        folds
    }

    /// A single fold holds everything, so there is nothing to hold out.
    pub fn has_holdout(&self) -> bool {
        self.cv_folds > 1
    }

    /// Held-out positions. Without a holdout this is the whole set.
    pub fn validation_positions(&self) -> Vec<usize> {
        (0..self.len)
            .filter(|&p| !self.has_holdout() || self.fold_of(p) == self.fold)
            .collect()
    }

    /// Training positions. Without a holdout this is the whole set.
    pub fn training_positions(&self) -> Vec<usize> {
        (0..self.len)
            .filter(|&p| !self.has_holdout() || self.fold_of(p) != self.fold)
            .collect()
    }

    pub fn split<T: Clone>(&self, items: &[T]) -> Result<DataSplit<T>, ConfigError> {
        if items.len() != self.len {
            return Err(ConfigError::invalid(
                "data.cv_folds",
                format!(
                    "partition built for {} examples, got {}",
                    self.len,
                    items.len()
                ),
            ));
        }
        let pick = |positions: Vec<usize>| -> Vec<T> {
            positions.into_iter().map(|p| items[p].clone()).collect()
        };
        let split = DataSplit {
            training: pick(self.training_positions()),
            validation: pick(self.validation_positions()),
        };
        info!(
            cv_folds = self.cv_folds as u64,
            fold = self.fold as u64,
            training = split.training.len() as u64,
            validation = split.validation.len() as u64,
            holdout = self.has_holdout(),
            "fold partition"
        );
        Ok(split)
    }
}
