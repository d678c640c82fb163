use std::collections::BTreeSet;

use vqsce_core::error::ConfigError;
use vqsce_index::FoldPartition;

#[test]
fn four_examples_three_folds() {
    let p = FoldPartition::new(4, 3, 2).unwrap();
    assert_eq!(p.assignments(), vec![0, 1, 2, 0]);
    assert_eq!(p.validation_positions(), vec![2]);
    assert_eq!(p.training_positions(), vec![0, 1, 3]);
    assert!(p.has_holdout());
}

#[test]
fn folds_partition_every_size() {
    for n in 1..40usize {
        for k in 1..=n.min(8) {
            let p = FoldPartition::new(n, k, 0).unwrap();
            let folds = p.folds();
            assert_eq!(folds.len(), k);

            let mut seen = BTreeSet::new();
            let mut total = 0usize;
            for f in &folds {
                total += f.positions.len();
                for &pos in &f.positions {
                    assert!(seen.insert(pos), "position {pos} assigned twice (n={n}, k={k})");
                }
                // |fold| differs from n/k by at most one.
                let size = f.positions.len() as f64;
                let ideal = n as f64 / k as f64;
                assert!((size - ideal).abs() <= 1.0, "n={n} k={k} size={size}");
            }
            assert_eq!(total, n);
            assert_eq!(seen, (0..n).collect::<BTreeSet<_>>());
        }
    }
}

#[test]
fn fold_must_be_in_range() {
    assert!(FoldPartition::new(9, 3, 2).is_ok());
    assert_eq!(
        FoldPartition::new(9, 3, 3),
        Err(ConfigError::FoldOutOfRange {
            fold: 3,
            cv_folds: 3
        })
    );
}

#[test]
fn more_folds_than_examples_is_rejected() {
    assert_eq!(
        FoldPartition::new(2, 3, 0),
        Err(ConfigError::TooManyFolds {
            cv_folds: 3,
            examples: 2
        })
    );
}

#[test]
fn single_fold_trains_and_evaluates_on_everything() {
    let p = FoldPartition::new(5, 1, 0).unwrap();
    assert!(!p.has_holdout());
    assert_eq!(p.training_positions(), vec![0, 1, 2, 3, 4]);
    assert_eq!(p.validation_positions(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn split_keeps_index_order() {
    let p = FoldPartition::new(4, 3, 2).unwrap();
    let ids = vec!["a", "b", "c", "d"];
    let split = p.split(&ids).unwrap();
    assert_eq!(split.training, vec!["a", "b", "d"]);
    assert_eq!(split.validation, vec!["c"]);

    assert!(p.split(&ids[..3]).is_err());
}
