use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use ndarray::Array3;
use vqsce_core::config::IntensityWindow;
use vqsce_core::error::{ConfigError, DataError, VolumeRole};
use vqsce_core::types::Dims3;
use vqsce_index::{IndexSettings, LabelSet, Normaliser, NpyDecoder, VolumeIndex};

fn temp_root(test_name: &str) -> Result<PathBuf> {
    let mut root = std::env::temp_dir();
    root.push(format!(
        "vqsce-index-{test_name}-{}-{}",
        std::process::id(),
        vqsce_observe::time::unix_time_ms()
    ));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

fn write_volume(path: &Path, dims: (usize, usize, usize), base: f32) -> Result<()> {
    let v = Array3::<f32>::from_shape_fn(dims, |(d, y, x)| base + (d * 100 + y * 10 + x) as f32);
    ndarray_npy::write_npy(path, &v)?;
    Ok(())
}

fn settings(root: PathBuf) -> IndexSettings {
    IndexSettings {
        root,
        labels: LabelSet {
            source: vec!["LQ".to_string()],
            target: vec!["HQ".to_string()],
        },
        source_dims: Dims3::new(3, 4, 5),
        target_dims: Dims3::new(12, 4, 5),
        down_sample: 1,
        num_examples: None,
        normaliser: None,
    }
}

#[test]
fn pairs_by_identifier_in_lexicographic_order() -> Result<()> {
    let root = temp_root("pairs")?;
    for id in ["C", "A", "B"] {
        write_volume(&root.join(format!("{id}LQ01.npy")), (3, 4, 5), 0.0)?;
        write_volume(&root.join(format!("{id}HQ01.npy")), (12, 4, 5), 0.0)?;
    }
    // orphan source and an unrelated file
    write_volume(&root.join("DLQ01.npy"), (3, 4, 5), 0.0)?;
    std::fs::write(root.join("README.txt"), b"not a volume")?;

    let index = VolumeIndex::scan(settings(root), Arc::new(NpyDecoder))?;
    let ids: Vec<&str> = index.pairs().iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["A01", "B01", "C01"]);
    assert_eq!(
        index.rejected(),
        &[DataError::MissingPartner {
            id: "D01".to_string(),
            role: VolumeRole::Source
        }]
    );
    Ok(())
}

#[test]
fn num_examples_caps_in_stable_order_and_iteration_restarts() -> Result<()> {
    let root = temp_root("cap")?;
    for id in ["E", "D", "C", "B", "A"] {
        write_volume(&root.join(format!("{id}LQ.npy")), (3, 4, 5), 0.0)?;
        write_volume(&root.join(format!("{id}HQ.npy")), (12, 4, 5), 0.0)?;
    }
    let mut s = settings(root);
    s.num_examples = Some(2);
    let index = VolumeIndex::scan(s, Arc::new(NpyDecoder))?;
    assert_eq!(index.len(), 2);

    let first: Vec<String> = index
        .iter()
        .map(|r| r.map(|e| e.id.to_string()))
        .collect::<Result<_, _>>()?;
    let second: Vec<String> = index
        .iter()
        .map(|r| r.map(|e| e.id.to_string()))
        .collect::<Result<_, _>>()?;
    assert_eq!(first, vec!["A", "B"]);
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn dimension_mismatch_excludes_only_that_example() -> Result<()> {
    let root = temp_root("dims")?;
    write_volume(&root.join("ALQ.npy"), (3, 4, 5), 0.0)?;
    write_volume(&root.join("AHQ.npy"), (12, 4, 5), 0.0)?;
    write_volume(&root.join("BLQ.npy"), (3, 4, 6), 0.0)?;
    write_volume(&root.join("BHQ.npy"), (12, 4, 6), 0.0)?;

    let index = VolumeIndex::scan(settings(root), Arc::new(NpyDecoder))?;
    assert_eq!(index.len(), 2);

    let results: Vec<_> = index.iter().collect();
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(DataError::DimensionMismatch {
            role: VolumeRole::Source,
            ..
        })
    ));

    let loaded = index.load()?;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id.as_str(), "A");
    Ok(())
}

#[test]
fn down_sample_and_normalisation_apply_at_load() -> Result<()> {
    let root = temp_root("stride")?;
    write_volume(&root.join("ALQ.npy"), (3, 4, 5), 0.0)?;
    write_volume(&root.join("AHQ.npy"), (12, 4, 5), 0.0)?;

    let mut s = settings(root);
    s.source_dims = Dims3::new(3, 4, 5);
    s.down_sample = 3;
    s.normaliser = Some(Normaliser::new(IntensityWindow {
        min: 0.0,
        max: 2000.0,
    }));
    let index = VolumeIndex::scan(s, Arc::new(NpyDecoder))?;
    let ex = index.load_pair(&index.pairs()[0])?;
    assert_eq!(ex.source_dims(), Dims3::new(1, 4, 5));
    assert_eq!(ex.target_dims(), Dims3::new(4, 4, 5));
    // target slice 3 originally held 300 + y*10 + x
    assert!((ex.target[[1, 0, 0]] - (2.0 * 300.0 / 2000.0 - 1.0)).abs() < 1e-6);
    Ok(())
}

#[test]
fn empty_storage_is_a_config_error() -> Result<()> {
    let root = temp_root("empty")?;
    let err = VolumeIndex::scan(settings(root.clone()), Arc::new(NpyDecoder)).unwrap_err();
    assert_eq!(err, ConfigError::NoExamples { root });
    Ok(())
}

#[test]
fn int16_volumes_load_as_float() -> Result<()> {
    let root = temp_root("int16")?;
    ndarray_npy::write_npy(root.join("ALQ.npy"), &Array3::<i16>::from_elem((3, 4, 5), -1000))?;
    ndarray_npy::write_npy(root.join("AHQ.npy"), &Array3::<i16>::from_elem((12, 4, 5), 1000))?;

    let index = VolumeIndex::scan(settings(root), Arc::new(NpyDecoder))?;
    let loaded = index.load()?;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].source_dims(), Dims3::new(3, 4, 5));
    assert!(loaded[0].source.iter().all(|&v| v == -1000.0));
    assert!(loaded[0].target.iter().all(|&v| v == 1000.0));
    Ok(())
}
