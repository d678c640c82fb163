use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use vqsce_core::error::{DataError, VolumeRole};
use vqsce_core::types::ExampleId;

/// Label tokens that mark a file as a source or target volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    pub source: Vec<String>,
    pub target: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePair {
    pub id: ExampleId,
    pub source: PathBuf,
    pub target: PathBuf,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Complete pairs in identifier order.
    pub pairs: Vec<VolumePair>,
    pub rejected: Vec<DataError>,
}

#[derive(Debug, PartialEq, Eq)]
enum Classified {
    Unlabelled,
    Ambiguous,
    Labelled { role: VolumeRole, key: String },
}

#[derive(Debug, Default)]
struct Slot {
    source: Option<PathBuf>,
    target: Option<PathBuf>,
}

fn with_path(err: std::io::Error, path: &Path) -> std::io::Error {
    std::io::Error::new(err.kind(), format!("{}: {err}", path.display()))
}

/// Recursively lists regular files under `root`, sorted by relative path.
pub(crate) fn walk_files(root: &Path) -> std::io::Result<Vec<(PathBuf, String)>> {
    let mut out: Vec<(PathBuf, String)> = Vec::new();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).map_err(|e| with_path(e, &dir))? {
            let entry = entry.map_err(|e| with_path(e, &dir))?;
            let path = entry.path();
            let meta = entry.metadata().map_err(|e| with_path(e, &path))?;
            if meta.is_dir() {
                stack.push(path);
            } else if meta.is_file() {
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                out.push((path, rel));
            }
        }
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(out)
}

/// Splits `dir/stem.ext` into (`dir/`, `stem`).
fn split_rel(rel: &str) -> (&str, &str) {
    let (dir, name) = match rel.rfind('/') {
        Some(i) => rel.split_at(i + 1),
        None => ("", rel),
    };
    let stem = match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    };
    (dir, stem)
}

fn first_match<'a>(stem: &str, labels: &'a [String]) -> Option<&'a str> {
    labels
        .iter()
        .map(String::as_str)
        .find(|l| !l.is_empty() && stem.contains(l))
}

fn classify(rel: &str, labels: &LabelSet) -> Classified {
    let (dir, stem) = split_rel(rel);
    let src = first_match(stem, &labels.source);
    let tgt = first_match(stem, &labels.target);
    let (role, label) = match (src, tgt) {
        (Some(_), Some(_)) => return Classified::Ambiguous,
        (Some(l), None) => (VolumeRole::Source, l),
        (None, Some(l)) => (VolumeRole::Target, l),
        (None, None) => return Classified::Unlabelled,
    };
    let key = format!("{dir}{}", stem.replacen(label, "", 1));
    Classified::Labelled { role, key }
}

/// Pairs source and target files under `root` by shared identifier.
///
/// Files rejected by `accepts` are ignored. Incomplete, duplicate and
/// ambiguous entries are reported in [`ScanOutcome::rejected`] and never abort
/// the scan.
pub fn scan_pairs(
    root: &Path,
    labels: &LabelSet,
    accepts: impl Fn(&Path) -> bool,
) -> std::io::Result<ScanOutcome> {
    let mut slots: BTreeMap<String, Slot> = BTreeMap::new();
    let mut rejected = Vec::new();

    for (path, rel) in walk_files(root)? {
        if !accepts(&path) {
            continue;
        }
        match classify(&rel, labels) {
            Classified::Unlabelled => {
                tracing::debug!(path = %path.display(), "skipping unlabelled file");
            }
            Classified::Ambiguous => rejected.push(DataError::AmbiguousLabel { path }),
            Classified::Labelled { role, key } => {
                let slot = slots.entry(key.clone()).or_default();
                let cell = match role {
                    VolumeRole::Source => &mut slot.source,
                    VolumeRole::Target => &mut slot.target,
                };
                if cell.is_some() {
                    rejected.push(DataError::Duplicate {
                        id: key,
                        role,
                        path,
                    });
                } else {
                    *cell = Some(path);
                }
            }
        }
    }

    let mut pairs = Vec::with_capacity(slots.len());
    for (key, slot) in slots {
        match (slot.source, slot.target) {
            (Some(source), Some(target)) => pairs.push(VolumePair {
                id: ExampleId::new(&key),
                source,
                target,
            }),
            (Some(_), None) => rejected.push(DataError::MissingPartner {
                id: key,
                role: VolumeRole::Source,
            }),
            (None, Some(_)) => rejected.push(DataError::MissingPartner {
                id: key,
                role: VolumeRole::Target,
            }),
            (None, None) => {}
        }
    }

    Ok(ScanOutcome { pairs, rejected })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelSet {
        LabelSet {
            source: vec!["LQ".to_string()],
            target: vec!["HQ".to_string()],
        }
    }

    #[test]
    fn classify_strips_label_from_stem_only() {
        assert_eq!(
            classify("T065A0LQ001.npy", &labels()),
            Classified::Labelled {
                role: VolumeRole::Source,
                key: "T065A0001".to_string()
            }
        );
        assert_eq!(
            classify("HQ/T065A0HQ001.npy", &labels()),
            Classified::Labelled {
                role: VolumeRole::Target,
                key: "HQ/T065A0001".to_string()
            }
        );
    }

    #[test]
    fn walk_errors_name_the_failing_directory() {
        let missing = std::env::temp_dir().join(format!("vqsce-missing-{}", std::process::id()));
        let err = walk_files(&missing).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        assert!(err.to_string().contains(&missing.display().to_string()));
    }

    #[test]
    fn classify_flags_ambiguous_and_unlabelled() {
        assert_eq!(classify("xLQyHQ.npy", &labels()), Classified::Ambiguous);
        assert_eq!(classify("notes.npy", &labels()), Classified::Unlabelled);
    }

    #[test]
    fn split_rel_keeps_hidden_files_whole() {
        assert_eq!(split_rel("a/b/.npy"), ("a/b/", ".npy"));
        assert_eq!(split_rel("c.tar.npy"), ("", "c.tar"));
    }
}
