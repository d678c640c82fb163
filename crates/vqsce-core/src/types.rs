use std::fmt;
use std::sync::Arc;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Decoded volume, laid out as `[depth, height, width]`.
pub type Volume = Array3<f32>;

/// Stable identifier shared by a source volume and its target counterpart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExampleId(pub Arc<str>);

impl ExampleId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `[depth, height, width]` extent of a volume or patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 3]", into = "[usize; 3]")]
pub struct Dims3 {
    pub depth: usize,
    pub height: usize,
    pub width: usize,
}

impl Dims3 {
    pub const fn new(depth: usize, height: usize, width: usize) -> Self {
        Self {
            depth,
            height,
            width,
        }
    }

    pub fn of(volume: &Volume) -> Self {
        let (depth, height, width) = volume.dim();
        Self::new(depth, height, width)
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.depth, self.height, self.width]
    }

    pub fn voxels(&self) -> usize {
        self.depth
            .saturating_mul(self.height)
            .saturating_mul(self.width)
    }

    pub fn is_positive(&self) -> bool {
        self.depth > 0 && self.height > 0 && self.width > 0
    }

    pub fn same_plane(&self, other: &Dims3) -> bool {
        self.height == other.height && self.width == other.width
    }

    /// Whether a patch of these dims fits inside `outer` on every axis.
    pub fn fits_within(&self, outer: &Dims3) -> bool {
        self.depth <= outer.depth && self.height <= outer.height && self.width <= outer.width
    }
}

impl From<[usize; 3]> for Dims3 {
    fn from(v: [usize; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Dims3> for [usize; 3] {
    fn from(d: Dims3) -> Self {
        d.as_array()
    }
}

impl fmt::Display for Dims3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.depth, self.height, self.width)
    }
}

/// A matched source/target volume pair, immutable once indexed.
///
/// Invariants:
/// - `target.depth == depth_ratio * source.depth`
/// - source and target share height and width
#[derive(Debug, Clone)]
pub struct VolumeExample {
    pub id: ExampleId,
    pub source: Volume,
    pub target: Volume,
}

impl VolumeExample {
    pub fn source_dims(&self) -> Dims3 {
        Dims3::of(&self.source)
    }

    pub fn target_dims(&self) -> Dims3 {
        Dims3::of(&self.target)
    }

    /// Target/source depth ratio, or `None` when the pair breaks the invariant.
    pub fn depth_ratio(&self) -> Option<usize> {
        let s = self.source_dims();
        let t = self.target_dims();
        if s.depth == 0 || t.depth % s.depth != 0 || !s.same_plane(&t) {
            return None;
        }
        Some(t.depth / s.depth)
    }

    pub fn size_bytes(&self) -> u64 {
        let voxels = self.source.len().saturating_add(self.target.len());
        (voxels as u64).saturating_mul(std::mem::size_of::<f32>() as u64)
    }
}

/// Parameters of one 2-D augmentation draw. Angles are in degrees and
/// translations are fractions of the in-plane extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformParameters {
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub rotation_deg: f64,
    pub scale: f64,
    pub shear_deg: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl TransformParameters {
    pub const IDENTITY: Self = Self {
        flip_horizontal: false,
        flip_vertical: false,
        rotation_deg: 0.0,
        scale: 1.0,
        shear_deg: 0.0,
        translate_x: 0.0,
        translate_y: 0.0,
    };

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for TransformParameters {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Where a patch was cut from. `depth` is the source slice offset; the target
/// offset is `depth * depth_ratio`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchOrigin {
    pub depth: usize,
    pub y: usize,
    pub x: usize,
}

/// Matched source/target sub-volumes cut from one augmented example.
#[derive(Debug, Clone)]
pub struct Patch {
    pub example_id: ExampleId,
    pub origin: PatchOrigin,
    pub source: Volume,
    pub target: Volume,
}

impl Patch {
    pub fn source_dims(&self) -> Dims3 {
        Dims3::of(&self.source)
    }

    pub fn target_dims(&self) -> Dims3 {
        Dims3::of(&self.target)
    }

    pub fn size_bytes(&self) -> u64 {
        let voxels = self.source.len().saturating_add(self.target.len());
        (voxels as u64).saturating_mul(std::mem::size_of::<f32>() as u64)
    }
}
