use ndarray::ArrayView2;
use vqsce_core::config::{BorderMode, InterpolationMode, PipelineConfig};
use vqsce_core::error::{AugmentationError, ConfigError};
use vqsce_core::types::{Dims3, TransformParameters, Volume};

use crate::affine::PixelMapping;

/// Input coordinates within this distance of an integer are treated as exact.
const SNAP_EPS: f64 = 1e-6;

/// How output pixels that map outside the input slice are filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BorderPolicy {
    Constant(f32),
    Reflect,
}

impl BorderPolicy {
    pub fn from_mode(mode: BorderMode, fill_value: f32) -> Self {
        match mode {
            BorderMode::Constant => BorderPolicy::Constant(fill_value),
            BorderMode::Reflect => BorderPolicy::Reflect,
        }
    }

    fn fill(&self) -> f32 {
        match self {
            BorderPolicy::Constant(v) => *v,
            BorderPolicy::Reflect => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Tap {
    Fill,
    Nearest {
        y: usize,
        x: usize,
    },
    Linear {
        y0: usize,
        y1: usize,
        x0: usize,
        x1: usize,
        fy: f32,
        fx: f32,
    },
}

impl Tap {
    fn sample(&self, src: &ArrayView2<'_, f32>, fill: f32) -> f32 {
        match *self {
            Tap::Fill => fill,
            Tap::Nearest { y, x } => src[[y, x]],
            Tap::Linear {
                y0,
                y1,
                x0,
                x1,
                fy,
                fx,
            } => {
                let top = (1.0 - fx) * src[[y0, x0]] + fx * src[[y0, x1]];
                let bottom = (1.0 - fx) * src[[y1, x0]] + fx * src[[y1, x1]];
                (1.0 - fy) * top + fy * bottom
            }
        }
    }
}

/// Summed-area table over the pixels whose pre-image fell inside the input.
#[derive(Debug, Clone)]
pub struct ValidityMap {
    height: usize,
    width: usize,
    sums: Vec<u32>,
}

impl ValidityMap {
    pub fn full(height: usize, width: usize) -> Self {
        Self::from_mask(height, width, |_, _| true)
    }

    pub fn from_mask(height: usize, width: usize, valid: impl Fn(usize, usize) -> bool) -> Self {
        let stride = width + 1;
        let mut sums = vec![0u32; (height + 1) * stride];
        for y in 0..height {
            let mut row = 0u32;
            for x in 0..width {
                row += u32::from(valid(y, x));
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self {
            height,
            width,
            sums,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of valid pixels in the `h x w` window at `(y, x)`, clipped to the map.
    pub fn count(&self, y: usize, x: usize, h: usize, w: usize) -> u64 {
        let y0 = y.min(self.height);
        let x0 = x.min(self.width);
        let y1 = y.saturating_add(h).min(self.height);
        let x1 = x.saturating_add(w).min(self.width);
        let stride = self.width + 1;
        let at = |yy: usize, xx: usize| u64::from(self.sums[yy * stride + xx]);
        (at(y1, x1) + at(y0, x0)).saturating_sub(at(y0, x1) + at(y1, x0))
    }

    /// Fraction of the `h x w` window at `(y, x)` that is valid.
    pub fn fraction(&self, y: usize, x: usize, h: usize, w: usize) -> f64 {
        let area = (h as u64).saturating_mul(w as u64);
        if area == 0 {
            return 0.0;
        }
        self.count(y, x, h, w) as f64 / area as f64
    }
}

/// Source and target after one shared in-plane transform.
#[derive(Debug, Clone)]
pub struct AugmentedPair {
    pub params: TransformParameters,
    pub source: Volume,
    pub target: Volume,
    pub validity: ValidityMap,
}

impl AugmentedPair {
    pub fn source_dims(&self) -> Dims3 {
        Dims3::of(&self.source)
    }

    pub fn target_dims(&self) -> Dims3 {
        Dims3::of(&self.target)
    }
}

/// Applies one transform to every slice of a source/target pair.
///
/// A single sampling plan is built per call and shared by both volumes, so a
/// pixel of the augmented source and the same `(y, x)` of the augmented target
/// always come from the same input location. Depth is never touched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentationEngine {
    border: BorderPolicy,
    interpolation: InterpolationMode,
    depth_ratio: usize,
}

impl AugmentationEngine {
    pub fn new(border: BorderPolicy, interpolation: InterpolationMode, depth_ratio: usize) -> Self {
        Self {
            border,
            interpolation,
            depth_ratio: depth_ratio.max(1),
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Result<Self, ConfigError> {
        let a = &cfg.augmentation;
        Ok(Self::new(
            BorderPolicy::from_mode(a.border, a.fill_value),
            a.interpolation,
            cfg.depth_ratio()?,
        ))
    }

    pub fn depth_ratio(&self) -> usize {
        self.depth_ratio
    }

    pub fn check_pair(&self, source: &Volume, target: &Volume) -> Result<(), AugmentationError> {
        let s = Dims3::of(source);
        let t = Dims3::of(target);
        if !s.same_plane(&t) {
            return Err(AugmentationError::ExtentMismatch {
                source_dims: s,
                target_dims: t,
            });
        }
        if t.depth != s.depth.saturating_mul(self.depth_ratio) {
            return Err(AugmentationError::DepthRatio {
                source_dims: s,
                target_dims: t,
                ratio: self.depth_ratio,
            });
        }
        Ok(())
    }

    pub fn apply(
        &self,
        params: &TransformParameters,
        source: &Volume,
        target: &Volume,
    ) -> Result<AugmentedPair, AugmentationError> {
        self.check_pair(source, target)?;
        let (_, height, width) = source.dim();

        if params.is_identity() {
            return Ok(AugmentedPair {
                params: *params,
                source: source.clone(),
                target: target.clone(),
                validity: ValidityMap::full(height, width),
            });
        }

        let mapping = PixelMapping::new(params, height, width)?;
        let (plan, inside) = self.plan(&mapping, height, width);
        let validity = ValidityMap::from_mask(height, width, |y, x| inside[y * width + x]);
        let fill = self.border.fill();

        Ok(AugmentedPair {
            params: *params,
            source: resample(&plan, fill, source),
            target: resample(&plan, fill, target),
            validity,
        })
    }

    fn plan(&self, mapping: &PixelMapping, height: usize, width: usize) -> (Vec<Tap>, Vec<bool>) {
        let mut taps = Vec::with_capacity(height * width);
        let mut inside = Vec::with_capacity(height * width);
        for y in 0..height {
            for x in 0..width {
                let (sy, sx) = mapping.source_coords(y, x);
                let (sy, sx) = (snap(sy), snap(sx));
                let in_y = within(sy, height);
                let in_x = within(sx, width);
                inside.push(in_y && in_x);

                let coords = match self.border {
                    BorderPolicy::Constant(_) if !(in_y && in_x) => None,
                    BorderPolicy::Constant(_) => Some((sy, sx)),
                    BorderPolicy::Reflect => Some((reflect(sy, height), reflect(sx, width))),
                };
                taps.push(match coords {
                    None => Tap::Fill,
                    Some((cy, cx)) => self.tap(cy, cx, height, width),
                });
            }
        }
        (taps, inside)
    }

    fn tap(&self, cy: f64, cx: f64, height: usize, width: usize) -> Tap {
        let cy = cy.clamp(0.0, (height - 1) as f64);
        let cx = cx.clamp(0.0, (width - 1) as f64);
        match self.interpolation {
            InterpolationMode::Nearest => Tap::Nearest {
                y: cy.round() as usize,
                x: cx.round() as usize,
            },
            InterpolationMode::Linear => {
                let y0 = cy.floor() as usize;
                let x0 = cx.floor() as usize;
                Tap::Linear {
                    y0,
                    y1: (y0 + 1).min(height - 1),
                    x0,
                    x1: (x0 + 1).min(width - 1),
                    fy: (cy - y0 as f64) as f32,
                    fx: (cx - x0 as f64) as f32,
                }
            }
        }
    }
}

fn snap(c: f64) -> f64 {
    let r = c.round();
    if (c - r).abs() < SNAP_EPS {
        r
    } else {
        c
    }
}

fn within(c: f64, n: usize) -> bool {
    c >= 0.0 && c <= (n as f64 - 1.0)
}

/// Mirrors `c` back into `[0, n - 1]` without repeating the edge pixel.
fn reflect(c: f64, n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let last = (n - 1) as f64;
    let period = 2.0 * last;
    let m = c.rem_euclid(period);
    if m > last {
        period - m
    } else {
        m
    }
}

fn resample(plan: &[Tap], fill: f32, volume: &Volume) -> Volume {
    let (depth, height, width) = volume.dim();
    let mut out = Volume::zeros((depth, height, width));
    for (src, mut dst) in volume.outer_iter().zip(out.outer_iter_mut()) {
        for ((y, x), v) in dst.indexed_iter_mut() {
            *v = plan[y * width + x].sample(&src, fill);
        }
    }
    out
}
