//! Homogeneous 2-D affine matrices for in-plane augmentation.
//!
//! Coordinates are `(x, y)` with `x` along width and `y` along height. The
//! normalised frame is centred on the slice centre and scaled isotropically by
//! half the larger extent, so rotations stay rigid on non-square slices.

use nalgebra::Matrix3;
use vqsce_core::error::AugmentationError;
use vqsce_core::types::TransformParameters;

fn flip(horizontal: bool, vertical: bool) -> Matrix3<f64> {
    let fx = if horizontal { -1.0 } else { 1.0 };
    let fy = if vertical { -1.0 } else { 1.0 };
    Matrix3::new(fx, 0.0, 0.0, 0.0, fy, 0.0, 0.0, 0.0, 1.0)
}

fn scale(s: f64) -> Matrix3<f64> {
    Matrix3::new(s, 0.0, 0.0, 0.0, s, 0.0, 0.0, 0.0, 1.0)
}

fn rotation(deg: f64) -> Matrix3<f64> {
    let (sin, cos) = deg.to_radians().sin_cos();
    Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0)
}

fn shear(deg: f64) -> Matrix3<f64> {
    let k = deg.to_radians().tan();
    Matrix3::new(1.0, k, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0)
}

fn translation(tx: f64, ty: f64) -> Matrix3<f64> {
    Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0)
}

/// Pixel to normalised frame for a `height x width` slice.
fn to_normalised(height: usize, width: usize) -> Matrix3<f64> {
    let half = half_extent(height, width);
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    Matrix3::new(
        1.0 / half,
        0.0,
        -cx / half,
        0.0,
        1.0 / half,
        -cy / half,
        0.0,
        0.0,
        1.0,
    )
}

fn from_normalised(height: usize, width: usize) -> Matrix3<f64> {
    let half = half_extent(height, width);
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    Matrix3::new(half, 0.0, cx, 0.0, half, cy, 0.0, 0.0, 1.0)
}

fn half_extent(height: usize, width: usize) -> f64 {
    (height.max(width).max(1) as f64) / 2.0
}

/// Forward transform in the normalised frame.
///
/// Applied to a point in order flip, scale, rotation, shear, translate.
pub fn forward_matrix(params: &TransformParameters, height: usize, width: usize) -> Matrix3<f64> {
    let half = half_extent(height, width);
    let tx = params.translate_x * width as f64 / half;
    let ty = params.translate_y * height as f64 / half;
    translation(tx, ty)
        * shear(params.shear_deg)
        * rotation(params.rotation_deg)
        * scale(params.scale)
        * flip(params.flip_horizontal, params.flip_vertical)
}

/// Maps every output pixel back to the input pixel it samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelMapping {
    inverse: Matrix3<f64>,
}

impl PixelMapping {
    pub fn new(
        params: &TransformParameters,
        height: usize,
        width: usize,
    ) -> Result<Self, AugmentationError> {
        let forward = forward_matrix(params, height, width);
        let inverse = forward.try_inverse().ok_or(AugmentationError::Singular)?;
        Ok(Self {
            inverse: from_normalised(height, width) * inverse * to_normalised(height, width),
        })
    }

    pub fn identity() -> Self {
        Self {
            inverse: Matrix3::identity(),
        }
    }

    /// Input `(y, x)` sampled by output pixel `(y, x)`.
    pub fn source_coords(&self, y: usize, x: usize) -> (f64, f64) {
        let m = &self.inverse;
        let (xf, yf) = (x as f64, y as f64);
        let sx = m[(0, 0)] * xf + m[(0, 1)] * yf + m[(0, 2)];
        let sy = m[(1, 0)] * xf + m[(1, 1)] * yf + m[(1, 2)];
        (sy, sx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f64, f64), b: (f64, f64)) -> bool {
        (a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9
    }

    #[test]
    fn identity_maps_pixels_to_themselves() {
        let m = PixelMapping::new(&TransformParameters::IDENTITY, 7, 9).unwrap();
        for (y, x) in [(0, 0), (3, 4), (6, 8)] {
            assert!(close(m.source_coords(y, x), (y as f64, x as f64)));
        }
    }

    #[test]
    fn horizontal_flip_mirrors_columns() {
        let p = TransformParameters {
            flip_horizontal: true,
            ..TransformParameters::IDENTITY
        };
        let m = PixelMapping::new(&p, 4, 6).unwrap();
        assert!(close(m.source_coords(1, 0), (1.0, 5.0)));
        assert!(close(m.source_coords(3, 2), (3.0, 3.0)));
    }

    #[test]
    fn quarter_turn_about_centre() {
        let p = TransformParameters {
            rotation_deg: 90.0,
            ..TransformParameters::IDENTITY
        };
        // 5x5: centre (2, 2). Forward rotation sends (x, y) offsets (1, 0) to (0, 1),
        // so output (y=3, x=2) samples input (y=2, x=3).
        let m = PixelMapping::new(&p, 5, 5).unwrap();
        assert!(close(m.source_coords(3, 2), (2.0, 3.0)));
        assert!(close(m.source_coords(2, 2), (2.0, 2.0)));
    }

    #[test]
    fn translation_is_a_fraction_of_extent() {
        let p = TransformParameters {
            translate_x: 0.25,
            ..TransformParameters::IDENTITY
        };
        // 8 wide: shift by 2 pixels, so output x samples input x - 2.
        let m = PixelMapping::new(&p, 4, 8).unwrap();
        assert!(close(m.source_coords(1, 5), (1.0, 3.0)));
    }

    #[test]
    fn scale_zooms_about_centre() {
        let p = TransformParameters {
            scale: 2.0,
            ..TransformParameters::IDENTITY
        };
        let m = PixelMapping::new(&p, 5, 5).unwrap();
        assert!(close(m.source_coords(4, 4), (3.0, 3.0)));
    }

    #[test]
    fn zero_scale_is_singular() {
        let p = TransformParameters {
            scale: 0.0,
            ..TransformParameters::IDENTITY
        };
        assert_eq!(PixelMapping::new(&p, 4, 4), Err(AugmentationError::Singular));
    }
}
