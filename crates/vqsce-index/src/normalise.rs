use vqsce_core::config::IntensityWindow;
use vqsce_core::types::Volume;

/// Maps an intensity window `[min, max]` onto `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normaliser {
    min: f32,
    max: f32,
}

impl Normaliser {
    pub fn new(window: IntensityWindow) -> Self {
        Self {
            min: window.min,
            max: window.max,
        }
    }

    fn range(&self) -> f32 {
        self.max - self.min
    }

    pub fn normalise_value(&self, v: f32) -> f32 {
        2.0 * (v - self.min) / self.range() - 1.0
    }

    pub fn un_normalise_value(&self, v: f32) -> f32 {
        (v + 1.0) / 2.0 * self.range() + self.min
    }

    pub fn normalise_in_place(&self, volume: &mut Volume) {
        volume.mapv_inplace(|v| self.normalise_value(v));
    }

    pub fn un_normalise(&self, volume: &Volume) -> Volume {
        volume.mapv(|v| self.un_normalise_value(v))
    }
}
