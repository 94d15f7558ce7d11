//! Mapping of raw slice intensities to display bytes.

use ndarray::{Array2, ArrayView2};

/// Gray value used for planes with no intensity range.
pub const FLAT_GRAY: u8 = 128;

/// Window/level and brightness/contrast applied after normalisation. All
/// values are in the 0–255 normalised domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowParams {
    pub width: f32,
    pub level: f32,
    pub brightness: f32,
    pub contrast: f32,
}

impl WindowParams {
    /// Parameters that leave a normalised plane unchanged.
    pub const IDENTITY: WindowParams = WindowParams {
        width: 255.0,
        level: 127.5,
        brightness: 0.0,
        contrast: 1.0,
    };
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            width: 200.0,
            level: 100.0,
            brightness: 0.0,
            contrast: 1.0,
        }
    }
}

/// Scale a plane linearly from its own `[min, max]` to `[0, 255]`.
pub fn normalize(plane: ArrayView2<'_, f32>) -> Array2<u8> {
    if plane.is_empty() {
        return Array2::zeros(plane.raw_dim());
    }
    let min = plane.iter().copied().fold(f32::INFINITY, f32::min);
    let max = plane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range <= 0.0 || !range.is_finite() {
        return Array2::from_elem(plane.raw_dim(), FLAT_GRAY);
    }
    plane.mapv(|v| (((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// Apply window/level, then brightness/contrast, to normalised bytes.
pub fn apply_window(bytes: ArrayView2<'_, u8>, params: &WindowParams) -> Array2<u8> {
    let lo = params.level - params.width / 2.0;
    let hi = params.level + params.width / 2.0;
    bytes.mapv(|b| {
        let v = f32::from(b);
        let windowed = if v <= lo {
            0.0
        } else if v >= hi {
            255.0
        } else {
            (v - lo) / params.width * 255.0
        };
        let adjusted = (windowed - 128.0) * params.contrast + 128.0 + params.brightness;
        adjusted.round().clamp(0.0, 255.0) as u8
    })
}

/// Normalise then window a raw plane. Re-run on every redraw.
pub fn map_slice(plane: ArrayView2<'_, f32>, params: &WindowParams) -> Array2<u8> {
    apply_window(normalize(plane).view(), params)
}

/// Summary statistics of a set of intensities.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IntensityStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl IntensityStats {
    pub(crate) fn accumulator() -> StatsAccumulator {
        StatsAccumulator::default()
    }

    /// Statistics over a raw plane.
    pub fn of_plane(plane: ArrayView2<'_, f32>) -> Self {
        let mut acc = Self::accumulator();
        plane.iter().for_each(|&v| acc.push(f64::from(v)));
        acc.finish()
    }
}

/// Single-pass mean/variance (Welford).
#[derive(Debug, Default)]
pub(crate) struct StatsAccumulator {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl StatsAccumulator {
    pub(crate) fn push(&mut self, v: f64) {
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.count += 1;
        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (v - self.mean);
    }

    pub(crate) fn finish(self) -> IntensityStats {
        if self.count == 0 {
            return IntensityStats::default();
        }
        IntensityStats {
            min: self.min,
            max: self.max,
            mean: self.mean,
            std: (self.m2 / self.count as f64).sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr2, Array2};

    #[test]
    fn constant_plane_is_mid_gray() {
        let plane = Array2::from_elem((3, 4), 42.0f32);
        let out = normalize(plane.view());
        assert!(out.iter().all(|&v| v == FLAT_GRAY));
    }

    #[test]
    fn normalize_spans_full_range() {
        let plane = arr2(&[[-100.0f32, 0.0], [50.0, 100.0]]);
        let out = normalize(plane.view());
        assert_eq!(out, arr2(&[[0u8, 128], [191, 255]]));
    }

    #[test]
    fn identity_window_reproduces_input() {
        let bytes = Array2::from_shape_vec((16, 16), (0..=255u8).collect()).unwrap();
        let out = apply_window(bytes.view(), &WindowParams::IDENTITY);
        for (a, b) in bytes.iter().zip(out.iter()) {
            assert!((i16::from(*a) - i16::from(*b)).abs() <= 1, "{a} -> {b}");
        }
    }

    #[test]
    fn window_clips_outside_range() {
        let bytes = arr2(&[[10u8, 100, 190]]);
        let params = WindowParams {
            width: 100.0,
            level: 100.0,
            ..WindowParams::IDENTITY
        };
        let out = apply_window(bytes.view(), &params);
        assert_eq!(out, arr2(&[[0u8, 128, 255]]));
    }

    #[test]
    fn brightness_and_contrast_clamp() {
        let bytes = arr2(&[[0u8, 128, 255]]);
        let params = WindowParams {
            brightness: 100.0,
            contrast: 2.0,
            ..WindowParams::IDENTITY
        };
        let out = apply_window(bytes.view(), &params);
        assert_eq!(out, arr2(&[[0u8, 228, 255]]));
    }

    #[test]
    fn plane_stats() {
        let plane = arr2(&[[1.0f32, 2.0], [3.0, 4.0]]);
        let stats = IntensityStats::of_plane(plane.view());
        assert_relative_eq!(stats.mean, 2.5);
        assert_relative_eq!(stats.std, 1.118_033_988_749_895, epsilon = 1e-9);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
    }
}
