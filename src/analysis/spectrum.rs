use std::f64::consts::PI;

use ndarray::Array2;
use ndarray_stats::QuantileExt;
use num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{ForensicsError, Result};

const PYRAMID_KERNEL: [f64; 5] = [1.0 / 8.0, 4.0 / 8.0, 6.0 / 8.0, 4.0 / 8.0, 1.0 / 8.0];
const DC_RADIUS_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct SpectrumOptions {
    pub hanning: bool,
    pub upsample: bool,
    pub suppress_dc: bool,
    pub gamma: f64,
}

impl Default for SpectrumOptions {
    fn default() -> Self {
        Self {
            hanning: true,
            upsample: true,
            suppress_dc: true,
            gamma: 4.0,
        }
    }
}

/// Centred magnitude spectrum of a probability map, scaled to [0, 1].
pub struct SpectralAnalyzer {
    options: SpectrumOptions,
}

impl SpectralAnalyzer {
    pub fn new(options: SpectrumOptions) -> Result<Self> {
        if options.gamma <= 0.0 || !options.gamma.is_finite() {
            return Err(ForensicsError::InvalidParameter(format!(
                "gamma must be positive, got {}",
                options.gamma
            )));
        }
        Ok(Self { options })
    }

    pub fn analyze(&self, weights: &Array2<f64>) -> Array2<f64> {
        let mut input = if self.options.hanning {
            apply_hanning(weights)
        } else {
            weights.clone()
        };
        if self.options.upsample {
            input = pyramid_up(&input);
        }

        let spectrum = fft_shift(&fft2(&input));
        let mut magnitude = spectrum.mapv(|c| c.norm());
        if self.options.suppress_dc {
            suppress_dc(&mut magnitude);
        }

        let (min, max) = match (magnitude.min_skipnan(), magnitude.max_skipnan()) {
            (&min, &max) if min.is_finite() && max.is_finite() => (min, max),
            _ => return Array2::zeros(magnitude.dim()),
        };
        let range = max - min + 1e-9;
        let gamma = self.options.gamma;

        magnitude.mapv(|m| ((m - min) / range).powf(gamma))
    }
}

pub fn hanning_window(len: usize) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (len - 1) as f64;
            (0..len).map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / denom).cos()).collect()
        }
    }
}

pub fn apply_hanning(arr: &Array2<f64>) -> Array2<f64> {
    let (height, width) = arr.dim();
    let rows = hanning_window(height);
    let cols = hanning_window(width);

    Array2::from_shape_fn((height, width), |(y, x)| arr[[y, x]] * rows[y] * cols[x])
}

/// Doubles both dimensions: zero insertion followed by a separable 5-tap binomial
/// filter with reflect-101 borders.
pub fn pyramid_up(arr: &Array2<f64>) -> Array2<f64> {
    let (height, width) = arr.dim();
    let (up_h, up_w) = (height * 2, width * 2);

    let mut expanded = Array2::<f64>::zeros((up_h, up_w));
    for ((y, x), &v) in arr.indexed_iter() {
        expanded[[2 * y, 2 * x]] = v;
    }

    let mut horizontal = Array2::<f64>::zeros((up_h, up_w));
    for y in 0..up_h {
        for x in 0..up_w {
            horizontal[[y, x]] = PYRAMID_KERNEL
                .iter()
                .enumerate()
                .map(|(k, w)| w * expanded[[y, reflect_101(x as isize + k as isize - 2, up_w)]])
                .sum();
        }
    }

    Array2::from_shape_fn((up_h, up_w), |(y, x)| {
        PYRAMID_KERNEL
            .iter()
            .enumerate()
            .map(|(k, w)| w * horizontal[[reflect_101(y as isize + k as isize - 2, up_h), x]])
            .sum()
    })
}

fn reflect_101(index: isize, len: usize) -> usize {
    let len = len as isize;
    if len == 1 {
        return 0;
    }

    let period = 2 * (len - 1);
    let mut i = index.rem_euclid(period);
    if i >= len {
        i = period - i;
    }
    i as usize
}

pub fn fft2(arr: &Array2<f64>) -> Array2<Complex<f64>> {
    let (height, width) = arr.dim();
    let mut data = arr.mapv(|v| Complex::new(v, 0.0));
    let mut planner = FftPlanner::<f64>::new();

    let row_fft = planner.plan_fft_forward(width);
    for mut row in data.rows_mut() {
        let mut buffer = row.to_vec();
        row_fft.process(&mut buffer);
        row.iter_mut().zip(buffer).for_each(|(dst, src)| *dst = src);
    }

    let col_fft = planner.plan_fft_forward(height);
    for mut column in data.columns_mut() {
        let mut buffer = column.to_vec();
        col_fft.process(&mut buffer);
        column.iter_mut().zip(buffer).for_each(|(dst, src)| *dst = src);
    }

    data
}

/// Moves the zero-frequency term to `(h / 2, w / 2)`.
pub fn fft_shift<T: Clone>(arr: &Array2<T>) -> Array2<T> {
    let (height, width) = arr.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        arr[[(y + height - height / 2) % height, (x + width - width / 2) % width]].clone()
    })
}

pub fn suppress_dc(magnitude: &mut Array2<f64>) {
    let (height, width) = magnitude.dim();
    let radius = (DC_RADIUS_FRACTION * height.min(width) as f64 / 2.0).floor() as isize;
    let (cy, cx) = ((height / 2) as isize, (width / 2) as isize);

    for ((y, x), value) in magnitude.indexed_iter_mut() {
        let (dy, dx) = (y as isize - cy, x as isize - cx);
        if dy * dy + dx * dx <= radius * radius {
            *value = 0.0;
        }
    }
}
