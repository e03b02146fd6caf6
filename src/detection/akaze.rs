use std::f32::consts::{FRAC_PI_3, TAU};

use image::GrayImage;
use ndarray::Array2;
use rayon::prelude::*;

use crate::{detection::{Descriptor, FeatureDetector, Features, Keypoint, mask_allows, orb::to_original}, image_utils::{bilinear_sample, gaussian_blur, gray_to_f32}};

const LDB_GRIDS: [usize; 3] = [2, 3, 4];
const LDB_CHANNELS: usize = 3;
const ORIENTATION_STEP: f32 = 0.15;
const FALLBACK_CONTRAST: f32 = 0.03;

#[derive(Debug, Clone)]
pub struct AkazeParams {
    pub octaves: usize,
    pub sublevels: usize,
    pub base_sigma: f32,
    pub threshold: f32,
    pub contrast_percentile: f32,
    pub contrast_bins: usize,
    pub max_step: f32,
    /// Half-width of the descriptor window in sampling units.
    pub pattern_size: f32,
    pub samples_per_cell: usize,
    pub min_level_size: usize,
}

impl Default for AkazeParams {
    fn default() -> Self {
        Self {
            octaves: 4,
            sublevels: 4,
            base_sigma: 1.6,
            threshold: 0.001,
            contrast_percentile: 0.7,
            contrast_bins: 300,
            max_step: 0.25,
            pattern_size: 5.0,
            samples_per_cell: 4,
            min_level_size: 24,
        }
    }
}

struct EvolutionLevel {
    octave: usize,
    sublevel: usize,
    sigma: f32,
    local_sigma: f32,
    lt: Array2<f32>,
    lx: Array2<f32>,
    ly: Array2<f32>,
    det: Array2<f32>,
}

impl EvolutionLevel {
    fn ratio(&self) -> f32 {
        2f32.powi(self.octave as i32)
    }
}

struct Candidate {
    level: usize,
    x: usize,
    y: usize,
    response: f32,
}

/// Nonlinear scale space detector with modified-LDB binary descriptors.
pub struct AkazeDetector {
    params: AkazeParams,
}

impl AkazeDetector {
    pub fn new() -> Self {
        Self::with_params(AkazeParams::default())
    }

    pub fn with_params(params: AkazeParams) -> Self {
        Self { params }
    }

    pub fn descriptor_bits() -> usize {
        LDB_GRIDS
            .iter()
            .map(|&n| {
                let cells = n * n;
                cells * (cells - 1) / 2 * LDB_CHANNELS
            })
            .sum()
    }

    fn evolution_time(&self, octave: usize, sublevel: usize) -> f32 {
        let sigma = self.sigma(octave, sublevel);
        0.5 * sigma * sigma
    }

    fn sigma(&self, octave: usize, sublevel: usize) -> f32 {
        self.params.base_sigma
            * 2f32.powf(octave as f32 + sublevel as f32 / self.params.sublevels as f32)
    }

    fn contrast_factor(&self, image: &Array2<f32>) -> f32 {
        let smoothed = gaussian_blur(image, 1.0);
        let (height, width) = smoothed.dim();
        if height < 3 || width < 3 {
            return FALLBACK_CONTRAST;
        }

        let mut magnitudes = Vec::with_capacity((height - 2) * (width - 2));
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let gx = 0.5 * (smoothed[[y, x + 1]] - smoothed[[y, x - 1]]);
                let gy = 0.5 * (smoothed[[y + 1, x]] - smoothed[[y - 1, x]]);
                magnitudes.push(gx.hypot(gy));
            }
        }

        let max = magnitudes.iter().cloned().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return FALLBACK_CONTRAST;
        }

        let bins = self.params.contrast_bins;
        let mut histogram = vec![0usize; bins];
        let mut counted = 0usize;
        for &m in magnitudes.iter().filter(|&&m| m > 0.0) {
            let bin = ((m / max * bins as f32) as usize).min(bins - 1);
            histogram[bin] += 1;
            counted += 1;
        }

        let target = (counted as f32 * self.params.contrast_percentile) as usize;
        let mut cumulative = 0usize;
        let mut bin = 0usize;
        while bin < bins && cumulative < target {
            cumulative += histogram[bin];
            bin += 1;
        }

        let k = max * bin as f32 / bins as f32;
        if k > 0.0 { k } else { FALLBACK_CONTRAST }
    }

    fn build_scale_space(&self, gray: &GrayImage) -> Vec<EvolutionLevel> {
        let p = &self.params;
        let base = gray_to_f32(gray).mapv(|v| v / 255.0);
        let (height, width) = base.dim();
        if height < p.min_level_size || width < p.min_level_size {
            return Vec::new();
        }

        let mut current = gaussian_blur(&base, p.base_sigma);
        let mut contrast = self.contrast_factor(&current);
        let mut levels: Vec<EvolutionLevel> = Vec::with_capacity(p.octaves * p.sublevels);
        let mut previous_time = self.evolution_time(0, 0);

        for octave in 0..p.octaves {
            if octave > 0 {
                let downsampled = downsample(&current);
                let (h, w) = downsampled.dim();
                if h < p.min_level_size || w < p.min_level_size {
                    break;
                }
                current = downsampled;
                contrast *= 0.75;
            }

            let time_scale = 4f32.powi(octave as i32);
            for sublevel in 0..p.sublevels {
                let time = self.evolution_time(octave, sublevel);
                if !levels.is_empty() {
                    let step = (time - previous_time) / time_scale;
                    current = diffuse(&current, contrast, step, p.max_step);
                }
                previous_time = time;

                let sigma = self.sigma(octave, sublevel);
                let local_sigma = sigma / time_scale.sqrt();
                levels.push(self.level(octave, sublevel, sigma, local_sigma, current.clone()));
            }
        }

        levels
    }

    fn level(
        &self,
        octave: usize,
        sublevel: usize,
        sigma: f32,
        local_sigma: f32,
        lt: Array2<f32>,
    ) -> EvolutionLevel {
        let (height, width) = lt.dim();
        let step = (local_sigma.round() as usize).max(1);
        let norm = local_sigma.powi(4);

        let mut lx = Array2::<f32>::zeros((height, width));
        let mut ly = Array2::<f32>::zeros((height, width));
        let mut det = Array2::<f32>::zeros((height, width));

        for y in 0..height {
            for x in 0..width {
                let at = |dx: isize, dy: isize, s: usize| {
                    let sx = (x as isize + dx * s as isize).clamp(0, width as isize - 1) as usize;
                    let sy = (y as isize + dy * s as isize).clamp(0, height as isize - 1) as usize;
                    lt[[sy, sx]]
                };

                lx[[y, x]] = 0.5 * (at(1, 0, 1) - at(-1, 0, 1));
                ly[[y, x]] = 0.5 * (at(0, 1, 1) - at(0, -1, 1));

                let center = at(0, 0, step);
                let s2 = (step * step) as f32;
                let lxx = (at(1, 0, step) + at(-1, 0, step) - 2.0 * center) / s2;
                let lyy = (at(0, 1, step) + at(0, -1, step) - 2.0 * center) / s2;
                let lxy = (at(1, 1, step) + at(-1, -1, step) - at(1, -1, step) - at(-1, 1, step))
                    / (4.0 * s2);
                det[[y, x]] = (lxx * lyy - lxy * lxy) * norm;
            }
        }

        EvolutionLevel {
            octave,
            sublevel,
            sigma,
            local_sigma,
            lt,
            lx,
            ly,
            det,
        }
    }

    fn candidates(&self, levels: &[EvolutionLevel], mask: Option<&GrayImage>) -> Vec<Candidate> {
        let mut found = Vec::new();

        for (index, level) in levels.iter().enumerate() {
            let (height, width) = level.det.dim();
            let border = ((level.local_sigma * self.params.pattern_size).ceil() as usize).max(2);
            if height <= 2 * border || width <= 2 * border {
                continue;
            }

            let neighbours = [
                index.checked_sub(1).map(|i| &levels[i]),
                levels.get(index + 1),
            ]
            .into_iter()
            .flatten()
            .filter(|other| other.octave == level.octave)
            .collect::<Vec<_>>();

            for y in border..height - border {
                for x in border..width - border {
                    let response = level.det[[y, x]];
                    if response <= self.params.threshold {
                        continue;
                    }

                    let spatial_max = (y - 1..=y + 1)
                        .flat_map(|ny| (x - 1..=x + 1).map(move |nx| (nx, ny)))
                        .all(|(nx, ny)| level.det[[ny, nx]] <= response);
                    if !spatial_max || neighbours.iter().any(|other| other.det[[y, x]] > response) {
                        continue;
                    }

                    let ratio = level.ratio();
                    if !mask_allows(mask, to_original(x as f32, ratio), to_original(y as f32, ratio)) {
                        continue;
                    }

                    found.push(Candidate { level: index, x, y, response });
                }
            }
        }

        found
    }

    fn orientation(&self, level: &EvolutionLevel, x: f32, y: f32) -> f32 {
        let step = level.local_sigma;
        let mut samples = Vec::with_capacity(113);

        for j in -6i32..=6 {
            for i in -6i32..=6 {
                if i * i + j * j >= 36 {
                    continue;
                }
                let weight = (-((i * i + j * j) as f32) / (2.0 * 2.5 * 2.5)).exp();
                let sx = x + i as f32 * step;
                let sy = y + j as f32 * step;
                let dx = weight * bilinear_sample(&level.lx, sx, sy);
                let dy = weight * bilinear_sample(&level.ly, sx, sy);
                samples.push((dx, dy, dy.atan2(dx).rem_euclid(TAU)));
            }
        }

        let mut best = (0.0f32, 0.0f32);
        let mut best_norm = 0.0f32;
        let mut start = 0.0f32;
        while start < TAU {
            let end = start + FRAC_PI_3;
            let (mut sum_x, mut sum_y) = (0.0f32, 0.0f32);
            for &(dx, dy, angle) in &samples {
                let inside = (angle >= start && angle < end) || (end > TAU && angle < end - TAU);
                if inside {
                    sum_x += dx;
                    sum_y += dy;
                }
            }

            let norm = sum_x * sum_x + sum_y * sum_y;
            if norm > best_norm {
                best_norm = norm;
                best = (sum_x, sum_y);
            }
            start += ORIENTATION_STEP;
        }

        best.1.atan2(best.0)
    }

    fn describe(&self, level: &EvolutionLevel, x: f32, y: f32, angle: f32) -> Descriptor {
        let p = &self.params;
        let unit = level.local_sigma;
        let (sin, cos) = angle.sin_cos();
        let k = p.samples_per_cell;
        let mut descriptor = Descriptor::zeros(Self::descriptor_bits());
        let mut bit = 0;

        for &grid in &LDB_GRIDS {
            let cell = 2.0 * p.pattern_size / grid as f32;
            let mut cells = Vec::with_capacity(grid * grid);

            for cy in 0..grid {
                for cx in 0..grid {
                    let mut sums = [0.0f32; LDB_CHANNELS];
                    for sy in 0..k {
                        for sx in 0..k {
                            let u = -p.pattern_size + (cx as f32 + (sx as f32 + 0.5) / k as f32) * cell;
                            let v = -p.pattern_size + (cy as f32 + (sy as f32 + 0.5) / k as f32) * cell;
                            let px = x + (cos * u - sin * v) * unit;
                            let py = y + (sin * u + cos * v) * unit;

                            let dx = bilinear_sample(&level.lx, px, py);
                            let dy = bilinear_sample(&level.ly, px, py);
                            sums[0] += bilinear_sample(&level.lt, px, py);
                            sums[1] += cos * dx + sin * dy;
                            sums[2] += -sin * dx + cos * dy;
                        }
                    }
                    cells.push(sums);
                }
            }

            for i in 0..cells.len() {
                for j in i + 1..cells.len() {
                    for channel in 0..LDB_CHANNELS {
                        if cells[i][channel] > cells[j][channel] {
                            descriptor.set_bit(bit);
                        }
                        bit += 1;
                    }
                }
            }
        }

        descriptor
    }
}

impl Default for AkazeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureDetector for AkazeDetector {
    fn detect_and_compute(&self, gray: &GrayImage, mask: Option<&GrayImage>) -> Features {
        let levels = self.build_scale_space(gray);
        if levels.is_empty() {
            return Features::default();
        }

        let candidates = self.candidates(&levels, mask);

        let (keypoints, descriptors): (Vec<Keypoint>, Vec<Descriptor>) = candidates
            .par_iter()
            .map(|c| {
                let level = &levels[c.level];
                let (x, y) = (c.x as f32, c.y as f32);
                let angle = self.orientation(level, x, y);
                let descriptor = self.describe(level, x, y, angle);
                let ratio = level.ratio();
                let keypoint = Keypoint {
                    x: to_original(x, ratio),
                    y: to_original(y, ratio),
                    size: 3.0 * level.sigma,
                    angle,
                    response: c.response,
                    octave: (level.octave * self.params.sublevels + level.sublevel) as u32,
                };
                (keypoint, descriptor)
            })
            .unzip();

        Features {
            keypoints,
            descriptors,
        }
    }

    fn name(&self) -> &str {
        "AKAZE"
    }
}

fn downsample(arr: &Array2<f32>) -> Array2<f32> {
    let (height, width) = arr.dim();
    Array2::from_shape_fn((height / 2, width / 2), |(y, x)| {
        let (sy, sx) = (2 * y, 2 * x);
        0.25 * (arr[[sy, sx]] + arr[[sy, sx + 1]] + arr[[sy + 1, sx]] + arr[[sy + 1, sx + 1]])
    })
}

/// Explicit Perona-Malik diffusion over `time`, split into steps no longer than `max_step`.
fn diffuse(image: &Array2<f32>, contrast: f32, time: f32, max_step: f32) -> Array2<f32> {
    if time <= 0.0 {
        return image.clone();
    }

    let (height, width) = image.dim();
    let smoothed = gaussian_blur(image, 1.0);
    let k2 = contrast * contrast;
    let conductance = Array2::from_shape_fn((height, width), |(y, x)| {
        let gx = 0.5 * (smoothed[[y, (x + 1).min(width - 1)]] - smoothed[[y, x.saturating_sub(1)]]);
        let gy = 0.5 * (smoothed[[(y + 1).min(height - 1), x]] - smoothed[[y.saturating_sub(1), x]]);
        1.0 / (1.0 + (gx * gx + gy * gy) / k2)
    });

    let steps = (time / max_step).ceil().max(1.0) as usize;
    let tau = time / steps as f32;
    let mut current = image.clone();

    for _ in 0..steps {
        let next = Array2::from_shape_fn((height, width), |(y, x)| {
            let c = conductance[[y, x]];
            let v = current[[y, x]];
            let mut flux = 0.0;
            for (ny, nx) in [
                (y, (x + 1).min(width - 1)),
                (y, x.saturating_sub(1)),
                ((y + 1).min(height - 1), x),
                (y.saturating_sub(1), x),
            ] {
                flux += 0.5 * (c + conductance[[ny, nx]]) * (current[[ny, nx]] - v);
            }
            v + tau * flux
        });
        current = next;
    }

    current
}
