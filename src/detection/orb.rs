use image::GrayImage;
use imageproc::corners::corners_fast9;
use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::prelude::*;

use crate::{detection::{Descriptor, FeatureDetector, Features, Keypoint, mask_allows}, image_utils::{bilinear_sample, gaussian_blur, gray_to_f32, resize_gray}};

const DESCRIPTOR_BITS: usize = 256;
const PATTERN_SEED: u64 = 0x5eed_0b1e;

#[derive(Debug, Clone)]
pub struct OrbParams {
    pub n_features: usize,
    pub scale_factor: f32,
    pub n_levels: usize,
    pub fast_threshold: u8,
    pub edge_threshold: u32,
    pub patch_size: u32,
    pub harris_k: f32,
    pub harris_block: usize,
    pub blur_sigma: f32,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            n_features: 500,
            scale_factor: 1.2,
            n_levels: 8,
            fast_threshold: 20,
            edge_threshold: 31,
            patch_size: 31,
            harris_k: 0.04,
            harris_block: 7,
            blur_sigma: 2.0,
        }
    }
}

/// Oriented FAST keypoints with steered BRIEF descriptors.
pub struct OrbDetector {
    params: OrbParams,
    pattern: Vec<[f32; 4]>,
    umax: Vec<i32>,
}

impl OrbDetector {
    pub fn new() -> Self {
        Self::with_params(OrbParams::default())
    }

    pub fn with_params(params: OrbParams) -> Self {
        let pattern = Self::sampling_pattern(params.patch_size);
        let umax = Self::circle_extent((params.patch_size / 2) as i32);

        Self {
            params,
            pattern,
            umax,
        }
    }

    // Isotropic Gaussian test pairs (BRIEF G II), drawn from a fixed seed so the
    // descriptor layout never changes between runs.
    fn sampling_pattern(patch_size: u32) -> Vec<[f32; 4]> {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let sigma = patch_size as f64 / 5.0;
        let limit = (patch_size / 2) as f64 - 2.0;

        (0..DESCRIPTOR_BITS)
            .map(|_| loop {
                let pair = [
                    gaussian_offset(&mut rng, sigma, limit),
                    gaussian_offset(&mut rng, sigma, limit),
                    gaussian_offset(&mut rng, sigma, limit),
                    gaussian_offset(&mut rng, sigma, limit),
                ];
                if pair[0] != pair[2] || pair[1] != pair[3] {
                    break pair;
                }
            })
            .collect()
    }

    fn circle_extent(radius: i32) -> Vec<i32> {
        (0..=radius)
            .map(|v| (((radius * radius - v * v) as f64).sqrt()).floor() as i32)
            .collect()
    }

    fn build_levels(&self, gray: &GrayImage) -> Vec<(f32, GrayImage)> {
        let min_side = 2 * self.params.edge_threshold + 1;
        let mut levels = Vec::with_capacity(self.params.n_levels);

        for level in 0..self.params.n_levels {
            let scale = self.params.scale_factor.powi(level as i32);
            let image = if level == 0 {
                gray.clone()
            } else {
                resize_gray(gray, scale)
            };

            if image.width() < min_side || image.height() < min_side {
                break;
            }
            levels.push((scale, image));
        }

        levels
    }

    fn level_quotas(&self, n_levels: usize) -> Vec<usize> {
        if n_levels == 0 {
            return Vec::new();
        }

        let factor = 1.0 / self.params.scale_factor as f64;
        let mut per_level = self.params.n_features as f64 * (1.0 - factor)
            / (1.0 - factor.powi(n_levels as i32));
        let mut quotas = Vec::with_capacity(n_levels);
        let mut assigned = 0usize;

        for _ in 0..n_levels - 1 {
            let quota = per_level.round() as usize;
            quotas.push(quota);
            assigned += quota;
            per_level *= factor;
        }
        quotas.push(self.params.n_features.saturating_sub(assigned));

        quotas
    }

    fn detect_level(
        &self,
        image: &GrayImage,
        scale: f32,
        level: u32,
        quota: usize,
        mask: Option<&GrayImage>,
    ) -> Features {
        let (width, height) = image.dimensions();
        let edge = self.params.edge_threshold;
        let corners = corners_fast9(image, self.params.fast_threshold);

        let mut scores = Array2::<f32>::zeros((height as usize, width as usize));
        for corner in &corners {
            scores[[corner.y as usize, corner.x as usize]] = corner.score;
        }

        let intensities = gray_to_f32(image);

        let mut candidates = corners
            .iter()
            .filter(|c| c.x >= edge && c.y >= edge && c.x < width - edge && c.y < height - edge)
            .filter(|c| is_local_maximum(&scores, c.x as usize, c.y as usize))
            .filter(|c| {
                mask_allows(mask, to_original(c.x as f32, scale), to_original(c.y as f32, scale))
            })
            .map(|c| Keypoint {
                x: c.x as f32,
                y: c.y as f32,
                size: self.params.patch_size as f32 * scale,
                angle: 0.0,
                response: self.harris_response(&intensities, c.x as usize, c.y as usize),
                octave: level,
            })
            .collect::<Vec<_>>();

        candidates.sort_by(|a, b| {
            b.response
                .total_cmp(&a.response)
                .then(a.y.total_cmp(&b.y))
                .then(a.x.total_cmp(&b.x))
        });
        candidates.truncate(quota);

        let smoothed = gaussian_blur(&intensities, self.params.blur_sigma);

        let (keypoints, descriptors): (Vec<Keypoint>, Vec<Descriptor>) = candidates
            .par_iter()
            .map(|kp| {
                let angle = self.orientation(&intensities, kp.x as usize, kp.y as usize);
                let descriptor = self.describe(&smoothed, kp.x, kp.y, angle);
                let keypoint = Keypoint {
                    x: to_original(kp.x, scale),
                    y: to_original(kp.y, scale),
                    angle,
                    ..*kp
                };
                (keypoint, descriptor)
            })
            .unzip();

        Features {
            keypoints,
            descriptors,
        }
    }

    fn harris_response(&self, intensities: &Array2<f32>, x: usize, y: usize) -> f32 {
        let radius = (self.params.harris_block / 2) as isize;
        let norm = 1.0 / (4.0 * 255.0);
        let (mut ixx, mut iyy, mut ixy) = (0.0f32, 0.0f32, 0.0f32);

        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let px = (x as isize + dx) as usize;
                let py = (y as isize + dy) as usize;
                let (gx, gy) = sobel(intensities, px, py);
                let (gx, gy) = (gx * norm, gy * norm);
                ixx += gx * gx;
                iyy += gy * gy;
                ixy += gx * gy;
            }
        }

        let det = ixx * iyy - ixy * ixy;
        let trace = ixx + iyy;
        det - self.params.harris_k * trace * trace
    }

    // Intensity centroid over the circular patch.
    fn orientation(&self, intensities: &Array2<f32>, x: usize, y: usize) -> f32 {
        let radius = self.umax.len() as isize - 1;
        let (mut m01, mut m10) = (0.0f32, 0.0f32);

        for v in -radius..=radius {
            let extent = self.umax[v.unsigned_abs()] as isize;
            for u in -extent..=extent {
                let value = intensities[[(y as isize + v) as usize, (x as isize + u) as usize]];
                m10 += u as f32 * value;
                m01 += v as f32 * value;
            }
        }

        m01.atan2(m10)
    }

    fn describe(&self, smoothed: &Array2<f32>, x: f32, y: f32, angle: f32) -> Descriptor {
        let (sin, cos) = angle.sin_cos();
        let mut descriptor = Descriptor::zeros(DESCRIPTOR_BITS);

        for (i, &[x1, y1, x2, y2]) in self.pattern.iter().enumerate() {
            let first = bilinear_sample(smoothed, x + cos * x1 - sin * y1, y + sin * x1 + cos * y1);
            let second = bilinear_sample(smoothed, x + cos * x2 - sin * y2, y + sin * x2 + cos * y2);
            if first < second {
                descriptor.set_bit(i);
            }
        }

        descriptor
    }
}

impl Default for OrbDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureDetector for OrbDetector {
    fn detect_and_compute(&self, gray: &GrayImage, mask: Option<&GrayImage>) -> Features {
        let levels = self.build_levels(gray);
        let quotas = self.level_quotas(levels.len());

        let mut features = Features::default();
        for (level, ((scale, image), quota)) in levels.iter().zip(quotas).enumerate() {
            features.extend(self.detect_level(image, *scale, level as u32, quota, mask));
        }

        features
    }

    fn name(&self) -> &str {
        "ORB"
    }
}

fn gaussian_offset(rng: &mut StdRng, sigma: f64, limit: f64) -> f32 {
    loop {
        let u1 = rng.r#gen::<f64>().max(f64::MIN_POSITIVE);
        let u2 = rng.r#gen::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        let offset = (z * sigma).round();
        if offset.abs() <= limit {
            return offset as f32;
        }
    }
}

pub(crate) fn to_original(coord: f32, scale: f32) -> f32 {
    (coord + 0.5) * scale - 0.5
}

pub(crate) fn is_local_maximum(scores: &Array2<f32>, x: usize, y: usize) -> bool {
    let (height, width) = scores.dim();
    let value = scores[[y, x]];

    for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
        for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
            if (nx, ny) != (x, y) && scores[[ny, nx]] > value {
                return false;
            }
        }
    }

    true
}

fn sobel(arr: &Array2<f32>, x: usize, y: usize) -> (f32, f32) {
    let p = |dx: isize, dy: isize| arr[[(y as isize + dy) as usize, (x as isize + dx) as usize]];

    let gx = p(1, -1) + 2.0 * p(1, 0) + p(1, 1) - p(-1, -1) - 2.0 * p(-1, 0) - p(-1, 1);
    let gy = p(-1, 1) + 2.0 * p(0, 1) + p(1, 1) - p(-1, -1) - 2.0 * p(0, -1) - p(1, -1);

    (gx, gy)
}
