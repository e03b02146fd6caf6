use std::f32::consts::TAU;

use image::GrayImage;
use imageproc::corners::corners_fast9;
use ndarray::Array2;
use rayon::prelude::*;

use crate::{detection::{Descriptor, FeatureDetector, Features, Keypoint, mask_allows, orb::{is_local_maximum, to_original}}, image_utils::{bilinear_sample, gaussian_blur, gray_to_f32, resize_gray}};

const RING_RADII: [f32; 5] = [0.0, 2.9, 4.9, 7.4, 10.8];
const RING_POINTS: [usize; 5] = [1, 10, 14, 15, 20];
const PATTERN_SCALE: f32 = 0.85;
const SHORT_PAIR_MAX: f32 = 5.85;
const LONG_PAIR_MIN: f32 = 8.2;
const MAX_DESCRIPTOR_BITS: usize = 512;
const BASIC_SIZE: f32 = 12.0;

#[derive(Debug, Clone)]
pub struct BriskParams {
    pub threshold: u8,
    pub octaves: usize,
    pub smoothing_sigma: f32,
}

impl Default for BriskParams {
    fn default() -> Self {
        Self {
            threshold: 30,
            octaves: 3,
            smoothing_sigma: 1.0,
        }
    }
}

struct ScaleLayer {
    scale: f32,
    scores: Array2<f32>,
    smoothed: Array2<f32>,
}

struct Candidate {
    layer: usize,
    x: usize,
    y: usize,
    score: f32,
}

/// Scale-space FAST detector with the concentric-ring sampling descriptor.
pub struct BriskDetector {
    params: BriskParams,
    points: Vec<(f32, f32)>,
    short_pairs: Vec<(usize, usize)>,
    long_pairs: Vec<(usize, usize)>,
    border: u32,
}

impl BriskDetector {
    pub fn new() -> Self {
        Self::with_params(BriskParams::default())
    }

    pub fn with_params(params: BriskParams) -> Self {
        let mut points = Vec::with_capacity(RING_POINTS.iter().sum());
        for (&radius, &count) in RING_RADII.iter().zip(RING_POINTS.iter()) {
            for k in 0..count {
                let theta = TAU * k as f32 / count as f32;
                points.push((
                    radius * PATTERN_SCALE * theta.cos(),
                    radius * PATTERN_SCALE * theta.sin(),
                ));
            }
        }

        let mut short_pairs = Vec::new();
        let mut long_pairs = Vec::new();
        for i in 1..points.len() {
            for j in 0..i {
                let d = (points[j].0 - points[i].0).hypot(points[j].1 - points[i].1);
                if d < SHORT_PAIR_MAX {
                    if short_pairs.len() < MAX_DESCRIPTOR_BITS {
                        short_pairs.push((i, j));
                    }
                } else if d > LONG_PAIR_MIN {
                    long_pairs.push((i, j));
                }
            }
        }

        let border = (RING_RADII[4] * PATTERN_SCALE).ceil() as u32 + 2;

        Self {
            params,
            points,
            short_pairs,
            long_pairs,
            border,
        }
    }

    pub fn descriptor_bits(&self) -> usize {
        self.short_pairs.len()
    }

    fn build_layers(&self, gray: &GrayImage) -> Vec<ScaleLayer> {
        let min_side = 2 * self.border + 1;
        let mut layers = Vec::with_capacity(self.params.octaves * 2);

        'octaves: for octave in 0..self.params.octaves {
            let base = 2f32.powi(octave as i32);
            for scale in [base, base * 1.5] {
                let image = if scale == 1.0 {
                    gray.clone()
                } else {
                    resize_gray(gray, scale)
                };
                if image.width() < min_side || image.height() < min_side {
                    break 'octaves;
                }

                let mut scores = Array2::<f32>::zeros((image.height() as usize, image.width() as usize));
                for corner in corners_fast9(&image, self.params.threshold) {
                    scores[[corner.y as usize, corner.x as usize]] = corner.score;
                }

                layers.push(ScaleLayer {
                    scale,
                    scores,
                    smoothed: gaussian_blur(&gray_to_f32(&image), self.params.smoothing_sigma),
                });
            }
        }

        layers
    }

    fn candidates(&self, layers: &[ScaleLayer], mask: Option<&GrayImage>) -> Vec<Candidate> {
        let border = self.border as usize;
        let mut found = Vec::new();

        for (index, layer) in layers.iter().enumerate() {
            let (height, width) = layer.scores.dim();

            for y in border..height - border {
                for x in border..width - border {
                    let score = layer.scores[[y, x]];
                    if score <= 0.0 || !is_local_maximum(&layer.scores, x, y) {
                        continue;
                    }

                    let below = index.checked_sub(1).map(|i| &layers[i]);
                    let above = layers.get(index + 1);
                    let beaten = [below, above].into_iter().flatten().any(|other| {
                        let ratio = layer.scale / other.scale;
                        neighbourhood_max(
                            &other.scores,
                            to_original(x as f32, ratio),
                            to_original(y as f32, ratio),
                        ) > score
                    });
                    if beaten {
                        continue;
                    }

                    if !mask_allows(
                        mask,
                        to_original(x as f32, layer.scale),
                        to_original(y as f32, layer.scale),
                    ) {
                        continue;
                    }

                    found.push(Candidate { layer: index, x, y, score });
                }
            }
        }

        found
    }

    fn describe(&self, layer: &ScaleLayer, x: f32, y: f32) -> (f32, Descriptor) {
        let upright = self
            .points
            .iter()
            .map(|&(px, py)| bilinear_sample(&layer.smoothed, x + px, y + py))
            .collect::<Vec<_>>();

        let (mut gx, mut gy) = (0.0f32, 0.0f32);
        for &(i, j) in &self.long_pairs {
            let (dx, dy) = (self.points[j].0 - self.points[i].0, self.points[j].1 - self.points[i].1);
            let weight = (upright[j] - upright[i]) / (dx * dx + dy * dy);
            gx += weight * dx;
            gy += weight * dy;
        }
        let angle = gy.atan2(gx);

        let (sin, cos) = angle.sin_cos();
        let rotated = self
            .points
            .iter()
            .map(|&(px, py)| {
                bilinear_sample(&layer.smoothed, x + cos * px - sin * py, y + sin * px + cos * py)
            })
            .collect::<Vec<_>>();

        let mut descriptor = Descriptor::zeros(self.short_pairs.len());
        for (bit, &(i, j)) in self.short_pairs.iter().enumerate() {
            if rotated[j] > rotated[i] {
                descriptor.set_bit(bit);
            }
        }

        (angle, descriptor)
    }
}

impl Default for BriskDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureDetector for BriskDetector {
    fn detect_and_compute(&self, gray: &GrayImage, mask: Option<&GrayImage>) -> Features {
        let layers = self.build_layers(gray);
        if layers.is_empty() {
            return Features::default();
        }

        let candidates = self.candidates(&layers, mask);

        let (keypoints, descriptors): (Vec<Keypoint>, Vec<Descriptor>) = candidates
            .par_iter()
            .map(|c| {
                let layer = &layers[c.layer];
                let (angle, descriptor) = self.describe(layer, c.x as f32, c.y as f32);
                let keypoint = Keypoint {
                    x: to_original(c.x as f32, layer.scale),
                    y: to_original(c.y as f32, layer.scale),
                    size: BASIC_SIZE * layer.scale,
                    angle,
                    response: c.score,
                    octave: c.layer as u32,
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
        "BRISK"
    }
}

fn neighbourhood_max(scores: &Array2<f32>, fx: f32, fy: f32) -> f32 {
    let (height, width) = scores.dim();
    let cx = fx.round().clamp(0.0, (width - 1) as f32) as usize;
    let cy = fy.round().clamp(0.0, (height - 1) as f32) as usize;

    let mut best = 0.0f32;
    for y in cy.saturating_sub(1)..=(cy + 1).min(height - 1) {
        for x in cx.saturating_sub(1)..=(cx + 1).min(width - 1) {
            best = best.max(scores[[y, x]]);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn blobs_image() -> GrayImage {
        let mut img = GrayImage::from_pixel(128, 128, Luma([20]));
        for (sx, sy, v) in [(30u32, 30u32, 230u8), (70, 35, 180), (40, 80, 200), (85, 85, 250)] {
            for y in sy..sy + 12 {
                for x in sx..sx + 12 {
                    img.put_pixel(x, y, Luma([v]));
                }
            }
        }
        img
    }

    #[test]
    fn pattern_has_sixty_points_and_capped_pairs() {
        let brisk = BriskDetector::new();
        assert_eq!(brisk.points.len(), 60);
        assert!(brisk.descriptor_bits() > 0 && brisk.descriptor_bits() <= MAX_DESCRIPTOR_BITS);
        assert!(!brisk.long_pairs.is_empty());
        assert_eq!(brisk.points[0], (0.0, 0.0));
    }

    #[test]
    fn detects_blob_corners() {
        let brisk = BriskDetector::new();
        let features = brisk.detect_and_compute(&blobs_image(), None);

        assert!(!features.is_empty());
        assert_eq!(features.keypoints.len(), features.descriptors.len());
        assert!(features.keypoints.iter().all(|k| k.response >= 30.0));
        assert!(features.keypoints.iter().all(|k| k.size >= BASIC_SIZE));
    }

    #[test]
    fn empty_mask_suppresses_all_keypoints() {
        let brisk = BriskDetector::new();
        let mask = GrayImage::new(128, 128);
        assert!(brisk.detect_and_compute(&blobs_image(), Some(&mask)).is_empty());
    }

    #[test]
    fn translated_content_gives_identical_descriptors() {
        let brisk = BriskDetector::new();
        let mut img = GrayImage::from_pixel(160, 96, Luma([40]));
        // Both copies sample inside [64, 128) so their coordinates round identically.
        for (ox, oy) in [(78u32, 30u32), (114, 30)] {
            for y in oy..oy + 16 {
                for x in ox..ox + 10 {
                    img.put_pixel(x, y, Luma([210]));
                }
            }
        }

        let layer = ScaleLayer {
            scale: 1.0,
            scores: Array2::zeros((96, 160)),
            smoothed: gaussian_blur(&gray_to_f32(&img), 1.0),
        };
        let (left_angle, left) = brisk.describe(&layer, 78.0, 30.0);
        let (right_angle, right) = brisk.describe(&layer, 114.0, 30.0);

        assert_eq!(left_angle, right_angle);
        assert_eq!(left.hamming(&right), 0);
        assert_eq!(left.as_bytes().len(), brisk.descriptor_bits().div_ceil(8));
    }
}
