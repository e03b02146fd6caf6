pub mod akaze;
pub mod brisk;
pub mod matcher;
pub mod orb;

use std::{fmt, str::FromStr};

use image::GrayImage;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{detection::{akaze::{AkazeDetector, AkazeParams}, brisk::{BriskDetector, BriskParams}, matcher::{Match, RadiusMatcher}, orb::{OrbDetector, OrbParams}}, error::{ForensicsError, Result}};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Diameter of the meaningful neighbourhood, in original image pixels.
    pub size: f32,
    /// Orientation in radians.
    pub angle: f32,
    pub response: f32,
    pub octave: u32,
}

impl Keypoint {
    pub fn distance_to(&self, other: &Keypoint) -> f64 {
        (self.x as f64 - other.x as f64).hypot(self.y as f64 - other.y as f64)
    }
}

/// Packed binary descriptor, bit `i` lives in byte `i / 8` at position `i % 8`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    bytes: Vec<u8>,
}

impl Descriptor {
    pub fn zeros(bit_len: usize) -> Self {
        Self { bytes: vec![0; bit_len.div_ceil(8)] }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn set_bit(&mut self, index: usize) {
        self.bytes[index / 8] |= 1 << (index % 8);
    }

    pub fn bit(&self, index: usize) -> bool {
        self.bytes[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn push(&mut self, keypoint: Keypoint, descriptor: Descriptor) {
        self.keypoints.push(keypoint);
        self.descriptors.push(descriptor);
    }

    pub fn extend(&mut self, other: Features) {
        self.keypoints.extend(other.keypoints);
        self.descriptors.extend(other.descriptors);
    }
}

pub trait FeatureDetector: Send + Sync {
    fn detect_and_compute(&self, gray: &GrayImage, mask: Option<&GrayImage>) -> Features;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetectorAlgorithm {
    #[default]
    Brisk,
    Orb,
    Akaze,
}

/// Tuning for each detector; only the one matching the chosen algorithm is used.
#[derive(Debug, Clone, Default)]
pub struct DetectorParams {
    pub brisk: BriskParams,
    pub orb: OrbParams,
    pub akaze: AkazeParams,
}

impl DetectorAlgorithm {
    pub fn create(&self, params: &DetectorParams) -> Box<dyn FeatureDetector> {
        match self {
            DetectorAlgorithm::Brisk => Box::new(BriskDetector::with_params(params.brisk.clone())),
            DetectorAlgorithm::Orb => Box::new(OrbDetector::with_params(params.orb.clone())),
            DetectorAlgorithm::Akaze => Box::new(AkazeDetector::with_params(params.akaze.clone())),
        }
    }
}

impl FromStr for DetectorAlgorithm {
    type Err = ForensicsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BRISK" => Ok(DetectorAlgorithm::Brisk),
            "ORB" => Ok(DetectorAlgorithm::Orb),
            "AKAZE" => Ok(DetectorAlgorithm::Akaze),
            _ => Err(ForensicsError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for DetectorAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectorAlgorithm::Brisk => "BRISK",
            DetectorAlgorithm::Orb => "ORB",
            DetectorAlgorithm::Akaze => "AKAZE",
        };
        f.write_str(name)
    }
}

pub(crate) fn mask_allows(mask: Option<&GrayImage>, x: f32, y: f32) -> bool {
    match mask {
        None => true,
        Some(mask) => {
            let (width, height) = mask.dimensions();
            let px = x.round();
            let py = y.round();
            px >= 0.0
                && py >= 0.0
                && (px as u32) < width
                && (py as u32) < height
                && mask.get_pixel(px as u32, py as u32)[0] > 0
        }
    }
}

/// Min-max normalises responses to 0..=100 and keeps keypoints scoring at least
/// `100 - response_threshold`. Equal responses all normalise to 100.
pub fn filter_by_response(features: Features, response_threshold: u8) -> Features {
    if features.is_empty() {
        return features;
    }

    let min = features.keypoints.iter().map(|k| k.response).fold(f32::INFINITY, f32::min);
    let max = features.keypoints.iter().map(|k| k.response).fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    let cutoff = 100.0 - response_threshold.min(100) as f32;

    let mut filtered = Features::default();
    for (keypoint, descriptor) in features.keypoints.into_iter().zip(features.descriptors) {
        let normalized = if range > f32::EPSILON {
            (keypoint.response - min) / range * 100.0
        } else {
            100.0
        };

        if normalized >= cutoff {
            filtered.push(keypoint, descriptor);
        }
    }

    filtered
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub total_keypoints: usize,
    pub features: Features,
    pub matches: Vec<Match>,
}

pub fn detect_and_match(
    gray: &GrayImage,
    algorithm: DetectorAlgorithm,
    params: &DetectorParams,
    response_threshold: u8,
    matching_threshold: u8,
    mask: Option<&GrayImage>,
) -> MatchOutcome {
    let detector = algorithm.create(params);
    let features = detector.detect_and_compute(gray, mask);
    let total_keypoints = features.len();

    if features.is_empty() {
        debug!("{} found no keypoints", detector.name());
        return MatchOutcome::default();
    }

    let features = filter_by_response(features, response_threshold);
    debug!(
        "{}: {} keypoints, {} kept after response filtering",
        detector.name(),
        total_keypoints,
        features.len()
    );

    if features.len() < 2 {
        return MatchOutcome {
            total_keypoints,
            features,
            matches: Vec::new(),
        };
    }

    let matches = RadiusMatcher::from_threshold(matching_threshold).match_all(&features.descriptors);
    debug!("{}: {} raw descriptor matches", detector.name(), matches.len());

    MatchOutcome {
        total_keypoints,
        features,
        matches,
    }
}
