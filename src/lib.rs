use std::path::Path;

use image::{DynamicImage, RgbImage};
use log::info;
use serde::{Deserialize, Serialize};

use crate::{analysis::{clustering::Cluster, copy_move::{CloneConfig, CloneDetector}, resampling_detection::{ResamplingConfig, ResamplingDetector, ResamplingResult}}, detection::Keypoint, error::Result, image_utils::validate_image};

pub mod analysis;
pub mod detection;
pub mod error;
pub mod image_utils;
pub mod report;

#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    pub clone: CloneConfig,
    pub resampling: ResamplingConfig,
}

pub struct ForensicsAnalyzer {
    original: DynamicImage,
    config: AnalysisConfig,
    path: Option<String>,
}

impl ForensicsAnalyzer {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let original = image::open(&path)?;

        Ok(Self {
            original,
            config: AnalysisConfig::default(),
            path: Some(path_str),
        })
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            original: image,
            config: AnalysisConfig::default(),
            path: None,
        }
    }

    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    pub fn image(&self) -> &DynamicImage {
        &self.original
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn detect_clones(&self) -> Result<CopyMoveResult> {
        let detector = CloneDetector::with_config(self.config.clone.clone())?;
        detector.detect(&self.original)
    }

    pub fn detect_resampling(&self) -> Result<ResamplingResult> {
        let detector = ResamplingDetector::with_config(self.config.resampling.clone())?;
        detector.detect(&self.original)
    }

    pub fn full_analysis(&self) -> Result<FullAnalysisReport> {
        validate_image(&self.original)?;

        let copy_move = self.detect_clones()?;
        let resampling = self.detect_resampling()?;

        info!(
            "full analysis of {}: {} clone clusters, mean resampling probability {:.3}",
            self.path.as_deref().unwrap_or("<memory>"),
            copy_move.stats.clusters,
            resampling.mean_probability
        );

        Ok(FullAnalysisReport {
            copy_move,
            resampling,
            source: self.path.clone(),
        })
    }
}

/// Counts reported by the clone pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CloningResult {
    /// Keypoints found before response filtering.
    pub keypoints: usize,
    pub filtered: usize,
    /// Candidate matches whose endpoints are far enough apart.
    pub matches: usize,
    pub clusters: usize,
    pub regions: usize,
}

#[derive(Debug, Clone)]
pub struct CopyMoveResult {
    pub visualization: RgbImage,
    pub stats: CloningResult,
    /// Keypoints that survived response filtering; cluster matches index into this list.
    pub keypoints: Vec<Keypoint>,
    pub clusters: Vec<Cluster>,
}

impl CopyMoveResult {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.visualization.save(path)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub struct FullAnalysisReport {
    pub copy_move: CopyMoveResult,
    pub resampling: ResamplingResult,
    pub source: Option<String>,
}
