use image::{DynamicImage, GrayImage};
use log::{debug, info};

use crate::{CloningResult, CopyMoveResult, analysis::clustering::ClusterBuilder, detection::{DetectorAlgorithm, DetectorParams, detect_and_match, matcher::matching_radius}, error::{ForensicsError, Result}, image_utils::{rgb_to_gray, validate_image}, report::visualization::Visualizer};

#[derive(Debug, Clone)]
pub struct CloneConfig {
    pub algorithm: DetectorAlgorithm,
    pub detector_params: DetectorParams,
    /// Percentage of the normalised response range to keep, 0-100.
    pub response_threshold: u8,
    /// Hamming radius as a percentage of 255, 0-100.
    pub matching_threshold: u8,
    /// Minimum offset as a percentage of half the shorter side, 0-100.
    pub distance_threshold: u8,
    pub min_cluster_size: usize,
    /// Nonzero pixels mark where keypoints may be detected.
    pub mask: Option<GrayImage>,
    pub draw_output: bool,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            algorithm: DetectorAlgorithm::Brisk,
            detector_params: DetectorParams::default(),
            response_threshold: 90,
            matching_threshold: 20,
            distance_threshold: 15,
            min_cluster_size: 5,
            mask: None,
            draw_output: true,
        }
    }
}

pub struct CloneDetector {
    config: CloneConfig,
}

impl CloneDetector {
    pub fn new() -> Self {
        Self { config: CloneConfig::default() }
    }

    pub fn with_config(config: CloneConfig) -> Result<Self> {
        for (name, value) in [
            ("response_threshold", config.response_threshold),
            ("matching_threshold", config.matching_threshold),
            ("distance_threshold", config.distance_threshold),
        ] {
            if value > 100 {
                return Err(ForensicsError::InvalidParameter(format!(
                    "{name} must be between 0 and 100, got {value}"
                )));
            }
        }

        if config.min_cluster_size == 0 {
            return Err(ForensicsError::InvalidParameter(
                "min_cluster_size must be at least 1".into(),
            ));
        }

        Ok(Self { config })
    }

    pub fn detect(&self, image: &DynamicImage) -> Result<CopyMoveResult> {
        validate_image(image)?;

        let rgb = image.to_rgb8();
        let gray = rgb_to_gray(&rgb);
        let (width, height) = gray.dimensions();

        if let Some(mask) = &self.config.mask {
            if mask.dimensions() != (width, height) {
                return Err(ForensicsError::InvalidParameter(format!(
                    "mask is {}x{} but the image is {width}x{height}",
                    mask.width(),
                    mask.height()
                )));
            }
        }

        let outcome = detect_and_match(
            &gray,
            self.config.algorithm,
            &self.config.detector_params,
            self.config.response_threshold,
            self.config.matching_threshold,
            self.config.mask.as_ref(),
        );

        let mut stats = CloningResult {
            keypoints: outcome.total_keypoints,
            filtered: outcome.features.len(),
            ..CloningResult::default()
        };

        if outcome.matches.is_empty() {
            info!(
                "{}: {} keypoints, {} filtered, no candidate matches",
                self.config.algorithm, stats.keypoints, stats.filtered
            );
            return Ok(CopyMoveResult {
                visualization: rgb,
                stats,
                keypoints: outcome.features.keypoints,
                clusters: Vec::new(),
            });
        }

        let clustering = ClusterBuilder::new(self.config.distance_threshold, self.config.min_cluster_size)
            .build(&outcome.features.keypoints, &outcome.matches, (width, height));

        stats.matches = clustering.matches.len();
        stats.clusters = clustering.clusters.len();

        let visualization = if self.config.draw_output {
            debug!("drawing {} clusters", clustering.clusters.len());
            Visualizer::new().draw_clone_matches(
                &rgb,
                &outcome.features.keypoints,
                &clustering.clusters,
                matching_radius(self.config.matching_threshold),
            )
        } else {
            rgb
        };

        info!(
            "{}: {} keypoints, {} filtered, {} matches, {} clusters",
            self.config.algorithm, stats.keypoints, stats.filtered, stats.matches, stats.clusters
        );

        Ok(CopyMoveResult {
            visualization,
            stats,
            keypoints: outcome.features.keypoints,
            clusters: clustering.clusters,
        })
    }
}

impl Default for CloneDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbImage};

    fn checker(size: u32) -> DynamicImage {
        let gray = GrayImage::from_fn(size, size, |x, y| {
            if ((x / 8) + (y / 8)) % 2 == 0 { Luma([40]) } else { Luma([210]) }
        });
        DynamicImage::ImageLuma8(gray)
    }

    #[test]
    fn thresholds_above_100_are_rejected() {
        let config = CloneConfig { matching_threshold: 101, ..CloneConfig::default() };
        assert!(matches!(
            CloneDetector::with_config(config),
            Err(ForensicsError::InvalidParameter(_))
        ));

        let config = CloneConfig { min_cluster_size: 0, ..CloneConfig::default() };
        assert!(CloneDetector::with_config(config).is_err());
    }

    #[test]
    fn empty_image_is_invalid() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(matches!(
            CloneDetector::new().detect(&image),
            Err(ForensicsError::InvalidImage(_))
        ));
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let config = CloneConfig { mask: Some(GrayImage::new(10, 10)), ..CloneConfig::default() };
        let detector = CloneDetector::with_config(config).unwrap();
        assert!(matches!(
            detector.detect(&checker(64)),
            Err(ForensicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn flat_image_gives_zeroed_stats_and_untouched_output() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(80, 80, image::Rgb([90, 90, 90])));
        let result = CloneDetector::new().detect(&image).unwrap();

        assert_eq!(result.stats.keypoints, 0);
        assert_eq!(result.stats.matches, 0);
        assert_eq!(result.stats.clusters, 0);
        assert_eq!(result.visualization, image.to_rgb8());
    }

    #[test]
    fn counts_are_consistent_on_a_repetitive_pattern() {
        let result = CloneDetector::new().detect(&checker(128)).unwrap();
        let stats = result.stats;

        assert!(stats.filtered <= stats.keypoints);
        assert!(stats.clusters <= stats.matches);
        assert_eq!(stats.regions, 0);
        assert_eq!(result.keypoints.len(), stats.filtered);
    }
}
