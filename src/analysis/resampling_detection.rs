use std::path::Path;

use image::{DynamicImage, GrayImage, RgbImage};
use log::{info, warn};
use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{SRegion, analysis::{neighbor_regression::{NEIGHBOURS, NeighborRegression, RegressionConfig}, spectrum::{SpectralAnalyzer, SpectrumOptions}}, error::{ForensicsError, Result}, image_utils::{center_region, clip_region, gray_to_array, normalize_unit, rgb_to_gray, slice_region, unit_to_gray, validate_image}, report::visualization::Visualizer};

#[derive(Debug, Clone)]
pub struct ResamplingConfig {
    pub compute_fourier: bool,
    pub hanning: bool,
    pub upsample: bool,
    pub suppress_dc: bool,
    pub gamma: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub initial_variance: f64,
    pub outlier_density: f64,
    /// Seed for the random starting coefficients, `None` draws from entropy.
    pub seed: Option<u64>,
    /// Restricts the analysis to this rectangle.
    pub region: Option<SRegion>,
    pub max_dimension: u32,
    pub crop_size: u32,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self {
            compute_fourier: true,
            hanning: true,
            upsample: true,
            suppress_dc: true,
            gamma: 4.0,
            max_iterations: 50,
            tolerance: 0.01,
            initial_variance: 0.005,
            outlier_density: 0.1,
            seed: None,
            region: None,
            max_dimension: 800,
            crop_size: 512,
        }
    }
}

impl ResamplingConfig {
    fn regression(&self) -> RegressionConfig {
        RegressionConfig {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            initial_variance: self.initial_variance,
            outlier_density: self.outlier_density,
        }
    }

    fn spectrum(&self) -> SpectrumOptions {
        SpectrumOptions {
            hanning: self.hanning,
            upsample: self.upsample,
            suppress_dc: self.suppress_dc,
            gamma: self.gamma,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResamplingResult {
    /// EM weights in [0, 1], two pixels smaller than the analysed area in each dimension.
    pub probability_map: Array2<f64>,
    pub p_map: GrayImage,
    pub spectrum: Option<Array2<f64>>,
    pub spectrum_image: Option<GrayImage>,
    pub visualization: RgbImage,
    pub coefficients: [f64; NEIGHBOURS],
    pub iterations: usize,
    pub converged: bool,
    pub mean_probability: f64,
    pub analyzed_region: SRegion,
}

impl ResamplingResult {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.visualization.save(path)?;
        Ok(())
    }
}

pub struct ResamplingDetector {
    config: ResamplingConfig,
}

impl ResamplingDetector {
    pub fn new() -> Self {
        Self { config: ResamplingConfig::default() }
    }

    pub fn with_config(config: ResamplingConfig) -> Result<Self> {
        if config.gamma <= 0.0 || !config.gamma.is_finite() {
            return Err(ForensicsError::InvalidParameter(format!(
                "gamma must be positive, got {}",
                config.gamma
            )));
        }
        if config.max_iterations == 0 {
            return Err(ForensicsError::InvalidParameter(
                "max_iterations must be at least 1".into(),
            ));
        }
        if config.initial_variance <= 0.0 || config.outlier_density <= 0.0 {
            return Err(ForensicsError::InvalidParameter(
                "initial_variance and outlier_density must be positive".into(),
            ));
        }
        if config.crop_size < 3 {
            return Err(ForensicsError::InvalidParameter(format!(
                "crop_size must be at least 3, got {}",
                config.crop_size
            )));
        }

        Ok(Self { config })
    }

    pub fn detect(&self, image: &DynamicImage) -> Result<ResamplingResult> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.detect_with_rng(image, &mut rng)
    }

    pub fn detect_with_rng<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> Result<ResamplingResult> {
        validate_image(image)?;

        let gray = rgb_to_gray(&image.to_rgb8());
        let analyzed_region = self.select_region(gray.width(), gray.height())?;
        // The window keeps the intensity scale of the whole image.
        let normalized = slice_region(&normalize_unit(&gray_to_array(&gray)), &analyzed_region);

        let outcome = NeighborRegression::with_config(self.config.regression())
            .estimate_with_rng(&normalized, rng)?;
        let mean_probability = outcome.mean_weight();

        let p_map = unit_to_gray(&outcome.weights);
        let spectrum = if self.config.compute_fourier {
            Some(SpectralAnalyzer::new(self.config.spectrum())?.analyze(&outcome.weights))
        } else {
            None
        };
        let spectrum_image = spectrum.as_ref().map(unit_to_gray);

        let visualizer = Visualizer::grayscale();
        let p_map_rgb = visualizer.create_heatmap(&p_map);
        let visualization = match &spectrum_image {
            Some(spectrum_image) => {
                let spectrum_rgb = visualizer.create_heatmap(spectrum_image);
                visualizer.create_comparison(&[
                    ("Probability Map", &p_map_rgb),
                    ("Fourier of p-map", &spectrum_rgb),
                ])
            }
            None => visualizer.create_comparison(&[("Probability Map", &p_map_rgb)]),
        };

        info!(
            "resampling: {}x{} analysed, {} iterations, converged: {}, mean probability {:.3}",
            analyzed_region.width,
            analyzed_region.height,
            outcome.iterations,
            outcome.converged,
            mean_probability
        );

        Ok(ResamplingResult {
            probability_map: outcome.weights,
            p_map,
            spectrum,
            spectrum_image,
            visualization,
            coefficients: outcome.coefficients,
            iterations: outcome.iterations,
            converged: outcome.converged,
            mean_probability,
            analyzed_region,
        })
    }

    fn select_region(&self, width: u32, height: u32) -> Result<SRegion> {
        if let Some(region) = &self.config.region {
            return clip_region(region, width, height);
        }

        if width > self.config.max_dimension || height > self.config.max_dimension {
            let region = center_region(width, height, self.config.crop_size);
            warn!(
                "{width}x{height} image exceeds {}px, analysing the central {}x{} window",
                self.config.max_dimension, region.width, region.height
            );
            return Ok(region);
        }

        Ok(SRegion { x: 0, y: 0, width, height })
    }
}

impl Default for ResamplingDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn noise_image(width: u32, height: u32, seed: u64) -> DynamicImage {
        let mut rng = StdRng::seed_from_u64(seed);
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |_, _| Luma([rng.r#gen::<u8>()])))
    }

    fn seeded(seed: u64) -> ResamplingConfig {
        ResamplingConfig { seed: Some(seed), ..ResamplingConfig::default() }
    }

    #[test]
    fn invalid_gamma_is_rejected() {
        let config = ResamplingConfig { gamma: -1.0, ..ResamplingConfig::default() };
        assert!(matches!(
            ResamplingDetector::with_config(config),
            Err(ForensicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn outputs_have_expected_shapes() {
        let detector = ResamplingDetector::with_config(seeded(1)).unwrap();
        let result = detector.detect(&noise_image(40, 30, 2)).unwrap();

        assert_eq!(result.probability_map.dim(), (28, 38));
        assert_eq!(result.p_map.dimensions(), (38, 28));
        assert_eq!(result.spectrum.as_ref().map(|s| s.dim()), Some((56, 76)));
        assert_eq!(result.analyzed_region, SRegion { x: 0, y: 0, width: 40, height: 30 });
        assert!(result.visualization.width() > 38 + 76);
    }

    #[test]
    fn fourier_can_be_skipped() {
        let config = ResamplingConfig { compute_fourier: false, ..seeded(1) };
        let result = ResamplingDetector::with_config(config)
            .unwrap()
            .detect(&noise_image(20, 20, 3))
            .unwrap();

        assert!(result.spectrum.is_none() && result.spectrum_image.is_none());
    }

    #[test]
    fn region_of_interest_is_clipped() {
        let config = ResamplingConfig {
            region: Some(SRegion { x: 10, y: 5, width: 100, height: 12 }),
            compute_fourier: false,
            ..seeded(4)
        };
        let result = ResamplingDetector::with_config(config)
            .unwrap()
            .detect(&noise_image(30, 30, 5))
            .unwrap();

        assert_eq!(result.analyzed_region, SRegion { x: 10, y: 5, width: 20, height: 12 });
        assert_eq!(result.probability_map.dim(), (10, 18));
    }

    #[test]
    fn oversized_images_are_centre_cropped() {
        let config = ResamplingConfig {
            max_dimension: 50,
            crop_size: 32,
            compute_fourier: false,
            ..seeded(6)
        };
        let result = ResamplingDetector::with_config(config)
            .unwrap()
            .detect(&noise_image(80, 40, 7))
            .unwrap();

        assert_eq!(result.analyzed_region, SRegion { x: 24, y: 4, width: 32, height: 32 });
        assert_eq!(result.p_map.dimensions(), (30, 30));
    }

    #[test]
    fn crops_keep_the_whole_image_intensity_scale() {
        // The crop only sees 0..=100 while the border reaches 255.
        let mut rng = StdRng::seed_from_u64(8);
        let gray = GrayImage::from_fn(80, 40, |x, _| {
            if (24..56).contains(&x) { Luma([rng.gen_range(0..=100)]) } else { Luma([255]) }
        });
        let config = ResamplingConfig {
            max_dimension: 50,
            crop_size: 32,
            compute_fourier: false,
            ..seeded(3)
        };
        let image = DynamicImage::ImageLuma8(gray);
        let result = ResamplingDetector::with_config(config.clone())
            .unwrap()
            .detect(&image)
            .unwrap();

        let full = normalize_unit(&gray_to_array(&rgb_to_gray(&image.to_rgb8())));
        let window = slice_region(&full, &result.analyzed_region);
        assert!(window.iter().all(|&v| v < 0.4));

        let expected = NeighborRegression::with_config(config.regression())
            .estimate_with_rng(&window, &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(result.probability_map, expected.weights);
        assert_eq!(result.coefficients, expected.coefficients);
    }

    #[test]
    fn images_below_three_pixels_are_too_small() {
        let detector = ResamplingDetector::with_config(seeded(1)).unwrap();
        assert!(matches!(
            detector.detect(&noise_image(2, 8, 1)),
            Err(ForensicsError::ImageTooSmall(3))
        ));
    }
}
