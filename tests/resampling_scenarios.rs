use image::{DynamicImage, GrayImage, Luma};
use ndarray_stats::QuantileExt;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tamper_forensics::{SRegion, analysis::resampling_detection::{ResamplingConfig, ResamplingDetector}, error::ForensicsError};

fn noise_image(width: u32, height: u32, seed: u64) -> DynamicImage {
    let mut rng = StdRng::seed_from_u64(seed);
    DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |_, _| Luma([rng.r#gen::<u8>()])))
}

// Every odd column is the mean of its two neighbours, as after a 2x horizontal upscale.
fn column_interpolated(seed: u64) -> DynamicImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let base = (0..60)
        .map(|_| (0..40).map(|_| rng.r#gen::<u8>()).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    DynamicImage::ImageLuma8(GrayImage::from_fn(79, 60, |x, y| {
        let row = &base[y as usize];
        let k = (x / 2) as usize;
        if x % 2 == 0 {
            Luma([row[k]])
        } else {
            Luma([((row[k] as u16 + row[k + 1] as u16) / 2) as u8])
        }
    }))
}

fn detector(seed: u64) -> ResamplingDetector {
    ResamplingDetector::with_config(ResamplingConfig { seed: Some(seed), ..ResamplingConfig::default() })
        .unwrap()
}

#[test]
fn noise_has_a_low_probability_map() {
    let result = detector(5).detect(&noise_image(100, 100, 11)).unwrap();

    assert_eq!(result.probability_map.dim(), (98, 98));
    assert!(result.iterations >= 1 && result.iterations <= 50);
    assert!(result.probability_map.iter().all(|&w| (0.0..=1.0).contains(&w)));
    assert!(result.mean_probability < 0.3, "mean {}", result.mean_probability);
}

#[test]
fn interpolation_raises_the_probability_map() {
    let resampled = detector(9).detect(&column_interpolated(3)).unwrap();
    let plain = detector(9).detect(&noise_image(79, 60, 4)).unwrap();

    assert!(resampled.mean_probability > plain.mean_probability);
    assert!(resampled.mean_probability > 0.35);
}

#[test]
fn interpolation_period_shows_in_the_spectrum() {
    let result = detector(2).detect(&column_interpolated(8)).unwrap();
    let spectrum = result.spectrum.expect("fourier is on by default");

    // 58x77 map, doubled by the pyramid step.
    assert_eq!(spectrum.dim(), (116, 154));
    let (py, px) = spectrum.argmax().unwrap();
    assert_eq!(py, 58);
    assert!(((px as isize - 77).abs() - 38).abs() <= 2, "peak at column {px}");
    assert!(spectrum.iter().all(|&v| (0.0..=1.0).contains(&v)));
}

#[test]
fn seeded_runs_are_reproducible() {
    let image = noise_image(48, 40, 1);
    let a = detector(13).detect(&image).unwrap();
    let b = detector(13).detect(&image).unwrap();

    assert_eq!(a.coefficients, b.coefficients);
    assert_eq!(a.probability_map, b.probability_map);
    assert_eq!(a.visualization, b.visualization);
}

#[test]
fn disjoint_region_is_rejected() {
    let config = ResamplingConfig {
        region: Some(SRegion { x: 500, y: 0, width: 10, height: 10 }),
        seed: Some(1),
        ..ResamplingConfig::default()
    };
    let detector = ResamplingDetector::with_config(config).unwrap();

    assert!(matches!(
        detector.detect(&noise_image(40, 40, 2)),
        Err(ForensicsError::InvalidParameter(_))
    ));
}

#[test]
fn zero_iterations_are_rejected() {
    let config = ResamplingConfig { max_iterations: 0, ..ResamplingConfig::default() };
    assert!(matches!(
        ResamplingDetector::with_config(config),
        Err(ForensicsError::InvalidParameter(_))
    ));
}
