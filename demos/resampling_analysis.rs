use std::{env, fs};

use tamper_forensics::{analysis::resampling_detection::{ResamplingConfig, ResamplingDetector}, error::Result};

fn main() -> Result<()> {
    let image_path = env::args().nth(1).unwrap_or_else(|| "evidences/resampled.png".to_string());
    let image = image::open(&image_path)?;
    fs::create_dir_all("output")?;

    let config = ResamplingConfig { seed: Some(0), ..ResamplingConfig::default() };
    let resampling_detector = ResamplingDetector::with_config(config)?;
    let resampling_result = resampling_detector.detect(&image)?;

    let region = resampling_result.analyzed_region;
    println!(
        "Analysed region: {}x{} at ({}, {})",
        region.width, region.height, region.x, region.y
    );
    println!(
        "EM iterations: {} (converged: {})",
        resampling_result.iterations, resampling_result.converged
    );
    println!("Mean probability: {:.3}", resampling_result.mean_probability);
    println!("Neighbour coefficients: {:.3?}", resampling_result.coefficients);

    resampling_result.p_map.save("output/resampling_p_map.png")?;
    if let Some(spectrum) = &resampling_result.spectrum_image {
        spectrum.save("output/resampling_spectrum.png")?;
    }
    resampling_result.save("output/resampling_analysis.png")?;

    Ok(())
}
