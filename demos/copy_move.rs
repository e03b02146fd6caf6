use std::{env, fs};

use tamper_forensics::{analysis::copy_move::{CloneConfig, CloneDetector}, detection::DetectorAlgorithm, error::Result};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let image_path = args.get(1).map(|s| s.as_str()).unwrap_or("evidences/copy_move.png");
    let algorithm = match args.get(2) {
        Some(name) => name.parse::<DetectorAlgorithm>()?,
        None => DetectorAlgorithm::default(),
    };

    let image = image::open(image_path)?;
    fs::create_dir_all("output")?;

    let config = CloneConfig { algorithm, ..CloneConfig::default() };
    let copy_move_detector = CloneDetector::with_config(config)?;
    let copy_move_result = copy_move_detector.detect(&image)?;

    copy_move_result.save("output/copy_move_result.png")?;

    let stats = copy_move_result.stats;
    println!("Algorithm: {}", algorithm);
    println!("Keypoints: {} ({} after response filtering)", stats.keypoints, stats.filtered);
    println!("Matches: {}", stats.matches);
    println!("Clusters: {}", stats.clusters);

    if !copy_move_result.clusters.is_empty() {
        println!("Detected clusters:");
        for (i, cluster) in copy_move_result.clusters.iter().take(5).enumerate() {
            let (dx, dy) = cluster.mean_offset(&copy_move_result.keypoints);
            println!(
                "  {}, {} matches | Offset: ({:.1}, {:.1})",
                i + 1,
                cluster.len(),
                dx,
                dy
            );
        }

        if copy_move_result.clusters.len() > 5 {
            println!("  ... and {} more clusters", copy_move_result.clusters.len() - 5);
        }
    }

    Ok(())
}
