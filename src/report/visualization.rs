use std::{f32::consts::PI, path::Path};

use image::{GrayImage, Rgb, RgbImage};
use imageproc::{drawing::{draw_filled_rect_mut, draw_hollow_circle_mut, draw_line_segment_mut}, rect::Rect};

use crate::{FullAnalysisReport, analysis::clustering::Cluster, detection::Keypoint, error::Result};

/// Heat map colour stops, blue through cyan, green and yellow to red.
const HEAT_STOPS: [(f32, [f32; 3]); 5] = [
    (0.0, [0.0, 0.0, 255.0]),
    (0.25, [0.0, 255.0, 255.0]),
    (0.5, [0.0, 255.0, 0.0]),
    (0.75, [255.0, 255.0, 0.0]),
    (1.0, [255.0, 0.0, 0.0]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorScheme {
    HeatMap,
    Grayscale,
}

#[derive(Debug, Clone)]
pub struct VisualizationConfig {
    pub color_scheme: ColorScheme,
    pub show_labels: bool,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            color_scheme: ColorScheme::HeatMap,
            show_labels: true,
        }
    }
}

pub struct Visualizer {
    config: VisualizationConfig,
}

impl Visualizer {
    pub fn new() -> Self {
        Self { config: VisualizationConfig::default() }
    }

    pub fn with_config(config: VisualizationConfig) -> Self {
        Self { config }
    }

    pub fn grayscale() -> Self {
        Self::with_config(VisualizationConfig {
            color_scheme: ColorScheme::Grayscale,
            ..VisualizationConfig::default()
        })
    }

    pub fn create_heatmap(&self, gray: &GrayImage) -> RgbImage {
        let (width, height) = gray.dimensions();
        let mut heatmap = RgbImage::new(width, height);

        for (x, y, pixel) in gray.enumerate_pixels() {
            let intensity = pixel[0] as f32 / 255.0;
            heatmap.put_pixel(x, y, self.intensity_to_color(intensity));
        }

        heatmap
    }

    fn intensity_to_color(&self, intensity: f32) -> Rgb<u8> {
        let intensity = intensity.clamp(0.0, 1.0);

        match self.config.color_scheme {
            ColorScheme::Grayscale => {
                let v = (intensity * 255.0).round() as u8;
                Rgb([v, v, v])
            }
            ColorScheme::HeatMap => {
                let upper = HEAT_STOPS
                    .iter()
                    .position(|&(stop, _)| intensity <= stop)
                    .unwrap_or(HEAT_STOPS.len() - 1)
                    .max(1);
                let (t0, c0) = HEAT_STOPS[upper - 1];
                let (t1, c1) = HEAT_STOPS[upper];
                let t = (intensity - t0) / (t1 - t0);
                Rgb(std::array::from_fn(|i| (c0[i] + t * (c1[i] - c0[i])).round() as u8))
            }
        }
    }

    /// Circles both ends of every clustered match and joins them, coloured by
    /// direction (hue) and descriptor distance relative to `matching_radius` (value).
    pub fn draw_clone_matches(
        &self,
        original: &RgbImage,
        keypoints: &[Keypoint],
        clusters: &[Cluster],
        matching_radius: f64,
    ) -> RgbImage {
        let mut vis = original.clone();

        for m in clusters.iter().flat_map(|c| c.matches.iter()) {
            let (a, b) = (&keypoints[m.query], &keypoints[m.train]);
            let color = Self::match_color(a, b, m.distance, matching_radius);

            for kp in [a, b] {
                draw_hollow_circle_mut(
                    &mut vis,
                    (kp.x.round() as i32, kp.y.round() as i32),
                    kp.size.round() as i32,
                    color,
                );
            }
            draw_line_segment_mut(&mut vis, (a.x, a.y), (b.x, b.y), color);
        }

        vis
    }

    pub fn match_color(a: &Keypoint, b: &Keypoint, distance: u32, matching_radius: f64) -> Rgb<u8> {
        // A line has no head, so directions fold onto [0, π) and then span the wheel.
        let direction = (b.y - a.y).atan2(b.x - a.x).rem_euclid(PI);
        let hue = (direction / PI * 360.0) % 360.0;
        let value = if matching_radius > 0.0 {
            (distance as f64 / matching_radius).clamp(0.0, 1.0) as f32
        } else {
            0.0
        };

        hsv_to_rgb(hue, 1.0, value)
    }

    // Text is rendered as one solid block per glyph on a black plate.
    fn draw_label(&self, image: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>) {
        const GLYPH_W: u32 = 6;
        const GLYPH_H: u32 = 8;

        let plate = Rect::at(x as i32, y as i32).of_size(text.len() as u32 * GLYPH_W + 4, GLYPH_H + 4);
        draw_filled_rect_mut(image, plate, Rgb([0, 0, 0]));

        for (i, _) in text.chars().enumerate().filter(|(_, c)| !c.is_whitespace()) {
            let glyph = Rect::at((x + 2 + i as u32 * GLYPH_W) as i32, (y + 2) as i32).of_size(GLYPH_W - 1, GLYPH_H);
            draw_filled_rect_mut(image, glyph, color);
        }
    }

    /// Lays the images out left to right on a dark canvas, each under its label.
    pub fn create_comparison(&self, images: &[(&str, &RgbImage)]) -> RgbImage {
        if images.is_empty() {
            return RgbImage::new(1, 1);
        }

        let padding = 10u32;
        let label_height = 20u32;

        let max_height = images.iter().map(|(_, img)| img.height()).max().unwrap_or(0);
        let total_width = images.iter().map(|(_, img)| img.width()).sum::<u32>()
            + padding * (images.len() as u32 + 1);
        let total_height = max_height + label_height + padding * 2;

        let mut result = RgbImage::from_pixel(total_width, total_height, Rgb([40, 40, 40]));

        let mut x_offset = padding;
        for (label, img) in images {
            if self.config.show_labels {
                self.draw_label(&mut result, x_offset, padding / 2, label, Rgb([255, 255, 255]));
            }
            self.copy_image_to(&mut result, img, x_offset, label_height + padding);
            x_offset += img.width() + padding;
        }

        result
    }

    fn copy_image_to(&self, dest: &mut RgbImage, src: &RgbImage, offset_x: u32, offset_y: u32) {
        let (dest_w, dest_h) = dest.dimensions();

        for (x, y, pixel) in src.enumerate_pixels() {
            let (dx, dy) = (offset_x + x, offset_y + y);
            if dx < dest_w && dy < dest_h {
                dest.put_pixel(dx, dy, *pixel);
            }
        }
    }

    pub fn visualize_full_analysis(&self, original: &RgbImage, report: &FullAnalysisReport) -> ComprehensiveVisualization {
        let probability_heatmap = self.create_heatmap(&report.resampling.p_map);
        let spectrum = report
            .resampling
            .spectrum_image
            .as_ref()
            .map(|s| self.create_heatmap(s));

        ComprehensiveVisualization {
            original: original.clone(),
            copy_move: report.copy_move.visualization.clone(),
            probability_map: probability_heatmap,
            spectrum,
        }
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new()
    }
}

/// `h` in degrees [0, 360), `s` and `v` in [0, 1].
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    Rgb([
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
    ])
}

pub struct ComprehensiveVisualization {
    pub original: RgbImage,
    pub copy_move: RgbImage,
    pub probability_map: RgbImage,
    pub spectrum: Option<RgbImage>,
}

impl ComprehensiveVisualization {
    pub fn save_all<P: AsRef<Path>>(&self, directory: P) -> Result<()> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;

        self.original.save(directory.join("original.png"))?;
        self.copy_move.save(directory.join("copy_move.png"))?;
        self.probability_map.save(directory.join("probability_map.png"))?;
        if let Some(spectrum) = &self.spectrum {
            spectrum.save(directory.join("spectrum.png"))?;
        }

        Ok(())
    }

    pub fn create_report_image(&self) -> RgbImage {
        let visualizer = Visualizer::new();
        let mut panels = vec![
            ("Original", &self.original),
            ("Copy-Move", &self.copy_move),
            ("Probability Map", &self.probability_map),
        ];
        if let Some(spectrum) = &self.spectrum {
            panels.push(("Fourier of p-map", spectrum));
        }

        visualizer.create_comparison(&panels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::matcher::Match;

    fn kp(x: f32, y: f32) -> Keypoint {
        Keypoint { x, y, size: 3.0, angle: 0.0, response: 1.0, octave: 0 }
    }

    #[test]
    fn hsv_primaries() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Rgb([255, 0, 0]));
        assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), Rgb([0, 255, 0]));
        assert_eq!(hsv_to_rgb(90.0, 1.0, 0.0), Rgb([0, 0, 0]));
    }

    #[test]
    fn match_color_folds_direction_and_scales_value() {
        let a = kp(10.0, 10.0);
        let right = kp(40.0, 10.0);
        let left = kp(-20.0, 10.0);

        let forward = Visualizer::match_color(&a, &right, 51, 51.0);
        let backward = Visualizer::match_color(&a, &left, 51, 51.0);
        assert_eq!(forward, backward);
        assert_eq!(forward, Rgb([255, 0, 0]));

        assert_eq!(Visualizer::match_color(&a, &right, 0, 51.0), Rgb([0, 0, 0]));
        assert_eq!(Visualizer::match_color(&a, &right, 10, 0.0), Rgb([0, 0, 0]));
    }

    #[test]
    fn near_horizontal_matches_share_a_hue() {
        let a = kp(10.0, 10.0);
        let up = Visualizer::match_color(&a, &kp(40.0, 10.5), 51, 51.0);
        let down = Visualizer::match_color(&a, &kp(40.0, 9.5), 51, 51.0);

        for color in [up, down] {
            assert_eq!(color[0], 255);
            assert!(color[1] < 40 && color[2] < 40, "{color:?} is not red");
        }

        let vertical = Visualizer::match_color(&a, &kp(10.0, 40.0), 51, 51.0);
        assert_eq!(vertical, Rgb([0, 255, 255]));
    }

    #[test]
    fn clone_matches_are_drawn_without_touching_input() {
        let original = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        let keypoints = vec![kp(10.0, 10.0), kp(50.0, 50.0)];
        let clusters = vec![Cluster { matches: vec![Match { query: 0, train: 1, distance: 20 }] }];

        let vis = Visualizer::new().draw_clone_matches(&original, &keypoints, &clusters, 51.0);

        assert_ne!(vis, original);
        assert_ne!(*vis.get_pixel(30, 30), Rgb([0, 0, 0]));
        assert_eq!(*original.get_pixel(30, 30), Rgb([0, 0, 0]));
    }

    #[test]
    fn comparison_places_panels_side_by_side() {
        let left = RgbImage::from_pixel(20, 10, Rgb([255, 0, 0]));
        let right = RgbImage::from_pixel(30, 15, Rgb([0, 0, 255]));
        let combined = Visualizer::new().create_comparison(&[("A", &left), ("B", &right)]);

        assert_eq!(combined.dimensions(), (20 + 30 + 30, 15 + 20 + 20));
        assert_eq!(*combined.get_pixel(10, 30), Rgb([255, 0, 0]));
        assert_eq!(*combined.get_pixel(40, 30), Rgb([0, 0, 255]));
    }

    #[test]
    fn heatmap_runs_from_blue_to_red() {
        let mut gray = GrayImage::new(2, 1);
        gray.put_pixel(1, 0, image::Luma([255]));
        let rgb = Visualizer::new().create_heatmap(&gray);

        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 255]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([255, 0, 0]));
    }

    #[test]
    fn labels_are_drawn_above_panels() {
        let panel = RgbImage::from_pixel(40, 10, Rgb([0, 0, 255]));
        let labelled = Visualizer::new().create_comparison(&[("AB", &panel)]);
        let bare = Visualizer::with_config(VisualizationConfig { show_labels: false, ..VisualizationConfig::default() })
            .create_comparison(&[("AB", &panel)]);

        assert_eq!(*labelled.get_pixel(13, 8), Rgb([255, 255, 255]));
        assert_eq!(*bare.get_pixel(13, 8), Rgb([40, 40, 40]));
    }

    #[test]
    fn grayscale_heatmap_keeps_intensity() {
        let gray = GrayImage::from_pixel(4, 4, image::Luma([128]));
        let rgb = Visualizer::grayscale().create_heatmap(&gray);
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([128, 128, 128]));
    }
}
