use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage, imageops::{self, FilterType}};
use ndarray::{Array2, s};

use crate::{SRegion, error::{ForensicsError, Result}};

pub fn rgb_to_gray(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut gray = GrayImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        let lum =
            (0.299 * pixel[0] as f64 + 0.587 * pixel[1] as f64 + 0.114 * pixel[2] as f64).round() as u8;
        gray.put_pixel(x, y, Luma([lum]));
    }

    gray
}

/// Builds an image from a row-major 8-bit buffer holding either BGR triples
/// (`channels == 3`) or single intensities (`channels == 1`).
pub fn from_bgr_buffer(data: &[u8], width: u32, height: u32, channels: usize) -> Result<DynamicImage> {
    if width == 0 || height == 0 {
        return Err(ForensicsError::InvalidImage(format!(
            "empty pixel grid ({width}x{height})"
        )));
    }

    let expected = width as usize * height as usize * channels;
    if data.len() != expected {
        return Err(ForensicsError::InvalidImage(format!(
            "buffer holds {} bytes, expected {expected} for {width}x{height}x{channels}",
            data.len()
        )));
    }

    match channels {
        1 => ImageBuffer::from_raw(width, height, data.to_vec())
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| ForensicsError::InvalidImage("gray buffer rejected".into())),
        3 => {
            let rgb = data
                .chunks_exact(3)
                .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
                .collect::<Vec<u8>>();
            RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| ForensicsError::InvalidImage("BGR buffer rejected".into()))
        }
        other => Err(ForensicsError::InvalidImage(format!(
            "unsupported channel count {other} (expected 1 or 3)"
        ))),
    }
}

pub fn validate_image(image: &DynamicImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ForensicsError::InvalidImage(format!(
            "empty image ({}x{})",
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

pub fn gray_to_array(image: &GrayImage) -> Array2<f64> {
    let (width, height) = image.dimensions();
    let mut arr = Array2::zeros((height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        arr[[y as usize, x as usize]] = pixel[0] as f64;
    }

    arr
}

pub fn gray_to_f32(image: &GrayImage) -> Array2<f32> {
    let (width, height) = image.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        image.get_pixel(x as u32, y as u32)[0] as f32
    })
}

pub fn array_to_gray(arr: &Array2<f64>) -> GrayImage {
    let (height, width) = arr.dim();
    let mut image = GrayImage::new(width as u32, height as u32);

    for y in 0..height {
        for x in 0..width {
            let value = arr[[y, x]].clamp(0.0, 255.0) as u8;
            image.put_pixel(x as u32, y as u32, Luma([value]));
        }
    }

    image
}

/// Maps a [0, 1] map onto the full 8-bit range.
pub fn unit_to_gray(arr: &Array2<f64>) -> GrayImage {
    array_to_gray(&arr.mapv(|v| (v * 255.0).round()))
}

pub fn normalize_unit(arr: &Array2<f64>) -> Array2<f64> {
    let min = arr.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = arr.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if !min.is_finite() || !max.is_finite() {
        return Array2::zeros(arr.dim());
    }

    let range = max - min + 1e-5;
    arr.mapv(|v| (v - min) / range)
}

/// Intersects `region` with a `width`x`height` image.
pub fn clip_region(region: &SRegion, width: u32, height: u32) -> Result<SRegion> {
    let x0 = region.x.min(width);
    let y0 = region.y.min(height);
    let x1 = region.x.saturating_add(region.width).min(width);
    let y1 = region.y.saturating_add(region.height).min(height);

    if x1 <= x0 || y1 <= y0 {
        return Err(ForensicsError::InvalidParameter(format!(
            "region {}x{} at ({}, {}) does not intersect the {width}x{height} image",
            region.width, region.height, region.x, region.y
        )));
    }

    Ok(SRegion { x: x0, y: y0, width: x1 - x0, height: y1 - y0 })
}

pub fn center_region(width: u32, height: u32, size: u32) -> SRegion {
    let crop_w = size.min(width);
    let crop_h = size.min(height);

    SRegion {
        x: (width - crop_w) / 2,
        y: (height - crop_h) / 2,
        width: crop_w,
        height: crop_h,
    }
}

/// Copies the window of `arr` covered by an already clipped `region`.
pub fn slice_region(arr: &Array2<f64>, region: &SRegion) -> Array2<f64> {
    let (x, y) = (region.x as usize, region.y as usize);
    arr.slice(s![y..y + region.height as usize, x..x + region.width as usize])
        .to_owned()
}

/// Downscales by `scale` (> 1 shrinks) with a triangle filter.
pub fn resize_gray(image: &GrayImage, scale: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let new_w = ((width as f32 / scale).round() as u32).max(1);
    let new_h = ((height as f32 / scale).round() as u32).max(1);

    if new_w == width && new_h == height {
        return image.clone();
    }

    imageops::resize(image, new_w, new_h, FilterType::Triangle)
}

pub fn gaussian_kernel_1d(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as i32;
    let two_sigma_sq = 2.0 * sigma * sigma;

    let mut kernel = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / two_sigma_sq).exp())
        .collect::<Vec<f32>>();
    let sum = kernel.iter().sum::<f32>();
    kernel.iter_mut().for_each(|k| *k /= sum);

    kernel
}

/// Separable Gaussian blur with clamp-to-edge borders.
pub fn gaussian_blur(arr: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 {
        return arr.clone();
    }

    let (height, width) = arr.dim();
    let kernel = gaussian_kernel_1d(sigma);
    let radius = (kernel.len() / 2) as isize;

    let mut horizontal = Array2::<f32>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - radius).clamp(0, width as isize - 1) as usize;
                sum += arr[[y, sx]] * weight;
            }
            horizontal[[y, x]] = sum;
        }
    }

    let mut result = Array2::<f32>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - radius).clamp(0, height as isize - 1) as usize;
                sum += horizontal[[sy, x]] * weight;
            }
            result[[y, x]] = sum;
        }
    }

    result
}

pub fn bilinear_sample(arr: &Array2<f32>, x: f32, y: f32) -> f32 {
    let (height, width) = arr.dim();
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let dx = x - x0 as f32;
    let dy = y - y0 as f32;

    let top = arr[[y0, x0]] * (1.0 - dx) + arr[[y0, x1]] * dx;
    let bottom = arr[[y1, x0]] * (1.0 - dx) + arr[[y1, x1]] * dx;

    top * (1.0 - dy) + bottom * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_buffer_is_swapped_to_rgb() {
        let image = from_bgr_buffer(&[10, 20, 30, 40, 50, 60], 2, 1, 3).unwrap();
        let rgb = image.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(rgb.get_pixel(1, 0).0, [60, 50, 40]);
    }

    #[test]
    fn malformed_buffers_are_rejected() {
        assert!(matches!(
            from_bgr_buffer(&[0; 5], 2, 1, 3),
            Err(ForensicsError::InvalidImage(_))
        ));
        assert!(matches!(
            from_bgr_buffer(&[], 0, 0, 1),
            Err(ForensicsError::InvalidImage(_))
        ));
        assert!(matches!(
            from_bgr_buffer(&[0; 8], 2, 2, 2),
            Err(ForensicsError::InvalidImage(_))
        ));
    }

    #[test]
    fn normalize_unit_spans_zero_to_one() {
        let arr = Array2::from_shape_vec((1, 3), vec![10.0, 20.0, 30.0]).unwrap();
        let norm = normalize_unit(&arr);
        assert_eq!(norm[[0, 0]], 0.0);
        assert!(norm[[0, 2]] < 1.0 && norm[[0, 2]] > 0.999);
    }

    #[test]
    fn gaussian_blur_preserves_constant_images() {
        let arr = Array2::from_elem((9, 7), 42.0f32);
        let blurred = gaussian_blur(&arr, 1.5);
        assert!(blurred.iter().all(|v| (v - 42.0).abs() < 1e-3));
    }

    #[test]
    fn bilinear_sample_interpolates_between_pixels() {
        let arr = Array2::from_shape_vec((2, 2), vec![0.0f32, 10.0, 20.0, 30.0]).unwrap();
        assert!((bilinear_sample(&arr, 0.5, 0.5) - 15.0).abs() < 1e-5);
        assert_eq!(bilinear_sample(&arr, -3.0, 9.0), 20.0);
    }

    #[test]
    fn clip_region_rejects_disjoint_regions() {
        let region = SRegion { x: 20, y: 0, width: 5, height: 5 };
        assert!(clip_region(&region, 10, 10).is_err());

        let region = SRegion { x: 5, y: 5, width: 50, height: 50 };
        assert_eq!(
            clip_region(&region, 10, 10).unwrap(),
            SRegion { x: 5, y: 5, width: 5, height: 5 }
        );
    }

    #[test]
    fn center_region_is_clipped_and_centred() {
        assert_eq!(center_region(80, 40, 32), SRegion { x: 24, y: 4, width: 32, height: 32 });
        assert_eq!(center_region(20, 10, 32), SRegion { x: 0, y: 0, width: 20, height: 10 });
    }

    #[test]
    fn slice_region_copies_the_window() {
        let arr = Array2::from_shape_fn((4, 5), |(r, c)| (r * 10 + c) as f64);
        let window = slice_region(&arr, &SRegion { x: 1, y: 2, width: 3, height: 2 });
        assert_eq!(window.dim(), (2, 3));
        assert_eq!(window[[0, 0]], 21.0);
        assert_eq!(window[[1, 2]], 33.0);
    }
}
