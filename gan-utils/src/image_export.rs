//! Turn raw generator output into viewable images.
//!
//! Generator dumps are flat little-endian `f32` files in CHW order. Only the
//! first `3 × H × W` values are used; they are min-max normalized over the
//! whole RGB block and written as an 8-bit RGB image.

use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use ndarray::ArrayView3;

const RGB_CHANNELS: usize = 3;

/// Read a raw little-endian `f32` dump. Trailing bytes that do not form a
/// whole value are ignored.
pub fn load_f32_bin<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(bytes
        .chunks_exact(std::mem::size_of::<f32>())
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Convert the leading `3 × height × width` CHW values into an RGB image.
pub fn chw_to_rgb_image(values: &[f32], width: u32, height: u32) -> Result<RgbImage> {
    let (w, h) = (width as usize, height as usize);
    let needed = RGB_CHANNELS * h * w;
    anyhow::ensure!(width > 0 && height > 0, "image dimensions must be > 0");
    anyhow::ensure!(
        values.len() >= needed,
        "expected at least {needed} values for a {width}x{height} RGB image, got {}",
        values.len()
    );
    let chw = ArrayView3::from_shape((RGB_CHANNELS, h, w), &values[..needed])
        .context("CHW view does not match image dimensions")?;

    let (min, max) = chw
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    let scale = if range > 0.0 { 255.0 / range } else { 0.0 };

    let mut image = RgbImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let (xi, yi) = (x as usize, y as usize);
        let channel = |c: usize| ((chw[(c, yi, xi)] - min) * scale) as u8;
        *pixel = Rgb([channel(0), channel(1), channel(2)]);
    }
    Ok(image)
}

/// Normalize a CHW buffer and save it as a PNG.
pub fn save_chw_png<P: AsRef<Path>>(values: &[f32], width: u32, height: u32, path: P) -> Result<()> {
    let path = path.as_ref();
    let image = chw_to_rgb_image(values, width, height)?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", path.display()))
}
