use image::GrayImage;
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::filter::median_filter;

/// Binarize so that pupil-dark pixels (at or below `cutoff`) become foreground
/// (255) and everything brighter becomes background (0)
pub fn binarize_dark(img: &GrayImage, cutoff: u8) -> GrayImage {
    threshold(img, cutoff, ThresholdType::BinaryInverted)
}

/// Drop the top `fraction` of rows. Returns the trimmed image and the number of
/// rows removed.
pub fn trim_top(img: &GrayImage, fraction: f32) -> (GrayImage, u32) {
    let (width, height) = img.dimensions();
    let skip = ((height as f32 * fraction).floor() as u32).min(height.saturating_sub(1));
    let trimmed = image::imageops::crop_imm(img, 0, skip, width, height - skip).to_image();
    (trimmed, skip)
}

/// Apply a 3x3 median filter `iterations` times
pub fn smooth(img: &GrayImage, iterations: u32) -> GrayImage {
    let mut out = img.clone();
    for _ in 0..iterations {
        out = median_filter(&out, 1, 1);
    }
    out
}
