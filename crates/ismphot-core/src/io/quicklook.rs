use std::path::Path;

use image::{codecs::jpeg::JpegEncoder, GrayImage, Luma};

use crate::consts::EPSILON;
use crate::error::Result;
use crate::frame::Frame;
use crate::io::fits::read_frame;

/// Percentile clip points used for quick-look previews.
const LOW_PERCENTILE: f32 = 0.01;
const HIGH_PERCENTILE: f32 = 0.995;
const JPEG_QUALITY: u8 = 85;

/// Black/white points from percentiles of the finite pixel values.
fn stretch_limits(frame: &Frame) -> (f32, f32) {
    let mut sorted: Vec<f32> = frame.data.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return (0.0, 1.0);
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let lo_idx = ((n as f32 * LOW_PERCENTILE) as usize).min(n - 1);
    let hi_idx = ((n as f32 * HIGH_PERCENTILE) as usize).min(n - 1);
    (sorted[lo_idx], sorted[hi_idx])
}

/// Render a frame as an 8-bit grayscale JPEG with a percentile stretch.
pub fn save_quicklook(frame: &Frame, path: &Path) -> Result<()> {
    let (black, white) = stretch_limits(frame);
    let range = white - black;
    let range = if range.abs() < EPSILON { 1.0 } else { range };

    let mut img = GrayImage::new(frame.width() as u32, frame.height() as u32);
    for ((row, col), value) in frame.data.indexed_iter() {
        let scaled = if value.is_finite() {
            ((value - black) / range).clamp(0.0, 1.0)
        } else {
            0.0
        };
        img.put_pixel(col as u32, row as u32, Luma([(scaled * 255.0) as u8]));
    }

    let out = std::io::BufWriter::new(std::fs::File::create(path)?);
    let mut encoder = JpegEncoder::new_with_quality(out, JPEG_QUALITY);
    encoder.encode_image(&img)?;
    Ok(())
}

/// Read a FITS file and write its quick-look JPEG.
pub fn render_fits_quicklook(fits: &Path, jpeg: &Path) -> Result<()> {
    let frame = read_frame(fits)?;
    save_quicklook(&frame, jpeg)
}
