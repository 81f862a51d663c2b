use crate::error::Result;
use crate::frame::Frame;

use super::reduce_pixels;

/// Stack frames by computing the mean of the finite values at each pixel.
pub fn mean_stack(frames: &[Frame]) -> Result<Frame> {
    reduce_pixels(frames, |values| {
        let sum: f64 = values.iter().map(|v| *v as f64).sum();
        (sum / values.len() as f64) as f32
    })
}
