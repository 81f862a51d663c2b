use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::Frame;

use super::reduce_pixels;

/// Parameters for sigma-clipped mean stacking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SigmaClipParams {
    /// Number of rejection iterations (default: 2).
    pub iterations: usize,
    /// Values beyond mean +/- sigma * stddev are rejected (default: 3.0).
    pub sigma: f32,
}

impl Default for SigmaClipParams {
    fn default() -> Self {
        Self {
            iterations: 2,
            sigma: 3.0,
        }
    }
}

/// Stack frames using a sigma-clipped mean.
///
/// Per pixel: reject values more than `sigma` standard deviations from the mean
/// of the surviving values, for up to `iterations` rounds, then average what is left.
/// If a round would reject everything the previous survivors are kept.
pub fn sigma_clip_stack(frames: &[Frame], params: &SigmaClipParams) -> Result<Frame> {
    reduce_pixels(frames, |values| {
        for _ in 0..params.iterations {
            let (mean, stddev) = mean_stddev(values);
            if stddev < 1e-10 {
                break;
            }
            let lo = mean - params.sigma as f64 * stddev;
            let hi = mean + params.sigma as f64 * stddev;
            let before = values.len();
            let kept: Vec<f32> = values
                .iter()
                .copied()
                .filter(|v| (lo..=hi).contains(&(*v as f64)))
                .collect();
            if kept.is_empty() || kept.len() == before {
                break;
            }
            *values = kept;
        }
        mean_stddev(values).0 as f32
    })
}

fn mean_stddev(values: &[f32]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().map(|v| *v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|v| {
            let d = *v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}
