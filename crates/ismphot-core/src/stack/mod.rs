pub mod mean;
pub mod median;
pub mod sigma_clip;

use ndarray::{Array2, ArrayViewMut1, Axis};
use rayon::prelude::*;

use crate::config::CombineMethod;
use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{IsmError, Result};
use crate::frame::Frame;

/// Combine registered frames pixel-by-pixel. The output carries the first frame's header.
pub fn combine_frames(frames: &[Frame], method: &CombineMethod) -> Result<Frame> {
    check_dimensions(frames)?;
    match method {
        CombineMethod::Mean => mean::mean_stack(frames),
        CombineMethod::Median => median::median_stack(frames),
        CombineMethod::SigmaClip(params) => sigma_clip::sigma_clip_stack(frames, params),
    }
}

fn check_dimensions(frames: &[Frame]) -> Result<()> {
    let first = frames.first().ok_or(IsmError::EmptySequence)?;
    let expected = first.dim();
    for frame in &frames[1..] {
        if frame.dim() != expected {
            return Err(IsmError::DimensionMismatch {
                expected,
                got: frame.dim(),
            });
        }
    }
    Ok(())
}

/// Apply `reduce` to the finite values of every pixel column through the stack.
///
/// Registered frames carry NaN where the transform left no data, so those
/// values never reach the reducer. Parallelizes at the row level for large frames.
pub(crate) fn reduce_pixels<F>(frames: &[Frame], reduce: F) -> Result<Frame>
where
    F: Fn(&mut Vec<f32>) -> f32 + Sync,
{
    let first = frames.first().ok_or(IsmError::EmptySequence)?;
    let (h, w) = first.dim();
    let n = frames.len();
    let mut result = Array2::<f32>::zeros((h, w));

    let fill_row = |(row, mut out): (usize, ArrayViewMut1<f32>)| {
        let mut values = Vec::with_capacity(n);
        for (col, px) in out.iter_mut().enumerate() {
            values.clear();
            values.extend(
                frames
                    .iter()
                    .map(|f| f.data[[row, col]])
                    .filter(|v| v.is_finite()),
            );
            *px = if values.is_empty() {
                f32::NAN
            } else {
                reduce(&mut values)
            };
        }
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        result
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(fill_row);
    } else {
        result.axis_iter_mut(Axis(0)).enumerate().for_each(fill_row);
    }

    Ok(Frame::new(result, first.header.clone()))
}
