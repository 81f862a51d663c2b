use crate::error::Result;
use crate::frame::Frame;

use super::reduce_pixels;

/// Stack frames by computing the median of the finite values at each pixel.
///
/// Uses `select_nth_unstable` for O(n) median without full sort.
pub fn median_stack(frames: &[Frame]) -> Result<Frame> {
    reduce_pixels(frames, |values| compute_median(values))
}

pub(crate) fn compute_median(values: &mut [f32]) -> f32 {
    let n = values.len();
    match n {
        0 => f32::NAN,
        1 => values[0],
        _ if n % 2 == 1 => *values.select_nth_unstable_by(n / 2, |a, b| a.total_cmp(b)).1,
        _ => {
            let mid = n / 2;
            let upper = *values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1;
            let lower = *values[..mid]
                .select_nth_unstable_by(mid - 1, |a, b| a.total_cmp(b))
                .1;
            (lower + upper) / 2.0
        }
    }
}
