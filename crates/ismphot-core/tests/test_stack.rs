use ndarray::Array2;

use ismphot_core::config::CombineMethod;
use ismphot_core::error::IsmError;
use ismphot_core::frame::Frame;
use ismphot_core::io::fits::{FitsHeader, HeaderValue};
use ismphot_core::stack::combine_frames;
use ismphot_core::stack::mean::mean_stack;
use ismphot_core::stack::median::median_stack;
use ismphot_core::stack::sigma_clip::{sigma_clip_stack, SigmaClipParams};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_frame(h: usize, w: usize, fill: f32) -> Frame {
    Frame::new(Array2::from_elem((h, w), fill), FitsHeader::new())
}

// ---------------------------------------------------------------------------
// Mean
// ---------------------------------------------------------------------------

#[test]
fn test_mean_of_two() {
    let result = mean_stack(&[make_frame(4, 4, 0.0), make_frame(4, 4, 1.0)]).unwrap();
    assert!((result.data[[0, 0]] - 0.5).abs() < 1e-6);
}

#[test]
fn test_mean_ignores_nan() {
    let mut f1 = make_frame(4, 4, 2.0);
    f1.data[[1, 1]] = f32::NAN;
    let f2 = make_frame(4, 4, 4.0);
    let result = mean_stack(&[f1, f2]).unwrap();
    assert!((result.data[[1, 1]] - 4.0).abs() < 1e-6);
    assert!((result.data[[0, 0]] - 3.0).abs() < 1e-6);
}

#[test]
fn test_all_nan_pixel_stays_nan() {
    let mut f1 = make_frame(2, 2, 1.0);
    let mut f2 = make_frame(2, 2, 1.0);
    f1.data[[0, 1]] = f32::NAN;
    f2.data[[0, 1]] = f32::NAN;
    let result = median_stack(&[f1, f2]).unwrap();
    assert!(result.data[[0, 1]].is_nan());
}

// ---------------------------------------------------------------------------
// Median
// ---------------------------------------------------------------------------

#[test]
fn test_median_odd_count() {
    let frames = [make_frame(8, 8, 0.1), make_frame(8, 8, 0.9), make_frame(8, 8, 0.5)];
    let result = median_stack(&frames).unwrap();
    for v in result.data.iter() {
        assert!((*v - 0.5).abs() < 1e-6);
    }
}

#[test]
fn test_median_even_count() {
    let result = median_stack(&[make_frame(8, 8, 0.2), make_frame(8, 8, 0.8)]).unwrap();
    for v in result.data.iter() {
        assert!((*v - 0.5).abs() < 1e-5);
    }
}

#[test]
fn test_median_large_frame_parallel_path() {
    let frames: Vec<Frame> = (0..5).map(|i| make_frame(300, 300, i as f32)).collect();
    let result = median_stack(&frames).unwrap();
    assert!((result.data[[150, 150]] - 2.0).abs() < 1e-6);
    assert!((result.data[[299, 0]] - 2.0).abs() < 1e-6);
}

// ---------------------------------------------------------------------------
// Sigma clip
// ---------------------------------------------------------------------------

#[test]
fn test_sigma_clip_rejects_outlier() {
    let mut frames: Vec<Frame> = (0..10).map(|_| make_frame(4, 4, 100.0)).collect();
    frames[0].data[[2, 2]] = 10_000.0;
    for (i, f) in frames.iter_mut().enumerate() {
        f.data[[0, 0]] = 100.0 + i as f32 * 0.1;
    }
    let params = SigmaClipParams {
        iterations: 3,
        sigma: 2.0,
    };
    let result = sigma_clip_stack(&frames, &params).unwrap();
    assert!((result.data[[2, 2]] - 100.0).abs() < 1e-3);
    assert!((result.data[[1, 1]] - 100.0).abs() < 1e-6);
}

// ---------------------------------------------------------------------------
// combine_frames dispatch
// ---------------------------------------------------------------------------

#[test]
fn test_combine_keeps_first_header() {
    let mut first = make_frame(3, 3, 1.0);
    first.header.set("OBJECT", HeaderValue::Str("G1234+5678_abc".into()));
    let second = make_frame(3, 3, 3.0);
    let result = combine_frames(&[first, second], &CombineMethod::Mean).unwrap();
    assert_eq!(result.header.get_str("OBJECT").as_deref(), Some("G1234+5678_abc"));
    assert!((result.data[[0, 0]] - 2.0).abs() < 1e-6);
}

#[test]
fn test_combine_dimension_mismatch() {
    let err = combine_frames(&[make_frame(3, 3, 1.0), make_frame(4, 3, 1.0)], &CombineMethod::Median)
        .unwrap_err();
    assert!(matches!(err, IsmError::DimensionMismatch { .. }));
}

#[test]
fn test_combine_empty() {
    let frames: Vec<Frame> = vec![];
    let err = combine_frames(&frames, &CombineMethod::SigmaClip(SigmaClipParams::default())).unwrap_err();
    assert!(matches!(err, IsmError::EmptySequence));
}
