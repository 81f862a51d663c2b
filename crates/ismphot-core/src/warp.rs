//! Warp check on registered frames and quarantine of frames that fail it.
//!
//! A good registration leaves the sky background flat or smoothly tilted, so
//! the median of every row (and of every column) follows a straight line. A
//! folded transform piles up or tears the background, which shows as a large
//! reduced chi-square of that line fit.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{s, ArrayView1, Axis};
use tracing::{info, warn};

use crate::config::WarpCheckConfig;
use crate::consts::BADFRAMES_DIR;
use crate::error::Result;
use crate::frame::Frame;
use crate::io::fits_stem;
use crate::quality::stats::nan_median;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WarpVerdict {
    pub row_chi2: f64,
    pub column_chi2: f64,
    pub warped: bool,
}

/// Reduced chi-square of a least-squares line through the finite values of `profile`.
fn line_fit_chi2(profile: &[f64]) -> f64 {
    let points: Vec<(f64, f64)> = profile
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, v)| (i as f64, *v))
        .collect();
    if points.len() < 3 {
        return f64::NAN;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = mean_y - slope * mean_x;
    let ssr: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    ssr / (n - 2.0)
}

fn lane_median(lane: ArrayView1<'_, f32>) -> f64 {
    nan_median(lane.iter().map(|v| *v as f64))
}

/// Check a registered frame. Frames too small to trim by the margin pass.
pub fn check_warping(frame: &Frame, config: &WarpCheckConfig) -> WarpVerdict {
    let (h, w) = frame.dim();
    let m = config.margin;
    if h <= 2 * m + 2 || w <= 2 * m + 2 {
        warn!(height = h, width = w, margin = m, "Frame smaller than warp-check margin, skipping check");
        return WarpVerdict {
            row_chi2: f64::NAN,
            column_chi2: f64::NAN,
            warped: false,
        };
    }

    let inner = frame.data.slice(s![m..h - m, m..w - m]);
    let rows: Vec<f64> = inner.axis_iter(Axis(0)).map(lane_median).collect();
    let columns: Vec<f64> = inner.axis_iter(Axis(1)).map(lane_median).collect();
    let row_chi2 = line_fit_chi2(&rows);
    let column_chi2 = line_fit_chi2(&columns);

    WarpVerdict {
        row_chi2,
        column_chi2,
        warped: row_chi2 > config.threshold || column_chi2 > config.threshold,
    }
}

/// Files in `dir` that belong to the frame with stem `stem`.
fn stem_siblings(dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    let dotted = format!("{stem}.");
    let dashed = format!("{stem}-");
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file() && (name.starts_with(&dotted) || name.starts_with(&dashed)) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

/// Move `frame` and every sidecar sharing its stem into `badframes/`.
///
/// `extra_dirs` are searched too (e.g. a separate output directory holding
/// the registered frame and transform); each file goes into the `badframes`
/// directory beside it. Returns the new paths.
pub fn quarantine_frame(frame: &Path, extra_dirs: &[&Path]) -> Result<Vec<PathBuf>> {
    let stem = fits_stem(frame);
    let home = frame.parent().unwrap_or_else(|| Path::new("."));

    let mut dirs: Vec<&Path> = vec![home];
    for dir in extra_dirs {
        if !dirs.contains(dir) {
            dirs.push(dir);
        }
    }

    let mut moved = Vec::new();
    for dir in dirs {
        let files = stem_siblings(dir, &stem)?;
        if files.is_empty() {
            continue;
        }
        let bad = dir.join(BADFRAMES_DIR);
        fs::create_dir_all(&bad)?;
        for file in files {
            let target = bad.join(file.file_name().unwrap_or_default());
            move_file(&file, &target)?;
            moved.push(target);
        }
    }
    info!(frame = %frame.display(), files = moved.len(), "Quarantined warped frame");
    Ok(moved)
}
