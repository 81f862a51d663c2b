//! Per-frame observing-condition and image-quality metrics.
//!
//! Metrics come from three places: the FITS header (observing conditions),
//! the `.fistar` source list (background, S, D) and the `.fiphot` photometry
//! (good object count and magnitude scatter). Any piece that cannot be read
//! leaves its fields NaN instead of failing.

pub mod stats;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::io::fiphot::read_photometry;
use crate::io::find_sidecar;
use crate::io::fistar::read_source_list;
use crate::io::fits::read_header;

use self::stats::{median_abs_dev, nan_median, nan_std};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    #[serde(deserialize_with = "null_as_nan")]
    pub zenith_distance: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub moon_distance: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub moon_elevation: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub moon_phase: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub hour_angle: f64,
    pub good_object_count: Option<usize>,
    #[serde(deserialize_with = "null_as_nan")]
    pub median_mag_error: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub median_abs_dev_mag: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub median_background: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub stdev_background: f64,
    /// Seeing proxy; higher is sharper.
    #[serde(deserialize_with = "null_as_nan")]
    pub median_s: f64,
    /// Ellipticity proxy; closer to zero is rounder.
    #[serde(deserialize_with = "null_as_nan")]
    pub median_d: f64,
    /// Number of sources in the `.fistar` list.
    pub detection_count: Option<usize>,
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            zenith_distance: f64::NAN,
            moon_distance: f64::NAN,
            moon_elevation: f64::NAN,
            moon_phase: f64::NAN,
            hour_angle: f64::NAN,
            good_object_count: None,
            median_mag_error: f64::NAN,
            median_abs_dev_mag: f64::NAN,
            median_background: f64::NAN,
            stdev_background: f64::NAN,
            median_s: f64::NAN,
            median_d: f64::NAN,
            detection_count: None,
        }
    }
}

impl QualityMetrics {
    /// Source-list metrics are present, so the frame can take part in rankings.
    pub fn is_rankable(&self) -> bool {
        self.median_s.is_finite() && self.median_d.is_finite() && self.median_background.is_finite()
    }
}

/// JSON has no NaN; it is written as `null` and must read back as NaN.
pub(crate) fn null_as_nan<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Metrics of one frame, kept even when every field is NaN.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameQuality {
    pub frame: PathBuf,
    pub metrics: QualityMetrics,
    /// Julian date of the exposure, from the `JD` header key.
    pub frame_jd: Option<f64>,
}

/// Compute metrics for a single frame. Never fails.
pub fn compute_frame_quality(frame: &Path) -> FrameQuality {
    let mut metrics = QualityMetrics::default();
    let mut frame_jd = None;

    match read_header(frame) {
        Ok(header) => {
            let value = |key: &str| header.get_f64(key).unwrap_or(f64::NAN);
            metrics.zenith_distance = value("Z");
            metrics.moon_distance = value("MOONDIST");
            metrics.moon_elevation = value("MOONELEV");
            metrics.moon_phase = value("MOONPH");
            metrics.hour_angle = value("HA");
            frame_jd = header.get_f64("JD");
        }
        Err(e) => debug!(frame = %frame.display(), error = %e, "Header unreadable"),
    }

    match find_sidecar(frame, ".fistar").map(|p| read_source_list(&p)) {
        Some(Ok(sources)) => {
            metrics.median_background = nan_median(sources.iter().map(|s| s.background));
            metrics.stdev_background = nan_std(sources.iter().map(|s| s.background));
            metrics.median_s = nan_median(sources.iter().map(|s| s.s));
            metrics.median_d = nan_median(sources.iter().map(|s| s.d));
            metrics.detection_count = Some(sources.len());
        }
        Some(Err(e)) => debug!(frame = %frame.display(), error = %e, "Source list unreadable"),
        None => debug!(frame = %frame.display(), "No source list"),
    }

    match find_sidecar(frame, ".fiphot").map(|p| read_photometry(&p)) {
        Some(Ok(rows)) => {
            let good: Vec<_> = rows.iter().filter(|r| r.good).collect();
            let mags: Vec<f64> = good.iter().map(|r| r.mag).collect();
            metrics.good_object_count = Some(good.len());
            metrics.median_mag_error = nan_median(good.iter().map(|r| r.err));
            metrics.median_abs_dev_mag = median_abs_dev(&mags);
        }
        Some(Err(e)) => debug!(frame = %frame.display(), error = %e, "Photometry unreadable"),
        None => debug!(frame = %frame.display(), "No photometry"),
    }

    FrameQuality {
        frame: frame.to_path_buf(),
        metrics,
        frame_jd,
    }
}
