//! Photometric reference candidate selection.
//!
//! Metrics for a frame list are cached under the hash of the list alone, so
//! re-running a selection with different thresholds reuses them. The selection
//! itself is cached under the hash of (list, thresholds) and is the one piece
//! of state a person may amend by hand.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{frame_list_key, frame_list_params_key};
use crate::config::PhotrefSelectionConfig;
use crate::context::Context;
use crate::error::{IsmError, Result};
use crate::io::fits_stem;
use crate::io::quicklook::render_fits_quicklook;
use crate::progress::PipelineStage;
use crate::quality::{compute_frame_quality, FrameQuality, QualityMetrics};
use crate::reference::CombinedPhotometricReference;

/// How many frames survived each selection step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub input: usize,
    pub passed_conditions: usize,
    pub top_by_s: usize,
    pub passed_background: usize,
    pub selected: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionDiagnostics {
    pub metrics: Vec<FrameQuality>,
    pub counts: StageCounts,
    /// Why nothing was selected, if so.
    pub failure: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhotorefCandidateSet {
    pub cache_key: String,
    pub source_frames: Vec<PathBuf>,
    pub selection_params: PhotrefSelectionConfig,
    pub master_frame: Option<PathBuf>,
    pub candidate_frames: Vec<PathBuf>,
    /// Quick-look image of each candidate, index-aligned with `candidate_frames`.
    pub candidate_jpegs: Vec<PathBuf>,
    pub diagnostics: SelectionDiagnostics,
    /// Combined references built from this set, oldest first.
    #[serde(default)]
    pub builds: Vec<CombinedPhotometricReference>,
}

impl PhotorefCandidateSet {
    pub fn is_empty(&self) -> bool {
        self.master_frame.is_none() || self.candidate_frames.is_empty()
    }

    fn metrics_of(&self, frame: &Path) -> Option<&QualityMetrics> {
        self.diagnostics
            .metrics
            .iter()
            .find(|q| q.frame == frame)
            .map(|q| &q.metrics)
    }

    /// Candidate with the smallest S, the softest PSF in the set.
    fn softest_candidate(&self) -> Option<PathBuf> {
        self.candidate_frames
            .iter()
            .filter_map(|f| self.metrics_of(f).map(|m| (f, m.median_s)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(f, _)| f.clone())
    }
}

/// Quality metrics for every frame, in input order.
pub fn collect_quality_metrics(frames: &[PathBuf], force: bool, ctx: &Context) -> Vec<FrameQuality> {
    let path = ctx.cache.frameinfo_path(&frame_list_key(frames));
    if !force {
        if let Some(cached) = ctx.cache.load::<Vec<FrameQuality>>(&path) {
            if cached.len() == frames.len() && cached.iter().zip(frames).all(|(q, f)| q.frame == *f) {
                debug!(frames = frames.len(), "Using cached frame metrics");
                return cached;
            }
            warn!(path = %path.display(), "Cached frame metrics do not match the frame list");
        }
    }

    let results = ctx.pool.map_reported(
        frames.to_vec(),
        |frame| Ok(compute_frame_quality(frame)),
        ctx.reporter(),
        Some(PipelineStage::CollectingMetrics),
    );
    let metrics: Vec<FrameQuality> = results
        .into_iter()
        .map(|r| match r.outcome {
            Ok(q) => q,
            Err(e) => {
                warn!(frame = %r.task.display(), error = %e, "Metric collection failed");
                FrameQuality {
                    frame: r.task,
                    metrics: QualityMetrics::default(),
                    frame_jd: None,
                }
            }
        })
        .collect();

    if let Err(e) = ctx.cache.store(&path, &metrics) {
        warn!(path = %path.display(), error = %e, "Could not cache frame metrics");
    }
    metrics
}

fn passes_conditions(m: &QualityMetrics, t: &PhotrefSelectionConfig) -> bool {
    m.is_rankable()
        && m.hour_angle.abs() < t.max_hour_angle
        && (m.moon_phase < t.max_moon_phase || m.moon_elevation < t.max_moon_elevation)
        && m.zenith_distance < t.max_zenith_distance
        && m.stdev_background < t.max_background_stdev
}

fn passes_background(m: &QualityMetrics, t: &PhotrefSelectionConfig) -> bool {
    m.median_background < t.max_background_median && m.stdev_background < t.max_background_stdev
}

/// Pure ranking over metrics. Returns (candidates, master, counts, failure).
pub fn rank_candidates(
    metrics: &[FrameQuality],
    t: &PhotrefSelectionConfig,
) -> (Vec<PathBuf>, Option<PathBuf>, StageCounts, Option<String>) {
    let mut counts = StageCounts {
        input: metrics.len(),
        ..StageCounts::default()
    };

    let mut pool: Vec<&FrameQuality> = metrics
        .iter()
        .filter(|q| passes_conditions(&q.metrics, t))
        .collect();
    counts.passed_conditions = pool.len();
    if pool.is_empty() {
        return (Vec::new(), None, counts, Some("no frame passed the observing-condition filters".into()));
    }

    pool.sort_by(|a, b| b.metrics.median_s.total_cmp(&a.metrics.median_s));
    pool.truncate(2 * t.min_frames);
    counts.top_by_s = pool.len();

    pool.sort_by(|a, b| a.metrics.median_d.abs().total_cmp(&b.metrics.median_d.abs()));
    pool.retain(|q| passes_background(&q.metrics, t));
    counts.passed_background = pool.len();
    if pool.is_empty() {
        return (Vec::new(), None, counts, Some("no frame passed the background filters".into()));
    }

    pool.truncate(t.min_frames);
    counts.selected = pool.len();

    let master = pool
        .iter()
        .min_by(|a, b| a.metrics.median_s.total_cmp(&b.metrics.median_s))
        .map(|q| q.frame.clone());
    let candidates = pool.iter().map(|q| q.frame.clone()).collect();
    (candidates, master, counts, None)
}

fn candidate_jpeg(selection_dir: &Path, frame: &Path) -> PathBuf {
    selection_dir.join(format!("{}.jpg", fits_stem(frame)))
}

/// Select photometric reference candidates from `frames`. Never fails: an
/// empty selection comes back with its diagnostics filled in.
pub fn select_candidates(
    frames: &[PathBuf],
    thresholds: &PhotrefSelectionConfig,
    force: bool,
    ctx: &Context,
) -> PhotorefCandidateSet {
    let cache_key =
        frame_list_params_key(frames, thresholds).unwrap_or_else(|_| frame_list_key(frames));
    let info_path = ctx.cache.selection_info_path(&cache_key);

    if !force {
        if let Some(cached) = ctx.cache.load::<PhotorefCandidateSet>(&info_path) {
            if cached.cache_key == cache_key {
                debug!(key = %cache_key, "Using cached photref selection");
                return cached;
            }
            warn!(path = %info_path.display(), "Cached selection has a different key, recomputing");
        }
    }

    let metrics = collect_quality_metrics(frames, force, ctx);
    let (candidates, master, counts, failure) = rank_candidates(&metrics, thresholds);

    let selection_dir = ctx.cache.selection_dir(&cache_key);
    let candidate_jpegs: Vec<PathBuf> = candidates
        .iter()
        .map(|f| candidate_jpeg(&selection_dir, f))
        .collect();
    if !candidates.is_empty() {
        if let Err(e) = fs::create_dir_all(&selection_dir) {
            warn!(dir = %selection_dir.display(), error = %e, "Could not create selection directory");
        }
        for (frame, jpeg) in candidates.iter().zip(&candidate_jpegs) {
            if let Err(e) = render_fits_quicklook(frame, jpeg) {
                warn!(frame = %frame.display(), error = %e, "Could not render candidate preview");
            }
        }
    }

    match &failure {
        Some(reason) => warn!(frames = frames.len(), reason = %reason, "No photref candidates selected"),
        None => info!(
            frames = frames.len(),
            candidates = candidates.len(),
            master = %master.as_deref().map(|p| p.display().to_string()).unwrap_or_default(),
            "Selected photref candidates"
        ),
    }

    let set = PhotorefCandidateSet {
        cache_key,
        source_frames: frames.to_vec(),
        selection_params: thresholds.clone(),
        master_frame: master,
        candidate_frames: candidates,
        candidate_jpegs,
        diagnostics: SelectionDiagnostics {
            metrics,
            counts,
            failure,
        },
        builds: Vec::new(),
    };
    if let Err(e) = ctx.cache.store(&info_path, &set) {
        warn!(path = %info_path.display(), error = %e, "Could not cache photref selection");
    }
    set
}

/// Load a stored candidate set by its cache key.
pub fn load_candidate_set(cache_key: &str, ctx: &Context) -> Result<PhotorefCandidateSet> {
    let path = ctx.cache.selection_info_path(cache_key);
    crate::cache::read_blob(&path)?.ok_or_else(|| IsmError::NotFound {
        kind: "photref candidate set",
        key: cache_key.to_string(),
    })
}

/// Write `set` back under its own cache key.
pub(crate) fn store_candidate_set(set: &PhotorefCandidateSet, ctx: &Context) -> Result<()> {
    ctx.cache
        .store(&ctx.cache.selection_info_path(&set.cache_key), set)
}

/// Remove candidates and/or replace the master, in place.
///
/// Removing a frame that is not a candidate does nothing. Removing the master
/// without naming a replacement promotes the softest remaining candidate.
pub fn amend_candidates(
    set: &PhotorefCandidateSet,
    removals: &[PathBuf],
    new_master: Option<&Path>,
    ctx: &Context,
) -> Result<PhotorefCandidateSet> {
    if let Some(master) = new_master {
        if !master.exists() {
            return Err(IsmError::missing(master, "replacement master frame"));
        }
    }

    let mut amended = set.clone();
    for removal in removals {
        let Some(idx) = amended.candidate_frames.iter().position(|f| f == removal) else {
            debug!(frame = %removal.display(), "Not a candidate, nothing to remove");
            continue;
        };
        amended.candidate_frames.remove(idx);
        if idx < amended.candidate_jpegs.len() {
            let jpeg = amended.candidate_jpegs.remove(idx);
            if jpeg.exists() {
                fs::remove_file(&jpeg)?;
            }
        }
        info!(key = %amended.cache_key, frame = %removal.display(), "Removed photref candidate");
    }

    match new_master {
        Some(master) => {
            info!(key = %amended.cache_key, master = %master.display(), "Replaced photref master");
            amended.master_frame = Some(master.to_path_buf());
        }
        None => {
            let master_removed = amended
                .master_frame
                .as_ref()
                .is_some_and(|m| removals.contains(m));
            if master_removed {
                amended.master_frame = amended.softest_candidate();
            }
        }
    }

    store_candidate_set(&amended, ctx)?;
    Ok(amended)
}
