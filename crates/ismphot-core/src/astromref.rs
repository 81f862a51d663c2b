//! Astrometric reference selection, registration and frame alignment.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::consts::ASTROMREF_TOP_K;
use crate::context::Context;
use crate::error::{IsmError, Result};
use crate::identity::{resolve_identity, FrameKey};
use crate::io::fits::read_frame;
use crate::io::quicklook::render_fits_quicklook;
use crate::io::{find_sidecar, fits_stem};
use crate::photref::collect_quality_metrics;
use crate::progress::PipelineStage;
use crate::quality::FrameQuality;
use crate::reference::{astromref_stem, AstrometricReference};
use crate::tools::{FiTrans, GrMatch};
use crate::warp::{check_warping, quarantine_frame};

/// The frame chosen as astrometric reference and the metrics it won on.
#[derive(Clone, Debug, PartialEq)]
pub struct AstromrefSelection {
    pub frame: PathBuf,
    pub s_val: f64,
    pub d_val: f64,
    pub bg_val: f64,
    pub detection_count: usize,
}

impl AstromrefSelection {
    fn from_quality(q: &FrameQuality) -> Self {
        Self {
            frame: q.frame.clone(),
            s_val: q.metrics.median_s,
            d_val: q.metrics.median_d,
            bg_val: q.metrics.median_background,
            detection_count: q.metrics.detection_count.unwrap_or(0),
        }
    }
}

/// Indices into `rankable` of the first `k` under `cmp`, ties kept in order.
fn top_k<F>(rankable: &[&FrameQuality], k: usize, cmp: F) -> Vec<usize>
where
    F: Fn(&FrameQuality, &FrameQuality) -> std::cmp::Ordering,
{
    let mut idx: Vec<usize> = (0..rankable.len()).collect();
    idx.sort_by(|&a, &b| cmp(rankable[a], rankable[b]));
    idx.truncate(k);
    idx
}

/// Pick the astrometric reference among `metrics`.
///
/// Frames are ranked four ways (S descending, |D| ascending, background
/// ascending, detection count descending) and the top [`ASTROMREF_TOP_K`] of
/// each kept. The first frame, in path order, present in all four wins. If
/// none is, the detection-count ranking is dropped, then background, then
/// |D|; with S alone the sharpest frame wins.
pub fn select_astromref(metrics: &[FrameQuality]) -> Option<AstromrefSelection> {
    let mut rankable: Vec<&FrameQuality> = metrics.iter().filter(|q| q.metrics.is_rankable()).collect();
    rankable.sort_by(|a, b| a.frame.cmp(&b.frame));
    if rankable.is_empty() {
        return None;
    }

    let by_s = top_k(&rankable, ASTROMREF_TOP_K, |a, b| b.metrics.median_s.total_cmp(&a.metrics.median_s));
    let by_d = top_k(&rankable, ASTROMREF_TOP_K, |a, b| {
        a.metrics.median_d.abs().total_cmp(&b.metrics.median_d.abs())
    });
    let by_bg = top_k(&rankable, ASTROMREF_TOP_K, |a, b| {
        a.metrics.median_background.total_cmp(&b.metrics.median_background)
    });
    let by_ndet = top_k(&rankable, ASTROMREF_TOP_K, |a, b| {
        b.metrics.detection_count.cmp(&a.metrics.detection_count)
    });

    let sets: [HashSet<usize>; 4] = [&by_s, &by_d, &by_bg, &by_ndet].map(|v| v.iter().copied().collect());
    for (level, depth) in [(4, "S, D, background, detections"), (3, "S, D, background"), (2, "S, D")] {
        let chosen = (0..rankable.len()).find(|i| sets[..level].iter().all(|s| s.contains(i)));
        if let Some(i) = chosen {
            info!(frame = %rankable[i].frame.display(), rankings = depth, "Selected astrometric reference");
            return Some(AstromrefSelection::from_quality(rankable[i]));
        }
    }

    let best = by_s.first().map(|&i| rankable[i])?;
    info!(frame = %best.frame.display(), rankings = "S", "Selected astrometric reference");
    Some(AstromrefSelection::from_quality(best))
}

fn existing_quicklook(frame: &Path) -> Option<PathBuf> {
    find_sidecar(frame, ".jpg").or_else(|| find_sidecar(frame, ".jpeg"))
}

/// Destination of a reference file and the staging name it is written under
/// until the registry commit succeeds.
struct Staged {
    staging: PathBuf,
    target: PathBuf,
}

impl Staged {
    fn new(ref_dir: &Path, name: String) -> Self {
        Self {
            staging: ref_dir.join(format!(".staging-{name}")),
            target: ref_dir.join(name),
        }
    }
}

fn discard(staged: &[&Staged]) {
    for file in staged {
        let _ = fs::remove_file(&file.staging);
    }
}

/// Copy `selection` into the reference area and make it the active astrometric
/// reference for `key`.
///
/// Files are staged next to their final names and only moved into place after
/// the registry commit, so a failure leaves the reference area and the active
/// row as they were.
pub fn register_astromref(
    selection: &AstromrefSelection,
    key: &FrameKey,
    comment: &str,
    ctx: &Context,
) -> Result<AstrometricReference> {
    let ref_dir = &ctx.config.paths.reference_dir;
    fs::create_dir_all(ref_dir)?;
    let stem = astromref_stem(key, &fits_stem(&selection.frame));
    let frame = Staged::new(ref_dir, format!("{stem}.fits"));
    let fistar = Staged::new(ref_dir, format!("{stem}.fistar"));
    let jpeg = Staged::new(ref_dir, format!("{stem}.jpeg"));
    let staged = [&frame, &fistar, &jpeg];

    let stage_all = || -> Result<()> {
        let source_list = find_sidecar(&selection.frame, ".fistar")
            .ok_or_else(|| IsmError::missing(&selection.frame, "source list of astrometric reference"))?;
        fs::copy(&selection.frame, &frame.staging)?;
        fs::copy(&source_list, &fistar.staging)?;
        match existing_quicklook(&selection.frame) {
            Some(existing) => {
                fs::copy(existing, &jpeg.staging)?;
            }
            None => render_fits_quicklook(&frame.staging, &jpeg.staging)?,
        }
        Ok(())
    };

    if let Err(e) = stage_all() {
        discard(&staged);
        warn!(key = %key, frame = %selection.frame.display(), error = %e, "Astrometric reference copy failed");
        return Err(e);
    }

    let reference = AstrometricReference {
        field: key.field.clone(),
        project_id: key.project_id,
        ccd: key.ccd,
        is_active: true,
        created_at: Utc::now(),
        frame_path: frame.target.clone(),
        jpeg_path: jpeg.target.clone(),
        s_val: selection.s_val,
        d_val: selection.d_val,
        bg_val: selection.bg_val,
        detection_count: selection.detection_count,
        comment: comment.to_string(),
    };
    let committed = ctx
        .registry()
        .and_then(|mut registry| registry.register_astromref(&reference));
    if let Err(e) = committed {
        discard(&staged);
        return Err(e);
    }
    for file in staged {
        fs::rename(&file.staging, &file.target)?;
    }
    Ok(reference)
}

pub fn get_active_astromref(key: &FrameKey, ctx: &Context) -> Result<AstrometricReference> {
    ctx.registry()?.get_active_astromref(key)
}

/// Select and register an astrometric reference from frames of one key.
pub fn generate_astromref(
    frames: &[PathBuf],
    comment: &str,
    force: bool,
    ctx: &Context,
) -> Result<Option<AstrometricReference>> {
    let metrics = collect_quality_metrics(frames, force, ctx);
    let Some(selection) = select_astromref(&metrics) else {
        warn!(frames = frames.len(), "No frame could be ranked for an astrometric reference");
        return Ok(None);
    };
    let key = resolve_identity(&selection.frame)?.key();
    register_astromref(&selection, &key, comment, ctx).map(Some)
}

/// A frame registered onto its astrometric reference.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedFrame {
    pub source: PathBuf,
    pub transform: PathBuf,
    pub registered: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AlignOutcome {
    Aligned(AlignedFrame),
    /// The registered frame failed the warp check; the files now live here.
    Quarantined(Vec<PathBuf>),
}

impl AlignOutcome {
    pub fn aligned(self) -> Option<AlignedFrame> {
        match self {
            Self::Aligned(a) => Some(a),
            Self::Quarantined(_) => None,
        }
    }
}

fn align_to(frame: &Path, reference: &AstrometricReference, ctx: &Context) -> Result<AlignOutcome> {
    let fistar =
        find_sidecar(frame, ".fistar").ok_or_else(|| IsmError::missing(frame, "source list"))?;
    let frame_dir = frame.parent().unwrap_or_else(|| Path::new("."));
    let out_dir = ctx
        .config
        .astromref
        .output_dir
        .as_deref()
        .unwrap_or(frame_dir);
    fs::create_dir_all(out_dir)?;

    let stem = fits_stem(frame);
    let transform = out_dir.join(format!("{stem}.itrans"));
    let registered = out_dir.join(format!("{stem}-xtrns.fits"));

    ctx.tools.grmatch(&GrMatch {
        reference_sources: &reference.fistar_path(),
        input_sources: &fistar,
        output_transform: &transform,
    })?;
    ctx.tools.fitrans(&FiTrans {
        frame,
        transform: &transform,
        output_frame: &registered,
    })?;

    if let Some(warp) = &ctx.config.astromref.warp_check {
        let verdict = check_warping(&read_frame(&registered)?, warp);
        if verdict.warped {
            warn!(
                frame = %frame.display(),
                row_chi2 = verdict.row_chi2,
                column_chi2 = verdict.column_chi2,
                threshold = warp.threshold,
                "Registered frame is warped"
            );
            return quarantine_frame(frame, &[out_dir]).map(AlignOutcome::Quarantined);
        }
    }

    info!(frame = %frame.display(), registered = %registered.display(), "Shift OK");
    Ok(AlignOutcome::Aligned(AlignedFrame {
        source: frame.to_path_buf(),
        transform,
        registered,
    }))
}

/// Register one frame onto the active astrometric reference of its key.
///
/// Errors mean no registered frame could be produced; a warp-check failure is
/// not an error but [`AlignOutcome::Quarantined`].
pub fn align_frame(frame: &Path, ctx: &Context) -> Result<AlignOutcome> {
    let key = resolve_identity(frame)?.key();
    let reference = get_active_astromref(&key, ctx)?;
    align_to(frame, &reference, ctx)
}

/// Align a batch. Each input frame maps to its registered frame, or `None`.
pub fn align_frames(frames: Vec<PathBuf>, ctx: &Context) -> Result<BTreeMap<PathBuf, Option<PathBuf>>> {
    let registry = ctx.registry()?;
    let mut references: HashMap<FrameKey, Option<AstrometricReference>> = HashMap::new();
    let mut tasks = Vec::with_capacity(frames.len());
    let mut results = BTreeMap::new();

    for frame in frames {
        match resolve_identity(&frame) {
            Ok(identity) => {
                let key = identity.key();
                let reference = references
                    .entry(key.clone())
                    .or_insert_with(|| match registry.get_active_astromref(&key) {
                        Ok(r) => Some(r),
                        Err(e) => {
                            warn!(key = %key, error = %e, "No astrometric reference");
                            None
                        }
                    })
                    .clone();
                match reference {
                    Some(r) => tasks.push((frame, r)),
                    None => {
                        results.insert(frame, None);
                    }
                }
            }
            Err(e) => {
                warn!(frame = %frame.display(), reason = %e, "Dropping unresolvable frame");
                results.insert(frame, None);
            }
        }
    }

    let outcomes = ctx.pool.map_reported(
        tasks,
        |(frame, reference)| align_to(frame, reference, ctx),
        ctx.reporter(),
        Some(PipelineStage::Aligning),
    );
    for r in outcomes {
        let (frame, _) = r.task;
        let registered = match r.outcome {
            Ok(AlignOutcome::Aligned(a)) => Some(a.registered),
            Ok(AlignOutcome::Quarantined(_)) => None,
            Err(e) => {
                warn!(frame = %frame.display(), error = %e, "Shift failed");
                None
            }
        };
        results.insert(frame, registered);
    }
    Ok(results)
}
