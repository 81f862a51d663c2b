//! Building the combined photometric reference from a candidate set.
//!
//! Every candidate is convolved onto the master frame's PSF, the results are
//! stacked, and the stack gets calibration photometry against the field
//! catalog. Registration happens only once every artifact exists; a failed
//! build removes what it wrote and leaves the active reference alone.
//!
//! Field catalogs are already projected onto the chip: `id x y` per line in
//! the pixel frame of the astrometric reference, the same columns a source
//! list has. No sky-to-pixel projection happens here.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::PhotometryMode;
use crate::context::Context;
use crate::error::{IsmError, Result};
use crate::frame::Frame;
use crate::identity::{resolve_identity, FrameKey};
use crate::io::fistar::read_source_list;
use crate::io::fits::{read_frame, read_header, write_frame, HeaderValue};
use crate::io::quicklook::save_quicklook;
use crate::io::{find_sidecar, fits_stem};
use crate::matching::PositionIndex;
use crate::photref::{store_candidate_set, PhotorefCandidateSet};
use crate::progress::PipelineStage;
use crate::quality::compute_frame_quality;
use crate::reference::{combined_ref_stem, BuildInfo, CombinedPhotometricReference, ReferenceType};
use crate::stack::combine_frames;
use crate::tools::{FiConv, FiPhot, FiStar, GrTrans};

/// Flux threshold used when re-extracting sources from the combined frame.
const EXTRACTION_FLUX_THRESHOLD: f64 = 1000.0;

/// Paths written by one build, all under the reference directory.
///
/// A build writes under a staging stem and is promoted to the final stem only
/// once registered, so a failed rebuild leaves the active files alone.
struct BuildPaths {
    frame: PathBuf,
    jpeg: PathBuf,
    registration: PathBuf,
    extracted: PathBuf,
    source_list: PathBuf,
    calibration: PathBuf,
    work_dir: PathBuf,
}

impl BuildPaths {
    fn new(ref_dir: &Path, stem: &str) -> Self {
        Self {
            frame: ref_dir.join(format!("{stem}.fits")),
            jpeg: ref_dir.join(format!("{stem}.jpeg")),
            registration: ref_dir.join(format!("{stem}.reg")),
            extracted: ref_dir.join(format!("{stem}.fistar")),
            source_list: ref_dir.join(format!("{stem}.sourcelist")),
            calibration: ref_dir.join(format!("{stem}.cmrawphot")),
            work_dir: ref_dir.join(format!("{stem}-work")),
        }
    }

    fn staging(ref_dir: &Path, stem: &str) -> Self {
        Self::new(ref_dir, &format!(".staging-{stem}"))
    }

    fn products(&self) -> [&PathBuf; 6] {
        [
            &self.frame,
            &self.jpeg,
            &self.registration,
            &self.extracted,
            &self.source_list,
            &self.calibration,
        ]
    }

    /// Move every product that exists onto its name in `target`.
    fn promote(&self, target: &BuildPaths) -> Result<()> {
        for (from, to) in self.products().into_iter().zip(target.products()) {
            if from.exists() {
                fs::rename(from, to)?;
            }
        }
        Ok(())
    }

    fn remove_all(&self) {
        for path in self.products() {
            if path.exists() {
                let _ = fs::remove_file(path);
            }
        }
        self.remove_work_dir();
    }

    fn remove_work_dir(&self) {
        if self.work_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.work_dir) {
                warn!(dir = %self.work_dir.display(), error = %e, "Could not remove build work directory");
            }
        }
    }
}

fn require(path: &Path, what: &str) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(IsmError::missing(path, what))
    }
}

/// Convolve every candidate onto the master. Returns (candidate, convolved frame)
/// for each convolution that succeeded.
fn convolve_candidates(
    set: &PhotorefCandidateSet,
    master: &Path,
    paths: &BuildPaths,
    ctx: &Context,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    fs::create_dir_all(&paths.work_dir)?;
    let kernel_spec = ctx.config.combined.kernel_spec.as_str();
    let results = ctx.pool.map_reported(
        set.candidate_frames.clone(),
        |candidate| {
            let stem = fits_stem(candidate);
            let convolved = paths.work_dir.join(format!("{stem}-conv.fits"));
            let kernel = paths.work_dir.join(format!("{stem}-conv.kernel"));
            ctx.tools.ficonv(&FiConv {
                target: master,
                reference: candidate,
                registration: &paths.registration,
                kernel_spec,
                output_kernel: &kernel,
                output_convolved: &convolved,
            })?;
            Ok(convolved)
        },
        ctx.reporter(),
        Some(PipelineStage::Convolving),
    );

    let mut convolved = Vec::with_capacity(results.len());
    for r in results {
        match r.outcome {
            Ok(path) => convolved.push((r.task, path)),
            Err(e) => warn!(frame = %r.task.display(), error = %e, "Convolution failed, leaving frame out"),
        }
    }
    if convolved.is_empty() {
        return Err(IsmError::missing(&paths.work_dir, "convolved candidate frames"));
    }
    Ok(convolved)
}

fn stack_convolved(
    convolved: &[(PathBuf, PathBuf)],
    master: &Path,
    paths: &BuildPaths,
    reference_type: ReferenceType,
    ctx: &Context,
) -> Result<Frame> {
    let reporter = ctx.reporter();
    reporter.begin_stage(PipelineStage::Stacking, Some(convolved.len()));
    let mut frames = Vec::with_capacity(convolved.len());
    for (i, (_, path)) in convolved.iter().enumerate() {
        frames.push(read_frame(path)?);
        reporter.advance(i + 1);
    }
    let method = &ctx.config.combined.combine;
    let mut stacked = combine_frames(&frames, method)?;
    reporter.finish_stage();

    stacked.header = read_header(master)?;
    stacked
        .header
        .set("NCOMBINE", HeaderValue::Int(convolved.len() as i64));
    stacked
        .header
        .set("PHOTREF", HeaderValue::Str(reference_type.to_string()));
    stacked
        .header
        .set("COMBMETH", HeaderValue::Str(method.name().into()));
    write_frame(&stacked, &paths.frame)?;
    Ok(stacked)
}

/// Match re-extracted sources to catalog objects, writing `id x y` lines.
fn write_matched_source_list(catalog: &Path, paths: &BuildPaths, radius: f64) -> Result<usize> {
    let catalog_sources = read_source_list(catalog)?;
    let extracted = read_source_list(&paths.extracted)?;
    let index = PositionIndex::new(extracted.iter().map(|s| (s.x, s.y)).collect(), radius);

    let mut out = BufWriter::new(fs::File::create(&paths.source_list)?);
    writeln!(out, "# id x y")?;
    let mut matched = 0;
    for object in &catalog_sources {
        if let Some(i) = index.nearest(object.x, object.y) {
            writeln!(out, "{} {:.3} {:.3}", object.id, extracted[i].x, extracted[i].y)?;
            matched += 1;
        }
    }
    out.flush()?;
    Ok(matched)
}

fn calibration_photometry(
    key: &FrameKey,
    catalog: &Path,
    paths: &BuildPaths,
    ctx: &Context,
) -> Result<()> {
    let params = &ctx.config.combined;
    let source_list = match params.photometry_mode {
        PhotometryMode::CatProjected => {
            let placed = read_source_list(catalog)?
                .iter()
                .filter(|s| s.x.is_finite() && s.y.is_finite())
                .count();
            if placed == 0 {
                return Err(IsmError::missing(catalog, "catalog has no pixel positions"));
            }
            debug!(key = %key, objects = placed, "Photometering projected catalog");
            catalog.to_path_buf()
        }
        PhotometryMode::ReExtracted => {
            ctx.tools.fistar(&FiStar {
                frame: &paths.frame,
                flux_threshold: EXTRACTION_FLUX_THRESHOLD,
                output: &paths.extracted,
            })?;
            let matched = write_matched_source_list(catalog, paths, params.search_radius)?;
            if matched == 0 {
                return Err(IsmError::missing(
                    &paths.source_list,
                    "no extracted source matched the field catalog",
                ));
            }
            info!(key = %key, matched, "Matched extracted sources to catalog");
            paths.source_list.clone()
        }
    };

    ctx.reporter()
        .begin_stage(PipelineStage::CalibrationPhotometry, None);
    let result = ctx.tools.fiphot(&FiPhot {
        frame: &paths.frame,
        source_list: &source_list,
        apertures: &params.apertures,
        gain: params.ccd_gain,
        zeropoint: params.zeropoint(key.ccd),
        exposure_time: params.exposure_time,
        output: &paths.calibration,
    });
    ctx.reporter().finish_stage();
    result
}

#[allow(clippy::too_many_arguments)]
fn run_build(
    set: &PhotorefCandidateSet,
    master: &Path,
    key: &FrameKey,
    reference_type: ReferenceType,
    paths: &BuildPaths,
    final_paths: &BuildPaths,
    created_at: chrono::DateTime<Utc>,
    ctx: &Context,
) -> Result<CombinedPhotometricReference> {
    let master_sources = find_sidecar(master, ".fistar")
        .ok_or_else(|| IsmError::missing(master, "source list of photref master"))?;
    ctx.tools.grtrans(&GrTrans {
        sources: &master_sources,
        output_transform: &paths.registration,
    })?;
    require(&paths.registration, "convolution registration")?;

    let convolved = convolve_candidates(set, master, paths, ctx)?;
    let stacked = stack_convolved(&convolved, master, paths, reference_type, ctx)?;
    require(&paths.frame, "combined frame")?;
    if let Err(e) = save_quicklook(&stacked, &paths.jpeg) {
        warn!(key = %key, error = %e, "Could not render combined reference preview");
    }
    paths.remove_work_dir();

    let catalog = reference_type.catalog_path(&ctx.config.paths.catalog_dir, &key.field);
    require(&catalog, "field catalog")?;
    calibration_photometry(key, &catalog, paths, ctx)?;
    require(&paths.calibration, "calibration photometry")?;

    let target_metrics = compute_frame_quality(&paths.frame).metrics;
    let params = &ctx.config.combined;
    Ok(CombinedPhotometricReference {
        field: key.field.clone(),
        project_id: key.project_id,
        ccd: key.ccd,
        reference_type,
        is_active: true,
        created_at,
        frame_path: final_paths.frame.clone(),
        jpeg_path: final_paths.jpeg.clone(),
        convolve_target_path: master.to_path_buf(),
        registration_file_path: final_paths.registration.clone(),
        calibration_photometry_path: final_paths.calibration.clone(),
        build: BuildInfo {
            combine_method: params.combine.clone(),
            kernel_spec: params.kernel_spec.clone(),
            photometry_mode: params.photometry_mode,
            aperture_spec: params.apertures.clone(),
            field_catalog_path: catalog,
            candidate_set_key: set.cache_key.clone(),
            master_frame: master.to_path_buf(),
            combined_frames: convolved.into_iter().map(|(candidate, _)| candidate).collect(),
        },
        target_metrics,
    })
}

/// Build, register and record a combined photometric reference.
pub fn build_combined_ref(
    set: &PhotorefCandidateSet,
    reference_type: ReferenceType,
    ctx: &Context,
) -> Result<CombinedPhotometricReference> {
    let master = set
        .master_frame
        .clone()
        .filter(|_| !set.candidate_frames.is_empty())
        .ok_or_else(|| IsmError::NotFound {
            kind: "photref master",
            key: set.cache_key.clone(),
        })?;
    require(&master, "photref master frame")?;
    let key = resolve_identity(&master)?.key();

    let ref_dir = &ctx.config.paths.reference_dir;
    fs::create_dir_all(ref_dir)?;
    let created_at = Utc::now();
    let stem = combined_ref_stem(&key, reference_type);
    let paths = BuildPaths::new(ref_dir, &stem);
    let staged = BuildPaths::staging(ref_dir, &stem);

    let registered = run_build(set, &master, &key, reference_type, &staged, &paths, created_at, ctx)
        .and_then(|reference| {
            ctx.registry()?.register_combined_ref(&reference)?;
            Ok(reference)
        });
    let reference = match registered {
        Ok(r) => r,
        Err(e) => {
            warn!(key = %key, reference_type = %reference_type, error = %e, "Combined reference build failed");
            staged.remove_all();
            return Err(e);
        }
    };
    staged.promote(&paths)?;

    let mut updated = set.clone();
    updated.builds.push(reference.clone());
    if let Err(e) = store_candidate_set(&updated, ctx) {
        warn!(key = %set.cache_key, error = %e, "Could not record build in candidate set");
    }
    info!(key = %key, reference_type = %reference_type, frame = %reference.frame_path.display(),
        "Built combined photometric reference");
    Ok(reference)
}

pub fn get_active_combined_ref(
    key: &FrameKey,
    reference_type: ReferenceType,
    ctx: &Context,
) -> Result<CombinedPhotometricReference> {
    ctx.registry()?.get_active_combined_ref(key, reference_type)
}
