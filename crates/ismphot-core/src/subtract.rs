//! Per-frame difference imaging: convolve the active combined reference onto
//! a registered frame, subtract, and run differential photometry.
//!
//! ```text
//! Aligned -> Identified -> Subtracted -> [NewSourcesChecked] -> PhotometryComplete
//! ```
//!
//! Each step either advances or ends the frame in a [`DiffFailure`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{IsmError, Result};
use crate::frame::Frame;
use crate::identity::{resolve_identity, ResolutionFailure};
use crate::io::fits::{read_frame, write_frame, HeaderValue};
use crate::newsource::NewSourceFinder;
use crate::progress::PipelineStage;
use crate::reference::{CombinedPhotometricReference, DifferenceArtifact, ReferenceType, SubtractionDirection};
use crate::tools::{FiConv, FiPhotSubtracted};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffState {
    Aligned,
    Identified,
    Subtracted,
    NewSourcesChecked,
    PhotometryComplete,
}

impl fmt::Display for DiffState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aligned => write!(f, "aligned"),
            Self::Identified => write!(f, "identified"),
            Self::Subtracted => write!(f, "subtracted"),
            Self::NewSourcesChecked => write!(f, "new sources checked"),
            Self::PhotometryComplete => write!(f, "photometry complete"),
        }
    }
}

/// Terminal failure of one frame.
#[derive(Error, Debug)]
pub enum DiffFailure {
    #[error("{0}")]
    Unresolved(#[from] ResolutionFailure),

    #[error("no active {reference_type} reference for {key}")]
    NoReference {
        key: String,
        reference_type: ReferenceType,
    },

    /// The registry itself could not be read; says nothing about the reference.
    #[error("reference lookup failed: {0}")]
    ReferenceLookup(IsmError),

    #[error("subtraction failed: {0}")]
    SubtractionFailed(IsmError),

    #[error("missing artifact: {0}")]
    MissingArtifacts(IsmError),

    /// The subtracted frame exists and is usable; only its photometry failed.
    #[error("photometry failed on {}: {reason}", subtracted.display())]
    PhotometryFailed { subtracted: PathBuf, reason: IsmError },
}

impl DiffFailure {
    /// Subtracted frame left behind by a partial success.
    pub fn partial_output(&self) -> Option<&Path> {
        match self {
            Self::PhotometryFailed { subtracted, .. } => Some(subtracted),
            _ => None,
        }
    }
}

/// Per-run options of the difference-imaging worker.
#[derive(Clone, Copy)]
pub struct DiffRequest<'a> {
    pub reference_type: ReferenceType,
    pub direction: SubtractionDirection,
    pub new_sources: Option<&'a dyn NewSourceFinder>,
}

fn advance(frame: &Path, state: &mut DiffState, next: DiffState) {
    debug!(frame = %frame.display(), from = %state, to = %next, "Difference imaging");
    *state = next;
}

/// Pixel difference in the requested direction, keeping the science header.
pub fn subtract_frames(science: &Frame, convolved_ref: &Frame, direction: SubtractionDirection) -> Result<Frame> {
    if science.dim() != convolved_ref.dim() {
        return Err(IsmError::DimensionMismatch {
            expected: science.dim(),
            got: convolved_ref.dim(),
        });
    }
    let data = match direction {
        SubtractionDirection::Normal => &science.data - &convolved_ref.data,
        SubtractionDirection::Reverse => &convolved_ref.data - &science.data,
    };
    let mut header = science.header.clone();
    header.set("IMAGETYP", HeaderValue::Str("difference".into()));
    header.set("SUBDIR", HeaderValue::Str(direction.to_string()));
    Ok(Frame::new(data, header))
}

fn convolve_and_subtract(
    frame: &Path,
    reference: &CombinedPhotometricReference,
    artifact: &DifferenceArtifact,
    direction: SubtractionDirection,
    ctx: &Context,
) -> Result<()> {
    let convolved = artifact.subtracted_frame_path.with_extension("conv.fits");
    let result = (|| -> Result<()> {
        ctx.tools.ficonv(&FiConv {
            target: frame,
            reference: &reference.frame_path,
            registration: &reference.registration_file_path,
            kernel_spec: &ctx.config.subtract.kernel_spec,
            output_kernel: &artifact.convolution_kernel_path,
            output_convolved: &convolved,
        })?;
        let science = read_frame(frame)?;
        let convolved_ref = read_frame(&convolved)?;
        let difference = subtract_frames(&science, &convolved_ref, direction)?;
        write_frame(&difference, &artifact.subtracted_frame_path)
    })();
    if convolved.exists() {
        let _ = fs::remove_file(&convolved);
    }
    if result.is_err() && artifact.subtracted_frame_path.exists() {
        let _ = fs::remove_file(&artifact.subtracted_frame_path);
    }
    result
}

/// Run the difference-imaging state machine on one registered frame.
pub fn subtract_frame(
    frame: &Path,
    request: DiffRequest<'_>,
    ctx: &Context,
) -> std::result::Result<DifferenceArtifact, DiffFailure> {
    let mut state = DiffState::Aligned;

    let identity = resolve_identity(frame)?;
    let key = identity.key();
    let reference = ctx
        .registry()
        .and_then(|r| r.get_active_combined_ref(&key, request.reference_type))
        .map_err(|e| match e {
            IsmError::NotFound { .. } => DiffFailure::NoReference {
                key: key.to_string(),
                reference_type: request.reference_type,
            },
            other => {
                debug!(frame = %frame.display(), error = %other, "Reference lookup failed");
                DiffFailure::ReferenceLookup(other)
            }
        })?;
    advance(frame, &mut state, DiffState::Identified);

    let frame_dir = frame.parent().unwrap_or_else(|| Path::new("."));
    let out_dir = ctx
        .config
        .subtract
        .output_dir
        .clone()
        .unwrap_or_else(|| frame_dir.to_path_buf());
    let mut artifact =
        DifferenceArtifact::planned(frame, &identity, request.reference_type, request.direction, &out_dir);

    fs::create_dir_all(&out_dir).map_err(|e| DiffFailure::SubtractionFailed(e.into()))?;
    convolve_and_subtract(frame, &reference, &artifact, request.direction, ctx)
        .map_err(DiffFailure::SubtractionFailed)?;
    advance(frame, &mut state, DiffState::Subtracted);

    for (path, what) in [
        (&artifact.convolution_kernel_path, "convolution kernel"),
        (&artifact.transform_path, "geometric transform"),
        (&reference.calibration_photometry_path, "reference calibration photometry"),
    ] {
        if !path.exists() {
            for output in [&artifact.subtracted_frame_path, &artifact.convolution_kernel_path] {
                if output.exists() {
                    let _ = fs::remove_file(output);
                }
            }
            return Err(DiffFailure::MissingArtifacts(IsmError::missing(path, what)));
        }
    }

    if let Some(finder) = request.new_sources {
        let target = artifact.new_sources_target();
        match finder.find(&artifact.subtracted_frame_path, &reference, &target, &ctx.tools) {
            Ok(_) => artifact.new_sources_path = Some(target),
            Err(e) => warn!(frame = %frame.display(), error = %e, "New-source search failed"),
        }
        advance(frame, &mut state, DiffState::NewSourcesChecked);
    }

    ctx.tools
        .fiphot_subtracted(&FiPhotSubtracted {
            subtracted: &artifact.subtracted_frame_path,
            raw_photometry: &reference.calibration_photometry_path,
            kernel: &artifact.convolution_kernel_path,
            disjoint_radius: ctx.config.subtract.disjoint_radius,
            output: &artifact.photometry_output_path,
        })
        .map_err(|reason| DiffFailure::PhotometryFailed {
            subtracted: artifact.subtracted_frame_path.clone(),
            reason,
        })?;
    advance(frame, &mut state, DiffState::PhotometryComplete);

    info!(frame = %frame.display(), output = %artifact.photometry_output_path.display(), "Convsubphot OK");
    Ok(artifact)
}

/// Difference imaging over a batch of registered frames, in input order.
pub fn convsubphot(
    frames: Vec<PathBuf>,
    request: DiffRequest<'_>,
    ctx: &Context,
) -> Vec<(PathBuf, std::result::Result<DifferenceArtifact, DiffFailure>)> {
    ctx.pool
        .map_reported(
            frames,
            |frame| Ok(subtract_frame(frame, request, ctx)),
            ctx.reporter(),
            Some(PipelineStage::Subtracting),
        )
        .into_iter()
        .map(|r| {
            let outcome = match r.outcome {
                Ok(outcome) => outcome,
                Err(e) => Err(DiffFailure::SubtractionFailed(IsmError::ExternalTool {
                    tool: "convsubphot".into(),
                    reason: e.to_string(),
                })),
            };
            if let Err(e) = &outcome {
                warn!(frame = %r.task.display(), reason = %e, "Convsubphot failed");
            }
            (r.task, outcome)
        })
        .collect()
}
