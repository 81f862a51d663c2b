//! Smoothed spatial models of source shape (`.xysdk`).
//!
//! `grtrans` fits the S, D and K shape columns of a source list as a 4th order
//! polynomial over the chip. Photometry on subtracted frames reads these
//! coefficients, so they are produced per frame ahead of time.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::context::Context;
use crate::error::{IsmError, Result};
use crate::progress::PipelineStage;
use crate::tools::GrTrans;

/// Where the coefficients of `source_list` go: beside it, or in `output_dir`.
pub fn xysdk_path(source_list: &Path, output_dir: Option<&Path>) -> PathBuf {
    let name = source_list.with_extension("xysdk");
    match (output_dir, name.file_name()) {
        (Some(dir), Some(file)) => dir.join(file),
        _ => name,
    }
}

/// Fit the smoothed shape coefficients of one source list.
pub fn smooth_shape_coefficients(
    source_list: &Path,
    output_dir: Option<&Path>,
    ctx: &Context,
) -> Result<PathBuf> {
    if !source_list.is_file() {
        return Err(IsmError::missing(source_list, "source list"));
    }
    if let Some(dir) = output_dir {
        fs::create_dir_all(dir)?;
    }
    let output = xysdk_path(source_list, output_dir);
    ctx.tools.grtrans(&GrTrans {
        sources: source_list,
        output_transform: &output,
    })?;
    info!(sources = %source_list.display(), xysdk = %output.display(), "XYSDK coefficients OK");
    Ok(output)
}

/// Fit coefficients for a batch of source lists on the task pool.
///
/// Every input maps to its `.xysdk` file, or `None` when the fit failed; a
/// failed fit leaves no output behind.
pub fn smoothed_xysdk_coeffs(
    source_lists: Vec<PathBuf>,
    output_dir: Option<&Path>,
    ctx: &Context,
) -> BTreeMap<PathBuf, Option<PathBuf>> {
    ctx.pool
        .map_reported(
            source_lists,
            |sources| smooth_shape_coefficients(sources, output_dir, ctx),
            ctx.reporter(),
            Some(PipelineStage::SmoothingShapes),
        )
        .into_iter()
        .map(|r| match r.outcome {
            Ok(output) => (r.task, Some(output)),
            Err(e) => {
                warn!(sources = %r.task.display(), error = %e, "XYSDK coefficients failed");
                (r.task, None)
            }
        })
        .collect()
}
