//! Finding sources that appear in a difference image but not in the reference.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::config::NewSourceConfig;
use crate::consts::NEW_SOURCE_PREFIX;
use crate::error::Result;
use crate::io::fiphot::read_photometry;
use crate::io::fistar::read_source_list;
use crate::matching::PositionIndex;
use crate::reference::CombinedPhotometricReference;
use crate::tools::{FiStar, Tools};

/// Writes the new sources found in `subtracted` to `output` and returns how many.
pub trait NewSourceFinder: Send + Sync {
    fn find(
        &self,
        subtracted: &Path,
        reference: &CombinedPhotometricReference,
        output: &Path,
        tools: &Tools,
    ) -> Result<usize>;
}

/// Extracts sources from the difference image and keeps the bright ones that
/// match no object in the reference's calibration photometry.
#[derive(Clone, Debug, Default)]
pub struct CatalogMatchFinder {
    pub config: NewSourceConfig,
}

impl CatalogMatchFinder {
    pub fn new(config: NewSourceConfig) -> Self {
        Self { config }
    }
}

impl NewSourceFinder for CatalogMatchFinder {
    fn find(
        &self,
        subtracted: &Path,
        reference: &CombinedPhotometricReference,
        output: &Path,
        tools: &Tools,
    ) -> Result<usize> {
        let detections_path = output.with_extension("fistar");
        tools.fistar(&FiStar {
            frame: subtracted,
            flux_threshold: self.config.flux_threshold,
            output: &detections_path,
        })?;
        let detections = read_source_list(&detections_path)?;
        let known = read_photometry(&reference.calibration_photometry_path)?;
        let index = PositionIndex::new(
            known.iter().map(|r| (r.x, r.y)).collect(),
            self.config.match_radius,
        );

        let mut out = BufWriter::new(fs::File::create(output)?);
        writeln!(out, "# id x y flux")?;
        let mut found = 0usize;
        for det in &detections {
            if det.flux < self.config.flux_threshold || index.nearest(det.x, det.y).is_some() {
                continue;
            }
            found += 1;
            writeln!(
                out,
                "{NEW_SOURCE_PREFIX}-{found:07} {:.3} {:.3} {:.1}",
                det.x, det.y, det.flux
            )?;
        }
        out.flush()?;
        let _ = fs::remove_file(&detections_path);

        if found > 0 {
            info!(frame = %subtracted.display(), found, "New sources in difference image");
        } else {
            debug!(frame = %subtracted.display(), "No new sources");
        }
        Ok(found)
    }
}
