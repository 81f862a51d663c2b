use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_ZEROPOINTS;
use crate::error::{IsmError, Result};
use crate::stack::sigma_clip::SigmaClipParams;

/// Top-level configuration, passed explicitly to every component.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IsmConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub astromref: AstromrefConfig,
    #[serde(default)]
    pub photref: PhotrefSelectionConfig,
    #[serde(default)]
    pub combined: CombinedConfig,
    #[serde(default)]
    pub subtract: SubtractConfig,
}

impl IsmConfig {
    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool.workers == 0 {
            return Err(IsmError::InvalidConfig("pool.workers must be > 0".into()));
        }
        if self.photref.min_frames == 0 {
            return Err(IsmError::InvalidConfig(
                "photref.min_frames must be > 0".into(),
            ));
        }
        if let Some(warp) = &self.astromref.warp_check {
            if warp.threshold <= 0.0 {
                return Err(IsmError::InvalidConfig(
                    "astromref.warp_check.threshold must be > 0".into(),
                ));
            }
        }
        if self.subtract.disjoint_radius < 0.0 {
            return Err(IsmError::InvalidConfig(
                "subtract.disjoint_radius must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    /// System-wide reference-frame area.
    pub reference_dir: PathBuf,
    /// Content-addressed frame-info cache.
    pub cache_dir: PathBuf,
    /// SQLite registry of active references and ingested photometry.
    pub registry_path: PathBuf,
    /// Directory holding the per-field source catalogs.
    pub catalog_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = Path::new("/P/HP0/BASE");
        Self {
            reference_dir: base.join("reference-frames"),
            cache_dir: base.join("frameinfo-cache"),
            registry_path: base.join("reference-frames").join("TM-refinfo.sqlite"),
            catalog_dir: base.join("catalogs"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub grmatch: PathBuf,
    pub grtrans: PathBuf,
    pub fitrans: PathBuf,
    pub ficonv: PathBuf,
    pub fiphot: PathBuf,
    pub fistar: PathBuf,
    /// Wall-clock limit for a single tool invocation. `None` waits forever.
    pub timeout_secs: Option<u64>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            grmatch: "grmatch".into(),
            grtrans: "grtrans".into(),
            fitrans: "fitrans".into(),
            ficonv: "ficonv".into(),
            fiphot: "fiphot".into(),
            fistar: "fistar".into(),
            timeout_secs: Some(600),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub workers: usize,
    pub max_tasks_per_worker: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            max_tasks_per_worker: Some(1000),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WarpCheckConfig {
    /// Largest reduced chi-square allowed for the straight-line fit to the
    /// row and column median profiles.
    pub threshold: f64,
    /// Pixels trimmed from every edge before profiling.
    pub margin: usize,
}

impl Default for WarpCheckConfig {
    fn default() -> Self {
        Self {
            threshold: 2000.0,
            margin: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AstromrefConfig {
    /// Directory receiving `.itrans` and `-xtrns.fits` outputs; beside the frame if unset.
    pub output_dir: Option<PathBuf>,
    /// Warp check after transforming frames; disabled if `None`.
    pub warp_check: Option<WarpCheckConfig>,
}

impl Default for AstromrefConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            warp_check: Some(WarpCheckConfig::default()),
        }
    }
}

/// Thresholds for photometric reference candidate selection.
///
/// Every field participates in the selection cache key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhotrefSelectionConfig {
    pub min_frames: usize,
    pub max_hour_angle: f64,
    pub max_moon_phase: f64,
    pub max_moon_elevation: f64,
    pub max_zenith_distance: f64,
    pub max_background_stdev: f64,
    pub max_background_median: f64,
}

impl Default for PhotrefSelectionConfig {
    fn default() -> Self {
        Self {
            min_frames: 50,
            max_hour_angle: 3.0,
            max_moon_phase: 25.0,
            max_moon_elevation: 0.0,
            max_zenith_distance: 30.0,
            max_background_stdev: 10.0,
            max_background_median: 1000.0,
        }
    }
}

/// How convolved candidates are combined into one reference frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum CombineMethod {
    Mean,
    #[default]
    Median,
    SigmaClip(SigmaClipParams),
}

impl CombineMethod {
    /// ASCII name, fit for a FITS keyword value.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Median => "median",
            Self::SigmaClip(_) => "sigma-clip",
        }
    }
}

impl fmt::Display for CombineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mean => write!(f, "mean"),
            Self::Median => write!(f, "median"),
            Self::SigmaClip(p) => write!(f, "sigma-clip({}σ, {} iter)", p.sigma, p.iterations),
        }
    }
}

/// Source positions used for calibration photometry of a combined reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhotometryMode {
    /// Sources re-extracted from the combined frame.
    #[default]
    ReExtracted,
    /// Pixel positions straight from the field catalog, which must already be
    /// projected onto the chip.
    CatProjected,
}

impl fmt::Display for PhotometryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReExtracted => write!(f, "re-extracted"),
            Self::CatProjected => write!(f, "cat-projected"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CcdZeropoint {
    pub ccd: u8,
    pub zeropoint: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CombinedConfig {
    pub combine: CombineMethod,
    pub kernel_spec: String,
    pub apertures: String,
    pub photometry_mode: PhotometryMode,
    pub ccd_gain: Option<f64>,
    pub exposure_time: Option<f64>,
    /// Magnitude zero point per CCD.
    pub zeropoints: Vec<CcdZeropoint>,
    /// Pixel radius used when matching extracted sources to the catalog.
    pub search_radius: f64,
}

impl CombinedConfig {
    pub fn zeropoint(&self, ccd: u8) -> Option<f64> {
        self.zeropoints
            .iter()
            .find(|z| z.ccd == ccd)
            .map(|z| z.zeropoint)
    }
}

impl Default for CombinedConfig {
    fn default() -> Self {
        Self {
            combine: CombineMethod::Median,
            kernel_spec: "b/4;i/4;d=4/4".into(),
            apertures: "1.95:7.0:6.0,2.45:7.0:6.0,2.95:7.0:6.0".into(),
            photometry_mode: PhotometryMode::ReExtracted,
            ccd_gain: None,
            exposure_time: None,
            zeropoints: DEFAULT_ZEROPOINTS
                .into_iter()
                .map(|(ccd, zeropoint)| CcdZeropoint { ccd, zeropoint })
                .collect(),
            search_radius: 8.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewSourceConfig {
    /// Minimum flux of an unmatched detection to be catalogued.
    pub flux_threshold: f64,
    /// Pixel radius within which a detection matches a known source.
    pub match_radius: f64,
}

impl Default for NewSourceConfig {
    fn default() -> Self {
        Self {
            flux_threshold: 1000.0,
            match_radius: 3.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubtractConfig {
    /// Directory for subtracted frames and photometry; beside the frame if unset.
    pub output_dir: Option<PathBuf>,
    pub kernel_spec: String,
    /// Minimum separation between photometric apertures.
    pub disjoint_radius: f64,
    pub find_new_sources: bool,
    #[serde(default)]
    pub new_sources: NewSourceConfig,
}

impl Default for SubtractConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            kernel_spec: "b/4;i/4;d=4/4".into(),
            disjoint_radius: 2.0,
            find_new_sources: false,
            new_sources: NewSourceConfig::default(),
        }
    }
}
