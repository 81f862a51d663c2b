//! Reference records held in the registry and the file names they live under.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CombineMethod, PhotometryMode};
use crate::error::IsmError;
use crate::identity::{FrameIdentity, FrameKey};
use crate::quality::QualityMetrics;

/// Temporal depth of a combined photometric reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    OneFrame,
    OneHour,
    OneNight,
}

impl ReferenceType {
    pub const ALL: [ReferenceType; 3] = [Self::OneFrame, Self::OneHour, Self::OneNight];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneFrame => "oneframe",
            Self::OneHour => "onehour",
            Self::OneNight => "onenight",
        }
    }

    /// Limiting magnitude of the field catalog matching this depth.
    pub fn catalog_depth(self) -> &'static str {
        match self {
            Self::OneFrame => "13.0",
            Self::OneHour => "15.0",
            Self::OneNight => "17.0",
        }
    }

    /// `{catalog_dir}/{field}-{depth}.catalog`
    pub fn catalog_path(self, catalog_dir: &Path, field: &str) -> PathBuf {
        catalog_dir.join(format!("{field}-{}.catalog", self.catalog_depth()))
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceType {
    type Err = IsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oneframe" => Ok(Self::OneFrame),
            "onehour" => Ok(Self::OneHour),
            "onenight" => Ok(Self::OneNight),
            other => Err(IsmError::InvalidConfig(format!(
                "unknown reference type {other:?}"
            ))),
        }
    }
}

/// Which frame is subtracted from which.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtractionDirection {
    /// Science minus convolved reference.
    #[default]
    Normal,
    /// Convolved reference minus science.
    Reverse,
}

impl SubtractionDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Reverse => "reverse",
        }
    }

    /// Tag used in difference artifact file names.
    pub fn file_tag(self) -> &'static str {
        match self {
            Self::Normal => "sub",
            Self::Reverse => "rsub",
        }
    }
}

impl fmt::Display for SubtractionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubtractionDirection {
    type Err = IsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "reverse" => Ok(Self::Reverse),
            other => Err(IsmError::InvalidConfig(format!(
                "unknown subtraction direction {other:?}"
            ))),
        }
    }
}

/// One row of the `astromrefs` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AstrometricReference {
    pub field: String,
    pub project_id: u32,
    pub ccd: u8,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub frame_path: PathBuf,
    pub jpeg_path: PathBuf,
    pub s_val: f64,
    pub d_val: f64,
    pub bg_val: f64,
    pub detection_count: usize,
    pub comment: String,
}

impl AstrometricReference {
    pub fn key(&self) -> FrameKey {
        FrameKey::new(self.project_id, self.field.clone(), self.ccd)
    }

    /// Source list copied beside the reference frame.
    pub fn fistar_path(&self) -> PathBuf {
        crate::io::with_suffix(&self.frame_path, ".fistar")
    }
}

/// Parameters of a combined reference build, stored with the registry row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub combine_method: CombineMethod,
    pub kernel_spec: String,
    pub photometry_mode: PhotometryMode,
    pub aperture_spec: String,
    pub field_catalog_path: PathBuf,
    /// Cache key of the candidate set the reference was built from.
    pub candidate_set_key: String,
    pub master_frame: PathBuf,
    pub combined_frames: Vec<PathBuf>,
}

/// One row of the `photrefs` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombinedPhotometricReference {
    pub field: String,
    pub project_id: u32,
    pub ccd: u8,
    pub reference_type: ReferenceType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub frame_path: PathBuf,
    pub jpeg_path: PathBuf,
    pub convolve_target_path: PathBuf,
    pub registration_file_path: PathBuf,
    pub calibration_photometry_path: PathBuf,
    pub build: BuildInfo,
    pub target_metrics: QualityMetrics,
}

impl CombinedPhotometricReference {
    pub fn key(&self) -> FrameKey {
        FrameKey::new(self.project_id, self.field.clone(), self.ccd)
    }
}

/// Reference-area stem `proj{P}-{field}-ccd{C}-astromref-{origstem}`.
pub fn astromref_stem(key: &FrameKey, original_stem: &str) -> String {
    format!("{key}-astromref-{original_stem}")
}

/// Reference-area stem `proj{P}-{field}-ccd{C}-combinedphotref-{type}`.
///
/// Every generation of a reference uses the same names; the registry's active
/// flag tells them apart.
pub fn combined_ref_stem(key: &FrameKey, reference_type: ReferenceType) -> String {
    format!("{key}-combinedphotref-{reference_type}")
}

/// Files produced by one difference-imaging run, named from the frame identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DifferenceArtifact {
    pub source_frame: PathBuf,
    pub reference_type: ReferenceType,
    pub subtraction_direction: SubtractionDirection,
    pub transform_path: PathBuf,
    pub convolution_kernel_path: PathBuf,
    pub subtracted_frame_path: PathBuf,
    pub photometry_output_path: PathBuf,
    pub new_sources_path: Option<PathBuf>,
}

impl DifferenceArtifact {
    /// Deterministic paths for `identity` in `out_dir`. `frame_dir` holds the
    /// aligned frame and its `.itrans`.
    pub fn planned(
        source_frame: &Path,
        identity: &FrameIdentity,
        reference_type: ReferenceType,
        direction: SubtractionDirection,
        out_dir: &Path,
    ) -> Self {
        let tag = identity.tag();
        let stem = format!("{tag}-{reference_type}-{}", direction.file_tag());
        let frame_dir = source_frame.parent().unwrap_or_else(|| Path::new("."));
        Self {
            source_frame: source_frame.to_path_buf(),
            reference_type,
            subtraction_direction: direction,
            transform_path: frame_dir.join(format!("{tag}.itrans")),
            convolution_kernel_path: out_dir.join(format!("{stem}.kernel")),
            subtracted_frame_path: out_dir.join(format!("{stem}.fits")),
            photometry_output_path: out_dir.join(format!("{stem}.iphot")),
            new_sources_path: None,
        }
    }

    pub fn new_sources_target(&self) -> PathBuf {
        self.photometry_output_path.with_extension("newsrc")
    }
}
