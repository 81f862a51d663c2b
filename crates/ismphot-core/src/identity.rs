//! Frame identity: (station, frame number, CCD) from the file name and
//! (field, project) from the FITS header.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::FIELD_CCDS;
use crate::io::fits::{read_header, FitsHeader};

fn frame_regex() -> &'static Regex {
    static FRAME_REGEX: OnceLock<Regex> = OnceLock::new();
    FRAME_REGEX.get_or_init(|| {
        Regex::new(r"(\d{1})-(\d{6}\w{0,1})_(\d{1})").expect("frame regex is valid")
    })
}

fn field_regex() -> &'static Regex {
    static FIELD_REGEX: OnceLock<Regex> = OnceLock::new();
    FIELD_REGEX.get_or_init(|| {
        Regex::new(r"^G(\d{2})(\d{2})([+-]\d{2})(\d{2})_(\w{3})$").expect("field regex is valid")
    })
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionFailure {
    #[error("{path}: file name does not match the frame pattern")]
    FilenamePattern { path: PathBuf },

    #[error("{path}: header unreadable: {reason}")]
    HeaderUnreadable { path: PathBuf, reason: String },

    #[error("{path}: header has no {key} keyword")]
    MissingHeaderKey { path: PathBuf, key: &'static str },

    #[error("{path}: malformed field {field:?}")]
    InvalidField { path: PathBuf, field: String },

    #[error("{path}: CCD {ccd} is not one of 5, 6, 7, 8")]
    InvalidCcd { path: PathBuf, ccd: u8 },

    #[error("{path}: malformed project id {value:?}")]
    InvalidProjectId { path: PathBuf, value: String },
}

/// Registry key shared by every reference type: (project, field, CCD).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameKey {
    pub project_id: u32,
    pub field: String,
    pub ccd: u8,
}

impl FrameKey {
    pub fn new(project_id: u32, field: impl Into<String>, ccd: u8) -> Self {
        Self {
            project_id,
            field: field.into(),
            ccd,
        }
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proj{}-{}-ccd{}", self.project_id, self.field, self.ccd)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameIdentity {
    pub station_id: u8,
    pub frame_number: String,
    pub ccd: u8,
    pub field: String,
    pub project_id: u32,
}

impl FrameIdentity {
    pub fn key(&self) -> FrameKey {
        FrameKey::new(self.project_id, self.field.clone(), self.ccd)
    }

    /// `{station}-{frame}_{ccd}`, the stem shared by a frame and all its sidecars.
    pub fn tag(&self) -> String {
        format!("{}-{}_{}", self.station_id, self.frame_number, self.ccd)
    }
}

/// Station, frame number and CCD from the file name alone.
pub fn parse_frame_name(path: &Path) -> Result<(u8, String, u8), ResolutionFailure> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let caps = frame_regex()
        .captures(&name)
        .ok_or_else(|| ResolutionFailure::FilenamePattern {
            path: path.to_path_buf(),
        })?;

    let station: u8 = caps[1].parse().map_err(|_| ResolutionFailure::FilenamePattern {
        path: path.to_path_buf(),
    })?;
    let ccd: u8 = caps[3].parse().map_err(|_| ResolutionFailure::FilenamePattern {
        path: path.to_path_buf(),
    })?;
    if !FIELD_CCDS.contains(&ccd) {
        return Err(ResolutionFailure::InvalidCcd {
            path: path.to_path_buf(),
            ccd,
        });
    }
    Ok((station, caps[2].to_string(), ccd))
}

/// True if `field` has the `G±DDDD_xxx` shape.
pub fn is_valid_field(field: &str) -> bool {
    field_regex().is_match(field)
}

/// Resolve identity from a path and an already-read header.
pub fn resolve_identity_with_header(
    path: &Path,
    header: &FitsHeader,
) -> Result<FrameIdentity, ResolutionFailure> {
    let (station_id, frame_number, ccd) = parse_frame_name(path)?;

    let field = header
        .get_str("OBJECT")
        .ok_or_else(|| ResolutionFailure::MissingHeaderKey {
            path: path.to_path_buf(),
            key: "OBJECT",
        })?;
    if !is_valid_field(&field) {
        return Err(ResolutionFailure::InvalidField {
            path: path.to_path_buf(),
            field,
        });
    }

    let raw_project = header
        .get_str("PROJID")
        .ok_or_else(|| ResolutionFailure::MissingHeaderKey {
            path: path.to_path_buf(),
            key: "PROJID",
        })?;
    let project_id: u32 =
        raw_project
            .trim()
            .parse()
            .map_err(|_| ResolutionFailure::InvalidProjectId {
                path: path.to_path_buf(),
                value: raw_project.clone(),
            })?;

    Ok(FrameIdentity {
        station_id,
        frame_number,
        ccd,
        field,
        project_id,
    })
}

/// Resolve a frame's identity from its file name and FITS header.
pub fn resolve_identity(path: &Path) -> Result<FrameIdentity, ResolutionFailure> {
    // Reject bad names before touching the file.
    parse_frame_name(path)?;
    let header = read_header(path).map_err(|e| ResolutionFailure::HeaderUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    resolve_identity_with_header(path, &header)
}
