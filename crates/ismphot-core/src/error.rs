use std::path::PathBuf;

use thiserror::Error;

use crate::identity::ResolutionFailure;

#[derive(Error, Debug)]
pub enum IsmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not resolve frame identity: {0}")]
    Resolution(#[from] ResolutionFailure),

    #[error("Invalid FITS file {path}: {reason}")]
    InvalidFits { path: PathBuf, reason: String },

    #[error("Missing artifact {path}: {what}")]
    MissingArtifact { path: PathBuf, what: String },

    #[error("External tool {tool} failed: {reason}")]
    ExternalTool { tool: String, reason: String },

    #[error("No active {kind} for {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("Registry conflict for {key}: {reason}")]
    RegistryConflict { key: String, reason: String },

    #[error("Corrupt cache entry {path}: {reason}")]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("Registry error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("Frame dimensions differ: expected {expected:?}, got {got:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
}

impl IsmError {
    pub(crate) fn missing(path: impl Into<PathBuf>, what: impl Into<String>) -> Self {
        Self::MissingArtifact {
            path: path.into(),
            what: what.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IsmError>;
