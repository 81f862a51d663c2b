pub mod align;
pub mod amend;
pub mod astromref;
pub mod build_photref;
pub mod config;
pub mod convsubphot;
pub mod identify;
pub mod ingest;
pub mod metrics;
pub mod select;
pub mod show_ref;
pub mod xysdk;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use ismphot_core::config::IsmConfig;
use ismphot_core::context::Context as IsmContext;
use ismphot_core::discover::{discover_frames, frames_for_key, group_by_key, FrameKind};
use ismphot_core::identity::FrameKey;

use crate::progress::BarReporter;

/// Frames given as files, or directories scanned for frames.
#[derive(Args)]
pub struct FrameInputs {
    /// Frame files or directories containing them
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

impl FrameInputs {
    /// Explicit files are kept as given; directories contribute frames of `kind`.
    pub fn expand(&self, kind: FrameKind) -> Vec<PathBuf> {
        let mut frames = Vec::new();
        let mut dirs = Vec::new();
        for input in &self.inputs {
            if input.is_dir() {
                dirs.push(input.clone());
            } else {
                frames.push(input.clone());
            }
        }
        frames.extend(discover_frames(&dirs, kind));
        frames.sort();
        frames.dedup();
        frames
    }
}

/// Restrict a batch to one (project, field, CCD).
#[derive(Args)]
pub struct KeyFilter {
    /// Only frames of this project id
    #[arg(long, requires_all = ["field", "ccd"])]
    pub project: Option<u32>,

    /// Only frames of this field
    #[arg(long, requires_all = ["project", "ccd"])]
    pub field: Option<String>,

    /// Only frames of this CCD
    #[arg(long, requires_all = ["project", "field"])]
    pub ccd: Option<u8>,
}

impl KeyFilter {
    pub fn key(&self) -> Option<FrameKey> {
        match (self.project, &self.field, self.ccd) {
            (Some(project), Some(field), Some(ccd)) => Some(FrameKey::new(project, field.clone(), ccd)),
            _ => None,
        }
    }

    /// Frames grouped by key; only the filtered key when one is given.
    pub fn groups(&self, frames: Vec<PathBuf>, ctx: &IsmContext) -> BTreeMap<FrameKey, Vec<PathBuf>> {
        match self.key() {
            Some(key) => {
                let frames = frames_for_key(frames, &key, &ctx.pool, ctx.reporter());
                if frames.is_empty() {
                    BTreeMap::new()
                } else {
                    BTreeMap::from([(key, frames)])
                }
            }
            None => group_by_key(frames, &ctx.pool, ctx.reporter()),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<IsmConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str::<IsmConfig>(&text).context("Invalid configuration")?
        }
        None => IsmConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Context running the configured tools, reporting progress on the terminal.
pub fn open_context(config: IsmConfig) -> Result<IsmContext> {
    Ok(IsmContext::new(config)?.with_reporter(BarReporter::new()))
}
