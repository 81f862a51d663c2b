//! Finding frames on disk and grouping them by (project, field, CCD).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::identity::{resolve_identity, FrameIdentity, FrameKey};
use crate::pool::TaskPool;
use crate::progress::{PipelineStage, ProgressReporter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Calibrated frames straight off the reduction: `1-123456_5.fits`.
    Original,
    /// Frames registered onto their astrometric reference: `1-123456_5-xtrns.fits`.
    Registered,
}

impl FrameKind {
    fn pattern(self) -> &'static Regex {
        static ORIGINAL: OnceLock<Regex> = OnceLock::new();
        static REGISTERED: OnceLock<Regex> = OnceLock::new();
        match self {
            Self::Original => ORIGINAL.get_or_init(|| {
                Regex::new(r"^\d-\d{6}\w?_\d\.fits$").expect("original frame regex is valid")
            }),
            Self::Registered => REGISTERED.get_or_init(|| {
                Regex::new(r"^\d-\d{6}\w?_\d-xtrns\.fits$").expect("registered frame regex is valid")
            }),
        }
    }

    pub fn matches(self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.pattern().is_match(n))
    }
}

/// Frames of `kind` directly inside any of `dirs`, sorted by path.
pub fn discover_frames<P: AsRef<Path>>(dirs: &[P], kind: FrameKind) -> Vec<PathBuf> {
    let mut frames = Vec::new();
    for dir in dirs {
        for entry in WalkDir::new(dir.as_ref()).min_depth(1).max_depth(1) {
            match entry {
                Ok(e) if e.file_type().is_file() && kind.matches(e.path()) => {
                    frames.push(e.into_path());
                }
                Ok(_) => {}
                Err(e) => warn!(dir = %dir.as_ref().display(), error = %e, "Skipping unreadable entry"),
            }
        }
    }
    frames.sort();
    frames.dedup();
    debug!(count = frames.len(), ?kind, "Discovered frames");
    frames
}

/// Source lists (`*.fistar`) directly inside `dir`, sorted by path.
pub fn discover_source_lists(dir: &Path) -> Vec<PathBuf> {
    let mut lists: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "fistar"))
        .collect();
    lists.sort();
    lists
}

/// Resolve identities in parallel. Frames that cannot be resolved are logged and dropped.
pub fn resolve_frames(
    frames: Vec<PathBuf>,
    pool: &TaskPool,
    reporter: &dyn ProgressReporter,
) -> Vec<(PathBuf, FrameIdentity)> {
    pool.map_reported(
        frames,
        |frame| Ok(resolve_identity(frame)?),
        reporter,
        Some(PipelineStage::ResolvingIdentity),
    )
    .into_iter()
    .filter_map(|r| match r.outcome {
        Ok(identity) => Some((r.task, identity)),
        Err(e) => {
            warn!(frame = %r.task.display(), reason = %e, "Dropping unresolvable frame");
            None
        }
    })
    .collect()
}

/// Frames belonging to `key`, in sorted order.
pub fn frames_for_key(
    frames: Vec<PathBuf>,
    key: &FrameKey,
    pool: &TaskPool,
    reporter: &dyn ProgressReporter,
) -> Vec<PathBuf> {
    let mut matching: Vec<PathBuf> = resolve_frames(frames, pool, reporter)
        .into_iter()
        .filter(|(_, identity)| identity.key() == *key)
        .map(|(frame, _)| frame)
        .collect();
    matching.sort();
    matching
}

/// Frames grouped by key, each group sorted.
pub fn group_by_key(
    frames: Vec<PathBuf>,
    pool: &TaskPool,
    reporter: &dyn ProgressReporter,
) -> BTreeMap<FrameKey, Vec<PathBuf>> {
    let mut groups: BTreeMap<FrameKey, Vec<PathBuf>> = BTreeMap::new();
    for (frame, identity) in resolve_frames(frames, pool, reporter) {
        groups.entry(identity.key()).or_default().push(frame);
    }
    for group in groups.values_mut() {
        group.sort();
    }
    groups
}
