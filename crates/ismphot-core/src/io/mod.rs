pub mod fiphot;
pub mod fistar;
pub mod fits;
pub mod quicklook;

use std::path::{Path, PathBuf};

/// Replace the file extension of `path`, treating `.fits.fz` as a single extension.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = strip_fits_extension(&name);
    path.with_file_name(format!("{stem}{suffix}"))
}

/// File name of `path` without its `.fits` / `.fits.fz` extension.
pub fn fits_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    strip_fits_extension(&name).to_string()
}

fn strip_fits_extension(name: &str) -> &str {
    name.strip_suffix(".fits.fz")
        .or_else(|| name.strip_suffix(".fits"))
        .unwrap_or(name)
}

/// Locate a sidecar of `frame` with the given suffix.
///
/// A registered `…-xtrns.fits` frame shares its sidecars with the original
/// frame, so the stem with `-xtrns` removed is tried second.
pub fn find_sidecar(frame: &Path, suffix: &str) -> Option<PathBuf> {
    let direct = with_suffix(frame, suffix);
    if direct.exists() {
        return Some(direct);
    }
    let stem = fits_stem(frame);
    let original = stem.strip_suffix("-xtrns")?;
    let fallback = frame.with_file_name(format!("{original}{suffix}"));
    fallback.exists().then_some(fallback)
}
