//! Content-addressed on-disk cache of frame-info and selection blobs.
//!
//! Blobs are gzip-compressed JSON named by the SHA-256 of their inputs:
//!
//! ```text
//! {cache_dir}/frameinfo-{hash}.json.gz
//! {cache_dir}/photref-{hash}/selection-info.json.gz
//! ```
//!
//! Writes go to a temporary file in the same directory and are renamed into
//! place, so readers see either the old or the new blob. Concurrent writers
//! of the same key: last one wins.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::consts::SELECTION_INFO_FILE;
use crate::error::{IsmError, Result};

/// Key of an exact, ordered frame list.
pub fn frame_list_key(frames: &[PathBuf]) -> String {
    let mut hasher = Sha256::new();
    for frame in frames {
        hasher.update(frame.to_string_lossy().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Key of a frame list together with the parameters applied to it.
pub fn frame_list_params_key<P: Serialize>(frames: &[PathBuf], params: &P) -> Result<String> {
    let encoded = serde_json::to_vec(params)?;
    let mut hasher = Sha256::new();
    hasher.update(frame_list_key(frames).as_bytes());
    hasher.update(b"\0");
    hasher.update(&encoded);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Clone, Debug)]
pub struct FrameInfoCache {
    dir: PathBuf,
}

impl FrameInfoCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frameinfo_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("frameinfo-{key}.json.gz"))
    }

    /// Directory of one candidate selection; also holds its quick-look images.
    pub fn selection_dir(&self, key: &str) -> PathBuf {
        self.dir.join(format!("photref-{key}"))
    }

    pub fn selection_info_path(&self, key: &str) -> PathBuf {
        self.selection_dir(key).join(SELECTION_INFO_FILE)
    }

    /// Load a blob. Missing and corrupt blobs are both misses; corruption is logged.
    pub fn load<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        match read_blob(path) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable cache entry");
                None
            }
        }
    }

    pub fn store<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        write_blob(path, value)
    }
}

/// Read a gzip JSON blob. `Ok(None)` if it does not exist.
pub fn read_blob<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let decoder = GzDecoder::new(BufReader::new(file));
    serde_json::from_reader(decoder)
        .map(Some)
        .map_err(|e| IsmError::CacheCorruption {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Write a gzip JSON blob atomically via a temporary sibling.
pub fn write_blob<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{name}.{}.tmp", std::process::id()));

    let result = (|| -> Result<()> {
        let mut encoder = GzEncoder::new(BufWriter::new(File::create(&tmp)?), Compression::default());
        serde_json::to_writer(&mut encoder, value)?;
        encoder.finish()?.flush()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    debug!(path = %path.display(), "Wrote cache entry");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_depend_on_order_and_params() {
        let a = vec![PathBuf::from("/a.fits"), PathBuf::from("/b.fits")];
        let b = vec![PathBuf::from("/b.fits"), PathBuf::from("/a.fits")];
        assert_ne!(frame_list_key(&a), frame_list_key(&b));
        assert_eq!(frame_list_key(&a).len(), 64);

        let k1 = frame_list_params_key(&a, &(1, 2.0)).unwrap();
        let k2 = frame_list_params_key(&a, &(1, 3.0)).unwrap();
        assert_ne!(k1, k2);
        assert_ne!(k1, frame_list_key(&a));
    }
}
