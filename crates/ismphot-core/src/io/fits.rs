//! FITS image I/O on top of cfitsio.
//!
//! Frames are read from the first 2-D image HDU, so tile-compressed `.fits.fz`
//! files (empty primary, compressed image extension) load the same way as plain
//! ones. cfitsio applies BZERO/BSCALE on read. Output images are written as
//! 32-bit floats; a `.fits.fz` destination is tile-compressed.

use std::fs;
use std::path::{Path, PathBuf};

use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use ndarray::Array2;

use crate::error::{IsmError, Result};
use crate::frame::Frame;

/// Keywords read from every header. Anything else is ignored on read.
pub const HEADER_KEYS: &[&str] = &[
    "OBJECT", "PROJID", "JD", "Z", "HA", "MOONPH", "MOONELEV", "MOONDIST", "EXPTIME",
    "DATE-OBS", "FILTER", "IMAGETYP", "NCOMBINE", "PHOTREF", "COMBMETH", "SUBDIR",
];

/// Keywords describing the data layout; regenerated on every write.
const STRUCTURAL_KEYS: &[&str] = &["SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "EXTEND", "BZERO", "BSCALE"];

#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl HeaderValue {
    /// cfitsio hands back every value as its literal text; numbers are recovered from it.
    fn from_literal(text: String) -> Self {
        let trimmed = text.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            Self::Int(i)
        } else if let Ok(f) = trimmed.replace(['D', 'd'], "E").parse::<f64>() {
            Self::Float(f)
        } else {
            Self::Str(text.trim_end().to_string())
        }
    }
}

/// Ordered keyword list of an image HDU.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FitsHeader {
    entries: Vec<(String, HeaderValue)>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[(String, HeaderValue)] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        let key = key.to_ascii_uppercase();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            HeaderValue::Str(s) => Some(s.clone()),
            HeaderValue::Int(i) => Some(i.to_string()),
            HeaderValue::Float(f) => Some(f.to_string()),
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            HeaderValue::Int(i) => Some(*i as f64),
            HeaderValue::Float(f) => Some(*f),
            HeaderValue::Str(s) => s.trim().parse().ok(),
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            HeaderValue::Int(i) => Some(*i),
            HeaderValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            HeaderValue::Float(_) => None,
            HeaderValue::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Set or replace a keyword.
    pub fn set(&mut self, key: &str, value: HeaderValue) {
        let key = key.to_ascii_uppercase();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }
}

fn invalid(path: &Path, reason: impl Into<String>) -> IsmError {
    IsmError::InvalidFits {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn is_compressed(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".fits.fz")
}

fn bitpix(image_type: &ImageType) -> i64 {
    match image_type {
        ImageType::UnsignedByte | ImageType::Byte => 8,
        ImageType::Short | ImageType::UnsignedShort => 16,
        ImageType::Long | ImageType::UnsignedLong => 32,
        ImageType::LongLong => 64,
        ImageType::Float => -32,
        ImageType::Double => -64,
    }
}

/// First HDU holding a 2-D image, with its (height, width) and BITPIX.
fn image_hdu(fptr: &mut FitsFile, path: &Path) -> Result<(FitsHdu, (usize, usize), i64)> {
    let mut index = 0;
    while let Ok(hdu) = fptr.hdu(index) {
        if let HduInfo::ImageInfo { shape, image_type } = &hdu.info {
            if let [height, width] = shape.as_slice() {
                let dim = (*height, *width);
                let bitpix = bitpix(image_type);
                return Ok((hdu, dim, bitpix));
            }
        }
        index += 1;
    }
    Err(invalid(path, "no 2-D image HDU"))
}

fn open(path: &Path) -> Result<FitsFile> {
    if !path.exists() {
        return Err(IsmError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }
    FitsFile::open(path).map_err(|e| invalid(path, e.to_string()))
}

fn read_keys(fptr: &mut FitsFile, hdu: &FitsHdu, dim: (usize, usize), bitpix: i64) -> FitsHeader {
    let mut header = FitsHeader::new();
    for key in HEADER_KEYS.iter().chain(["BZERO", "BSCALE"].iter()) {
        if let Ok(text) = hdu.read_key::<String>(fptr, key) {
            header.set(key, HeaderValue::from_literal(text));
        }
    }
    // Layout keys describe the image, not the compressed table that may hold it.
    header.set("BITPIX", HeaderValue::Int(bitpix));
    header.set("NAXIS", HeaderValue::Int(2));
    header.set("NAXIS1", HeaderValue::Int(dim.1 as i64));
    header.set("NAXIS2", HeaderValue::Int(dim.0 as i64));
    header
}

/// Read the header of the image HDU without touching the pixel data.
pub fn read_header(path: &Path) -> Result<FitsHeader> {
    let mut fptr = open(path)?;
    let (hdu, dim, bitpix) = image_hdu(&mut fptr, path)?;
    Ok(read_keys(&mut fptr, &hdu, dim, bitpix))
}

/// Read the image of a FITS or `.fits.fz` file.
pub fn read_frame(path: &Path) -> Result<Frame> {
    let mut fptr = open(path)?;
    let (hdu, (height, width), bitpix) = image_hdu(&mut fptr, path)?;
    let header = read_keys(&mut fptr, &hdu, (height, width), bitpix);

    let pixels: Vec<f32> = hdu
        .read_image(&mut fptr)
        .map_err(|e| invalid(path, format!("reading pixels: {e}")))?;
    let expected = height
        .checked_mul(width)
        .ok_or_else(|| invalid(path, format!("image size {width}x{height} overflows")))?;
    if pixels.len() != expected {
        return Err(invalid(
            path,
            format!("expected {expected} pixels, got {}", pixels.len()),
        ));
    }
    let data = Array2::from_shape_vec((height, width), pixels)
        .map_err(|e| invalid(path, e.to_string()))?;
    Ok(Frame::new(data, header))
}

/// Write a frame as a 32-bit float image, replacing any existing file.
pub fn write_frame(frame: &Frame, path: &Path) -> Result<()> {
    let (height, width) = frame.data.dim();
    if path.exists() {
        fs::remove_file(path)?;
    }

    // cfitsio's extended filename syntax requests tile compression.
    let target = if is_compressed(path) {
        PathBuf::from(format!("{}[compress]", path.display()))
    } else {
        path.to_path_buf()
    };
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &[height, width],
    };
    let mut fptr = FitsFile::create(&target)
        .with_custom_primary(&description)
        .open()
        .map_err(|e| invalid(path, e.to_string()))?;
    let (hdu, _, _) = image_hdu(&mut fptr, path)?;

    let pixels: Vec<f32> = frame.data.iter().copied().collect();
    hdu.write_image(&mut fptr, &pixels)
        .map_err(|e| invalid(path, format!("writing pixels: {e}")))?;

    for (key, value) in frame.header.entries() {
        if STRUCTURAL_KEYS.contains(&key.as_str()) {
            continue;
        }
        let written = match value {
            HeaderValue::Str(s) => hdu.write_key(&mut fptr, key, s.as_str()),
            HeaderValue::Int(i) => hdu.write_key(&mut fptr, key, *i),
            HeaderValue::Float(f) => hdu.write_key(&mut fptr, key, *f),
        };
        written.map_err(|e| invalid(path, format!("writing {key}: {e}")))?;
    }
    Ok(())
}
