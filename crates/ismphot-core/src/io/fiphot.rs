//! Reader for aperture photometry files (`.fiphot`, `.cmrawphot`, `.iphot`).
//!
//! Two layouts exist, told apart by [`BINARY_PHOT_MARKER`] appearing in the first
//! [`PHOT_HEADER_SNIFF_BYTES`] bytes:
//!
//! * text: whitespace-delimited, `#` comments; column 0 object id, 1 x, 2 y,
//!   12 magnitude, 13 magnitude error, 14 status flag (`G` = good).
//! * binary: `#` header lines ending with [`BINARY_PHOT_END_OF_HEADER`], then a
//!   little-endian `u32` record count followed by records of
//!   `u64 object index, f64 x, f64 y, f64 mag, f64 err, u8 flag` (`0` = good).

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::consts::{BINARY_PHOT_END_OF_HEADER, BINARY_PHOT_MARKER, PHOT_HEADER_SNIFF_BYTES};
use crate::error::{IsmError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhotLayout {
    Text,
    Binary,
}

#[derive(Clone, Debug)]
pub struct PhotRecord {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub mag: f64,
    pub err: f64,
    pub good: bool,
    /// 1-based line number in a text file, record number in a binary one.
    pub line: usize,
}

/// Decide the layout of a photometry file from its leading bytes.
pub fn detect_layout(path: &Path) -> Result<PhotLayout> {
    let mut head = Vec::with_capacity(PHOT_HEADER_SNIFF_BYTES);
    File::open(path)?
        .take(PHOT_HEADER_SNIFF_BYTES as u64)
        .read_to_end(&mut head)?;
    let marker = BINARY_PHOT_MARKER.as_bytes();
    if head.windows(marker.len()).any(|w| w == marker) {
        Ok(PhotLayout::Binary)
    } else {
        Ok(PhotLayout::Text)
    }
}

/// Read all photometry rows, auto-detecting the layout.
pub fn read_photometry(path: &Path) -> Result<Vec<PhotRecord>> {
    match detect_layout(path)? {
        PhotLayout::Text => read_text(path),
        PhotLayout::Binary => read_binary(path),
    }
}

fn column(fields: &[&str], idx: usize) -> f64 {
    fields
        .get(idx)
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

fn read_text(path: &Path) -> Result<Vec<PhotRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        records.push(PhotRecord {
            id: fields.first().map(|s| s.to_string()).unwrap_or_default(),
            x: column(&fields, 1),
            y: column(&fields, 2),
            mag: column(&fields, 12),
            err: column(&fields, 13),
            good: fields.get(14).is_some_and(|f| *f == "G"),
            line: number + 1,
        });
    }
    Ok(records)
}

/// Bytes in one binary record: five 8-byte fields and a flag byte.
const BINARY_RECORD_SIZE: u64 = 5 * 8 + 1;

fn read_binary(path: &Path) -> Result<Vec<PhotRecord>> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut consumed = 0u64;
    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        consumed += read as u64;
        if read == 0 {
            return Err(IsmError::missing(
                path,
                "binary photometry header is not terminated",
            ));
        }
        if line.trim_end() == BINARY_PHOT_END_OF_HEADER {
            break;
        }
    }

    let count = u64::from(reader.read_u32::<LittleEndian>()?);
    let available = file_len.saturating_sub(consumed + 4) / BINARY_RECORD_SIZE;
    if count > available {
        return Err(IsmError::missing(
            path,
            format!("binary photometry declares {count} records but holds {available}"),
        ));
    }
    let count = count as usize;
    let mut records = Vec::with_capacity(count);
    for number in 0..count {
        let index = reader.read_u64::<LittleEndian>()?;
        let x = reader.read_f64::<LittleEndian>()?;
        let y = reader.read_f64::<LittleEndian>()?;
        let mag = reader.read_f64::<LittleEndian>()?;
        let err = reader.read_f64::<LittleEndian>()?;
        let flag = reader.read_u8()?;
        records.push(PhotRecord {
            id: index.to_string(),
            x,
            y,
            mag,
            err,
            good: flag == 0,
            line: number + 1,
        });
    }
    Ok(records)
}
