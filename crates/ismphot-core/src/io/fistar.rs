//! Reader for `.fistar` source lists.
//!
//! Whitespace-delimited text, `#` comment lines. Columns (0-based):
//! 0 id, 1 x, 2 y, 3 background, 4 amplitude, 5 S, 6 D, 7 K, 8 flux, 9 S/N.

use std::fs;
use std::path::Path;

use crate::error::Result;

#[derive(Clone, Debug)]
pub struct SourceRecord {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub background: f64,
    pub s: f64,
    pub d: f64,
    pub flux: f64,
}

fn column(fields: &[&str], idx: usize) -> f64 {
    fields
        .get(idx)
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

/// Read all sources from a `.fistar` file. Unparseable values become NaN.
pub fn read_source_list(path: &Path) -> Result<Vec<SourceRecord>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            SourceRecord {
                id: fields.first().map(|s| s.to_string()).unwrap_or_default(),
                x: column(&fields, 1),
                y: column(&fields, 2),
                background: column(&fields, 3),
                s: column(&fields, 5),
                d: column(&fields, 6),
                flux: column(&fields, 8),
            }
        })
        .collect())
}
