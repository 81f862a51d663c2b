#[allow(dead_code)]
mod common;

use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use ndarray::Array2;
use tempfile::tempdir;

use ismphot_core::error::IsmError;
use ismphot_core::frame::Frame;
use ismphot_core::io::fits::{read_frame, read_header, write_frame, FitsHeader, HeaderValue};

fn card(text: &str) -> Vec<u8> {
    format!("{:<80}", text).into_bytes()
}

/// A 3x2 BITPIX 16 image with BZERO/BSCALE scaling, written card by card.
fn write_int16_fits(path: &Path, values: &[i16]) {
    let mut bytes = Vec::new();
    for c in [
        "SIMPLE  =                    T",
        "BITPIX  =                   16",
        "NAXIS   =                    2",
        "NAXIS1  =                    3",
        "NAXIS2  =                    2",
        "BZERO   =                32768",
        "BSCALE  =                  2.0",
        "OBJECT  = 'G1234+5678_abc'     / field",
        "END",
    ] {
        bytes.extend(card(c));
    }
    bytes.resize(2880, b' ');
    for v in values {
        bytes.extend_from_slice(&v.to_be_bytes());
    }
    bytes.resize(2880 * 2, 0);
    fs::write(path, bytes).unwrap();
}

#[test]
fn test_write_read_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("frame.fits");

    let data = Array2::from_shape_fn((5, 7), |(r, c)| (r * 7 + c) as f32 * 0.5);
    let mut header = FitsHeader::new();
    header.set("OBJECT", HeaderValue::Str("G1234+5678_abc".into()));
    header.set("PROJID", HeaderValue::Int(42));
    header.set("Z", HeaderValue::Float(12.25));
    header.set("NAXIS1", HeaderValue::Int(99));
    write_frame(&Frame::new(data.clone(), header), &path).unwrap();

    let frame = read_frame(&path).unwrap();
    assert_eq!(frame.dim(), (5, 7));
    assert_eq!(frame.data, data);
    assert_eq!(frame.header.get_str("OBJECT").as_deref(), Some("G1234+5678_abc"));
    assert_eq!(frame.header.get_i64("PROJID"), Some(42));
    assert_relative_eq!(frame.header.get_f64("Z").unwrap(), 12.25);
    assert_eq!(frame.header.get_i64("BITPIX"), Some(-32));
    // Layout keys come from the image, not from the carried-over header.
    assert_eq!(frame.header.get_i64("NAXIS1"), Some(7));
    assert_eq!(frame.header.entries().iter().filter(|(k, _)| k == "NAXIS1").count(), 1);

    let len = fs::metadata(&path).unwrap().len();
    assert_eq!(len % 2880, 0);
}

#[test]
fn test_overwrite_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("frame.fits");
    write_frame(&Frame::new(Array2::zeros((4, 4)), FitsHeader::new()), &path).unwrap();
    write_frame(&Frame::new(Array2::from_elem((2, 3), 9.0), FitsHeader::new()), &path).unwrap();

    let frame = read_frame(&path).unwrap();
    assert_eq!(frame.dim(), (2, 3));
    assert_relative_eq!(frame.data[[1, 2]], 9.0);
}

#[test]
fn test_tile_compressed_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("frame.fits.fz");

    let data = Array2::from_shape_fn((16, 20), |(r, c)| 100.0 + (r * 20 + c) as f32);
    let mut header = FitsHeader::new();
    header.set("OBJECT", HeaderValue::Str("G1234+5678_abc".into()));
    header.set("JD", HeaderValue::Float(2455000.25));
    write_frame(&Frame::new(data.clone(), header), &path).unwrap();

    let frame = read_frame(&path).unwrap();
    assert_eq!(frame.dim(), (16, 20));
    for (got, want) in frame.data.iter().zip(data.iter()) {
        assert_relative_eq!(*got, *want, epsilon = 0.05);
    }
    assert_eq!(frame.header.get_str("OBJECT").as_deref(), Some("G1234+5678_abc"));
    assert_relative_eq!(frame.header.get_f64("JD").unwrap(), 2455000.25);

    let header = read_header(&path).unwrap();
    assert_eq!(header.get_i64("NAXIS1"), Some(20));
    assert_eq!(header.get_i64("NAXIS2"), Some(16));
}

#[test]
fn test_read_scaled_int16() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("int16.fits");
    write_int16_fits(&path, &[0, 1, -1, 100, -100, 7]);

    let frame = read_frame(&path).unwrap();
    assert_eq!(frame.dim(), (2, 3));
    assert_relative_eq!(frame.data[[0, 0]], 32768.0);
    assert_relative_eq!(frame.data[[0, 1]], 32770.0);
    assert_relative_eq!(frame.data[[0, 2]], 32766.0);
    assert_relative_eq!(frame.data[[1, 0]], 32968.0);
    assert_eq!(frame.header.get_str("OBJECT").as_deref(), Some("G1234+5678_abc"));
}

#[test]
fn test_read_header_only() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("int16.fits");
    write_int16_fits(&path, &[0; 6]);

    let header = read_header(&path).unwrap();
    assert_eq!(header.get_i64("NAXIS1"), Some(3));
    assert_relative_eq!(header.get_f64("BSCALE").unwrap(), 2.0);
    assert!(header.get("MISSING").is_none());
}

#[test]
fn test_header_lookup_is_case_insensitive() {
    let mut header = FitsHeader::new();
    header.set("moonph", HeaderValue::Float(3.5));
    assert_relative_eq!(header.get_f64("MOONPH").unwrap(), 3.5);
    header.set("MOONPH", HeaderValue::Float(4.5));
    assert_eq!(header.entries().len(), 1);
    assert_relative_eq!(header.get_f64("moonph").unwrap(), 4.5);
}

#[test]
fn test_truncated_file_is_invalid() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short.fits");
    fs::write(&path, card("SIMPLE  =                    T")).unwrap();
    assert!(matches!(read_header(&path), Err(IsmError::InvalidFits { .. })));
}

#[test]
fn test_truncated_data_is_invalid() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("int16.fits");
    write_int16_fits(&path, &[0; 6]);
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..2880 + 4]).unwrap();
    assert!(matches!(read_frame(&path), Err(IsmError::InvalidFits { .. })));
}
