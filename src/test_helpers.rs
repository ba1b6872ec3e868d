//! Shared test utilities for the panelvault test suite.
//!
//! Fixture builders that produce real archives and images in-process, so
//! tests need no binary files checked into the repository.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let book = tmp.path().join("Saga v01.cbz");
//! write_comic(&book, &[("001.jpg", 600, 800), ("002.jpg", 600, 800)]);
//! ```

use image::{ImageEncoder, RgbImage, RgbaImage};
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;

// =========================================================================
// Images
// =========================================================================

/// Encode a small gradient JPEG with the given dimensions.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut buf = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

/// Encode a half-transparent RGBA PNG.
pub fn png_rgba_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        image::Rgba([255, 255, 255, if x % 2 == 0 { 0 } else { 255 }])
    });
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .unwrap();
    buf
}

// =========================================================================
// Archives
// =========================================================================

/// Write a zip with the given members, in the given order.
pub fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, data) in members {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Write a CBZ whose pages are real JPEGs of the given sizes.
pub fn write_comic(path: &Path, pages: &[(&str, u32, u32)]) {
    let encoded: Vec<(&str, Vec<u8>)> = pages
        .iter()
        .map(|(name, w, h)| (*name, jpeg_bytes(*w, *h)))
        .collect();
    let members: Vec<(&str, &[u8])> = encoded
        .iter()
        .map(|(name, data)| (*name, data.as_slice()))
        .collect();
    write_zip(path, &members);
}

/// Write a file that carries the RAR signature but no valid archive body.
pub fn write_rar_signature(path: &Path) {
    std::fs::write(path, b"Rar!\x1a\x07\x00not-really-a-rar-archive").unwrap();
}

/// Write a zip whose only member holds `data` but whose central directory
/// declares `declared` uncompressed bytes through a zip64 extra field.
pub fn write_zip_declaring(path: &Path, name: &str, data: &[u8], declared: u64) {
    let crc = crc32(data);
    let name = name.as_bytes();
    let mut out = Vec::new();

    // Local header
    out.extend_from_slice(b"PK\x03\x04");
    out.extend_from_slice(&20u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // flags
    out.extend_from_slice(&0u16.to_le_bytes()); // stored
    out.extend_from_slice(&0u16.to_le_bytes()); // time
    out.extend_from_slice(&0x21u16.to_le_bytes()); // 1980-01-01
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(data);

    // Central directory
    let cd_offset = out.len() as u32;
    out.extend_from_slice(b"PK\x01\x02");
    out.extend_from_slice(&45u16.to_le_bytes()); // made by
    out.extend_from_slice(&45u16.to_le_bytes()); // needed
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0x21u16.to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&u32::MAX.to_le_bytes()); // size is in the zip64 extra
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&12u16.to_le_bytes()); // extra length
    out.extend_from_slice(&0u16.to_le_bytes()); // comment length
    out.extend_from_slice(&0u16.to_le_bytes()); // disk
    out.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
    out.extend_from_slice(&0u32.to_le_bytes()); // external attributes
    out.extend_from_slice(&0u32.to_le_bytes()); // local header offset
    out.extend_from_slice(name);
    out.extend_from_slice(&1u16.to_le_bytes()); // zip64 extra
    out.extend_from_slice(&8u16.to_le_bytes());
    out.extend_from_slice(&declared.to_le_bytes());
    let cd_size = out.len() as u32 - cd_offset;

    // End of central directory
    out.extend_from_slice(b"PK\x05\x06");
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    std::fs::write(path, out).unwrap();
}

/// Write a RAR 4.x archive with every member stored uncompressed, in the
/// given order.
pub fn write_rar(path: &Path, members: &[(&str, &[u8])]) {
    let mut out = b"Rar!\x1a\x07\x00".to_vec();

    // Main archive header: no flags, reserved fields zeroed.
    rar_block(&mut out, 0x73, 0, &[0u8; 6], &[]);

    for (name, data) in members {
        let name = name.as_bytes();
        let mut fields = Vec::new();
        fields.extend_from_slice(&(data.len() as u32).to_le_bytes()); // packed
        fields.extend_from_slice(&(data.len() as u32).to_le_bytes()); // unpacked
        fields.push(2); // Win32 host
        fields.extend_from_slice(&crc32(data).to_le_bytes());
        fields.extend_from_slice(&0x0021_0000u32.to_le_bytes()); // 1980-01-01
        fields.push(29); // unpack version 2.9
        fields.push(0x30); // stored
        fields.extend_from_slice(&(name.len() as u16).to_le_bytes());
        fields.extend_from_slice(&0x20u32.to_le_bytes()); // archive attribute
        fields.extend_from_slice(name);
        rar_block(&mut out, 0x74, 0x8000, &fields, data);
    }

    // End of archive.
    rar_block(&mut out, 0x7b, 0x4000, &[], &[]);
    std::fs::write(path, out).unwrap();
}

/// One RAR 4.x block: CRC16 (low half of the CRC32 of type..fields), type,
/// flags, size, fields, then any data that follows the header.
fn rar_block(out: &mut Vec<u8>, kind: u8, flags: u16, fields: &[u8], data: &[u8]) {
    let size = (7 + fields.len()) as u16;
    let mut header = vec![kind];
    header.extend_from_slice(&flags.to_le_bytes());
    header.extend_from_slice(&size.to_le_bytes());
    header.extend_from_slice(fields);
    out.extend_from_slice(&((crc32(&header) & 0xffff) as u16).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(data);
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

#[test]
fn rar_end_block_matches_reference_bytes() {
    let mut out = Vec::new();
    rar_block(&mut out, 0x7b, 0x4000, &[], &[]);
    assert_eq!(out, [0xC4, 0x3D, 0x7B, 0x00, 0x40, 0x07, 0x00]);

    let mut main = Vec::new();
    rar_block(&mut main, 0x73, 0, &[0u8; 6], &[]);
    assert_eq!(&main[..2], &[0xCF, 0x90]);
}
