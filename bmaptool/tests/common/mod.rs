//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use bmap_format::{BmapDocument, ChecksumKind};
use bmap_image::{BmapGenerator, GenerateError, GenerateOptions};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;

pub const MIB: u64 = 1024 * 1024;

/// Creates a sparse file of `size` bytes with data only in the given byte
/// ranges and returns its full contents.
pub fn sparse_image(path: &Path, size: u64, extents: &[(u64, u64)]) -> Vec<u8> {
    let file = File::create(path).unwrap();
    let mut contents = vec![0u8; size as usize];

    file.set_len(size).unwrap();

    for &(start, end) in extents {
        let data: Vec<u8> = (start..end).map(|i| (i * 31 % 253 + 1) as u8).collect();

        file.write_all_at(&data, start).unwrap();
        contents[start as usize..end as usize].copy_from_slice(&data);
    }

    file.sync_all().unwrap();
    contents
}

/// The 8 MiB image with blocks 0-99 and 2000-2047 of 4 KiB holding data.
pub fn scenario_image(path: &Path) -> Vec<u8> {
    sparse_image(
        path,
        8 * MIB,
        &[(0, 100 * 4096), (2000 * 4096, 2048 * 4096)],
    )
}

/// Writes the bmap of `image` to `bmap`. Returns `None` when the filesystem
/// cannot report extents.
pub fn write_bmap(image: &Path, bmap: &Path, checksum: Option<ChecksumKind>) -> Option<BmapDocument> {
    let generator = BmapGenerator::open(image).unwrap();
    let out = File::create(bmap).unwrap();

    match generator.generate_to(GenerateOptions { checksum }, out) {
        Ok(_) => Some(bmaptool::open_bmap(bmap).unwrap()),
        Err(GenerateError::Scan { .. }) => {
            eprintln!("extent scanning unavailable, skipping");
            None
        }
        Err(err) => panic!("cannot generate bmap: {err}"),
    }
}

/// Flips one byte of `path` at `offset`.
pub fn corrupt(path: &Path, offset: u64) {
    let file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8];

    file.read_exact_at(&mut byte, offset).unwrap();
    byte[0] ^= 0xff;
    file.write_all_at(&byte, offset).unwrap();
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::fast());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// A ustar archive holding the given regular files.
pub fn tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();

    for &(name, data) in entries {
        let mut header = [0u8; 512];

        header[..name.len()].copy_from_slice(name.as_bytes());
        header[100..108].copy_from_slice(b"0000644\0");
        header[108..116].copy_from_slice(b"0000000\0");
        header[116..124].copy_from_slice(b"0000000\0");
        header[124..136].copy_from_slice(format!("{:011o}\0", data.len()).as_bytes());
        header[136..148].copy_from_slice(b"00000000000\0");
        header[148..156].copy_from_slice(b"        ");
        header[156] = b'0';
        header[257..263].copy_from_slice(b"ustar\0");
        header[263..265].copy_from_slice(b"00");

        let sum: u32 = header.iter().map(|&b| u32::from(b)).sum();

        header[148..156].copy_from_slice(format!("{sum:06o}\0 ").as_bytes());

        out.extend_from_slice(&header);
        out.extend_from_slice(data);
        out.resize(out.len().next_multiple_of(512), 0);
    }

    out.resize(out.len() + 1024, 0);
    out
}
