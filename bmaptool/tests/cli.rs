//! Runs the `bmaptool` binary.

#![cfg(feature = "cli")]

mod common;

use common::{MIB, scenario_image, sparse_image, write_bmap};
use std::path::Path;
use std::process::{Command, Output};

fn bmaptool(args: &[&Path]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bmaptool"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_create_matches_library_output() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("disk.img");
    let expected = dir.path().join("expected.bmap");

    scenario_image(&image);

    if write_bmap(&image, &expected, Some(bmap_format::ChecksumKind::Sha1)).is_none() {
        return;
    }

    let out = bmaptool(&[Path::new("create"), &image]);

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, std::fs::read(&expected).unwrap());
}

#[test]
fn test_copy_discovers_bmap() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("disk.img");
    let dest = dir.path().join("out.img");
    let contents = scenario_image(&image);

    if write_bmap(&image, &dir.path().join("disk.bmap"), None).is_none() {
        return;
    }

    let out = bmaptool(&[Path::new("copy"), &image, &dest]);

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(std::fs::read(&dest).unwrap(), contents);
}

#[test]
fn test_copy_without_bmap_needs_flag() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("plain.raw");
    let dest = dir.path().join("out.raw");
    let contents = sparse_image(&image, MIB, &[(0, MIB)]);

    let out = bmaptool(&[Path::new("copy"), &image, &dest]);

    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("--nobmap"));

    let out = bmaptool(&[Path::new("copy"), Path::new("--nobmap"), &image, &dest]);

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(std::fs::read(&dest).unwrap(), contents);
}

#[test]
fn test_bmap_cannot_be_the_image() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("plain.raw");

    sparse_image(&image, 4096, &[(0, 4096)]);

    let out = bmaptool(&[
        Path::new("copy"),
        Path::new("--bmap"),
        &image,
        &image,
        &dir.path().join("out.raw"),
    ]);

    assert!(!out.status.success());
}
