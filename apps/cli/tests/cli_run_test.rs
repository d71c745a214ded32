//! End-to-end `cxr run` against a mock archive host.

use assert_cmd::Command;
use flate2::Compression;
use flate2::write::GzEncoder;
use image::{GrayImage, ImageFormat, Luma};
use predicates::prelude::*;
use std::io::Cursor;
use std::path::Path;
use tempfile::TempDir;

const ROWS: [(&str, &str); 8] = [
    ("c1.png", "Cardiomegaly"),
    ("c2.png", "Cardiomegaly"),
    ("e1.png", "Effusion"),
    ("e2.png", "Effusion"),
    ("c3.png", "Cardiomegaly"),
    ("c4.png", "Cardiomegaly"),
    ("e3.png", "Effusion"),
    ("e4.png", "Effusion"),
];

fn png_archive(names: &[&str]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    for (i, name) in names.iter().enumerate() {
        let mut cursor = Cursor::new(Vec::new());
        GrayImage::from_pixel(16, 16, Luma([(i * 50) as u8]))
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();
        let data = cursor.into_inner();
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, format!("images/{name}"), data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn write_fixture(dir: &Path, server_url: &str) -> std::path::PathBuf {
    let csv = dir.join("meta.csv");
    let mut body = String::from("Image Index,Finding Labels\n");
    for (name, labels) in ROWS {
        body.push_str(&format!("{name},{labels}\n"));
    }
    std::fs::write(&csv, body).unwrap();

    let config = dir.join("cxr.toml");
    std::fs::write(
        &config,
        format!(
            r#"
[data]
metadata_path = {csv:?}

[images]
width = 16
height = 16
batch_size = 4

[images.augmentation]
rotation_range = 0.0
width_shift_range = 0.0
height_shift_range = 0.0
zoom_range = 0.0
horizontal_flip = false

[training]
epochs = 1
base_filters = 4
hidden_units = 8

[rotation]
links = ["{server_url}/a.tar.gz", "{server_url}/b.tar.gz"]
archives_per_batch = 1

[rotation.download]
max_retries = 0
show_progress = false

[paths]
work_dir = {work:?}
"#,
            csv = csv.display().to_string(),
            work = dir.join("work").display().to_string(),
        ),
    )
    .unwrap();
    config
}

#[test]
fn test_run_rotates_and_exports() {
    let mut server = mockito::Server::new();
    let first = server
        .mock("GET", "/a.tar.gz")
        .with_body(png_archive(&["c1.png", "c2.png", "e1.png", "e2.png"]))
        .expect(1)
        .create();
    let second = server
        .mock("GET", "/b.tar.gz")
        .with_body(png_archive(&["c3.png", "c4.png", "e3.png", "e4.png"]))
        .expect(1)
        .create();

    let temp = TempDir::new().unwrap();
    let config = write_fixture(temp.path(), &server.url());

    let output = Command::cargo_bin("cxr")
        .unwrap()
        .args(["run", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    first.assert();
    second.assert();

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["batches"].as_array().unwrap().len(), 2);
    let manifest = report["export_manifest_path"].as_str().unwrap();
    assert!(Path::new(manifest).exists());

    let work = temp.path().join("work");
    let leftovers: Vec<_> = files_under(&work.join("downloads"));
    assert!(leftovers.is_empty(), "archives left behind: {leftovers:?}");
    assert!(files_under(&work.join("extracted")).is_empty());

    let status = Command::cargo_bin("cxr")
        .unwrap()
        .args(["status", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    let status: serde_json::Value = serde_json::from_slice(&status.stdout).unwrap();
    assert_eq!(status["ledger"]["last_completed_batch"], 2);
    if !status["resume"].is_null() {
        assert!(status["resume"]["batch_ordinal"].as_u64().unwrap() <= 2);
    }
    assert!(!status["export"].is_null());
}

#[test]
fn test_run_fails_fast_on_unreachable_archive() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/a.tar.gz")
        .with_body(png_archive(&["c1.png", "c2.png", "e1.png", "e2.png"]))
        .create();
    server.mock("GET", "/b.tar.gz").with_status(500).create();

    let temp = TempDir::new().unwrap();
    let config = write_fixture(temp.path(), &server.url());

    Command::cargo_bin("cxr")
        .unwrap()
        .args(["run", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("batch 2 failed"));

    assert!(!temp.path().join("work").join("artifacts").join("export_manifest.json").exists());
}

/// Regular files below `dir`; a missing directory counts as empty.
fn files_under(dir: &Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(files_under(&path));
        } else {
            files.push(path);
        }
    }
    files
}
