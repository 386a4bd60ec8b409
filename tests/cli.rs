//! CLI test cases.
//!
//! None of these talk to Google Cloud Vision. They cover option handling and
//! the tesseract fallbacks, using a tesseract executable that doesn't exist.

use std::{fs, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// A tesseract we can be sure isn't installed.
static MISSING_TESSERACT: &str = "/nonexistent/bin/tesseract-for-cli-tests";

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("vision-hocr").unwrap();
    cmd.env_remove("GCV_KEYFILE");
    cmd
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_check_options_without_keyfile() {
    cmd().arg("check-options").assert().success();
}

#[test]
fn test_check_options_with_missing_keyfile() {
    cmd()
        .args(["check-options", "--keyfile", "/nonexistent/key.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn test_keyfile_from_environment() {
    cmd()
        .env("GCV_KEYFILE", "/nonexistent/key.json")
        .arg("check-options")
        .assert()
        .failure()
        .stderr(predicate::str::contains("/nonexistent/key.json"));
}

#[test]
fn test_check_options_with_bad_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("engine.toml");
    fs::write(&config, "image_dpi = \"lots\"\n").unwrap();
    cmd()
        .arg("check-options")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 1"));
}

#[test]
fn test_check_options_with_huge_timeout() {
    cmd()
        .args(["check-options", "--tesseract-timeout", "1e30"])
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("configuration error")
                .and(predicate::str::contains("panicked").not()),
        );
}

#[test]
fn test_hocr_with_missing_keyfile_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("page.png");
    fs::write(&image, b"not a real image").unwrap();
    let hocr = dir.path().join("page.hocr");
    let text = dir.path().join("page.txt");
    cmd()
        .arg("hocr")
        .args([&image, &hocr, &text])
        .args(["--keyfile", "/nonexistent/key.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
    assert!(!hocr.exists());
    assert!(!text.exists());
}

#[test]
fn test_languages_without_tesseract() {
    cmd()
        .args(["languages", "--tesseract", MISSING_TESSERACT])
        .assert()
        .success()
        .stdout("eng\n");
}

#[test]
fn test_geometry_without_tesseract() {
    cmd()
        .args(["orientation", "page.png", "--tesseract", MISSING_TESSERACT])
        .assert()
        .success()
        .stdout("0 0\n");
    cmd()
        .args(["deskew", "page.png", "--tesseract", MISSING_TESSERACT])
        .assert()
        .success()
        .stdout("0\n");
}

#[test]
fn test_info_without_tesseract() {
    cmd()
        .args(["info", "--tesseract", MISSING_TESSERACT])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("name: google_vision")
                .and(predicate::str::contains("available: false")),
        );
}
