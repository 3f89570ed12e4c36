//! Integration tests for otactl
//!
//! Each test drives the binary over a temporary flash image and checks
//! output and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PARTITION_SIZE: usize = 64 * 1024;

fn otactl() -> Command {
    Command::cargo_bin("otactl").unwrap()
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = serde_json::json!({
            "partitions": [
                {"name": "app", "offset": 0, "len": PARTITION_SIZE},
                {"name": "download", "offset": PARTITION_SIZE, "len": PARTITION_SIZE}
            ],
            "aes": {
                "key": "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4",
                "iv": "000102030405060708090a0b0c0d0e0f"
            },
            "ota": {"chunk_size": 1024}
        });
        fs::write(
            dir.path().join("layout.json"),
            serde_json::to_string_pretty(&layout).unwrap(),
        )
        .unwrap();

        let firmware: Vec<u8> = (0..10_000u32).map(|i| (i / 5 % 251) as u8).collect();
        fs::write(dir.path().join("app.bin"), firmware).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn flash_args(&self) -> Vec<String> {
        vec![
            "--image".to_string(),
            self.path("flash.bin").display().to_string(),
            "--layout".to_string(),
            self.path("layout.json").display().to_string(),
        ]
    }

    fn run(&self, command: &str, extra: &[&str]) -> Command {
        let mut cmd = otactl();
        cmd.arg(command).args(self.flash_args()).args(extra);
        cmd
    }

    fn pack(&self, extra: &[&str]) {
        let input = self.path("app.bin");
        let output = self.path("app.rbl");
        let layout = self.path("layout.json");
        otactl()
            .args(["pack", path_str(&input), "-o", path_str(&output)])
            .args(["-p", "app", "--fw-version", "1.4.2", "-l", path_str(&layout)])
            .args(extra)
            .assert()
            .success();
    }

    fn stage(&self) {
        let package = self.path("app.rbl");
        self.run("stage", &[path_str(&package), "--create"])
            .assert()
            .success();
    }

    fn json(&self, command: &str, extra: &[&str]) -> Value {
        let output = self.run(command, extra).arg("--json").output().unwrap();
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_cli_help() {
    otactl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("raw flash image files"));
}

#[test]
fn test_cli_version() {
    otactl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("otactl"));
}

#[test]
fn test_pack_stage_upgrade_workflow() {
    let ws = Workspace::new();
    ws.pack(&["--compress", "--encrypt"]);
    ws.stage();

    let check = ws.json("check", &[]);
    assert_eq!(check["success"], true);
    assert_eq!(check["needs_upgrade"], true);
    assert_eq!(check["staged"]["version"], "1.4.2");

    let upgrade = ws.json("upgrade", &[]);
    assert_eq!(upgrade["success"], true);
    assert_eq!(upgrade["outcome"]["Upgraded"]["partition"], "app");
    assert_eq!(
        upgrade["outcome"]["Upgraded"]["transform"]["bytes_written"],
        10_000
    );

    let image = fs::read(ws.path("flash.bin")).unwrap();
    let firmware = fs::read(ws.path("app.bin")).unwrap();
    assert_eq!(&image[..firmware.len()], firmware.as_slice());

    let check = ws.json("check", &[]);
    assert_eq!(check["needs_upgrade"], false);

    ws.run("verify", &["app"])
        .assert()
        .success()
        .stdout(predicate::str::contains("version 1.4.2"));
}

#[test]
fn test_erased_image_has_no_package() {
    let ws = Workspace::new();
    fs::write(ws.path("flash.bin"), vec![0xFF; 2 * PARTITION_SIZE]).unwrap();

    let check = ws.json("check", &[]);
    assert_eq!(check["success"], true);
    assert_eq!(check["needs_upgrade"], false);
    assert!(check["staged"].is_null());

    ws.run("upgrade", &[])
        .assert()
        .success()
        .stdout(predicate::str::contains("No package staged"));
    assert!(fs::read(ws.path("flash.bin"))
        .unwrap()
        .iter()
        .all(|&b| b == 0xFF));
}

#[test]
fn test_inspect_reports_headers() {
    let ws = Workspace::new();
    ws.pack(&[]);
    ws.stage();

    let inspect = ws.json("inspect", &[]);
    let partitions = inspect["partitions"].as_array().unwrap();
    assert_eq!(partitions.len(), 2);
    assert_eq!(partitions[0]["partition"], "app");
    assert!(partitions[0]["error"].is_string());
    assert_eq!(partitions[1]["role"], "download");
    assert_eq!(partitions[1]["header"]["name"], "app");
    assert_eq!(partitions[1]["header"]["size_raw"], 10_000);
}

#[test]
fn test_inspect_unknown_partition_exit_code() {
    let ws = Workspace::new();
    ws.pack(&[]);
    ws.stage();

    ws.run("inspect", &["bootloader"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("bootloader"));
}

#[test]
fn test_verify_corrupted_package_exit_code() {
    let ws = Workspace::new();
    ws.pack(&[]);
    ws.stage();

    let mut image = fs::read(ws.path("flash.bin")).unwrap();
    image[PARTITION_SIZE + 96 + 500] ^= 0x01;
    fs::write(ws.path("flash.bin"), &image).unwrap();

    ws.run("verify", &[]).assert().code(3);
}

#[test]
fn test_upgrade_corrupted_package_keeps_destination_uncommitted() {
    let ws = Workspace::new();
    ws.pack(&[]);
    ws.stage();

    let mut image = fs::read(ws.path("flash.bin")).unwrap();
    image[PARTITION_SIZE + 96 + 500] ^= 0x01;
    fs::write(ws.path("flash.bin"), &image).unwrap();

    ws.run("upgrade", &["--no-precheck"]).assert().failure();

    let image = fs::read(ws.path("flash.bin")).unwrap();
    assert!(image[PARTITION_SIZE - 96..PARTITION_SIZE]
        .iter()
        .all(|&b| b == 0xFF));
}

#[test]
fn test_upgrade_dry_run_leaves_image() {
    let ws = Workspace::new();
    ws.pack(&["--compress"]);
    ws.stage();
    let before = fs::read(ws.path("flash.bin")).unwrap();

    ws.run("upgrade", &["--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Upgraded app to version 1.4.2"));

    assert_eq!(fs::read(ws.path("flash.bin")).unwrap(), before);
}

#[test]
fn test_invalid_layout_exit_code() {
    let ws = Workspace::new();
    fs::write(ws.path("layout.json"), r#"{"partitions": []}"#).unwrap();
    fs::write(ws.path("flash.bin"), vec![0xFF; 16]).unwrap();

    ws.run("check", &[])
        .arg("--json")
        .assert()
        .code(4)
        .stdout(predicate::str::contains("\"success\": false"));
}

#[test]
fn test_short_image_rejected() {
    let ws = Workspace::new();
    fs::write(ws.path("flash.bin"), vec![0xFF; 1024]).unwrap();

    ws.run("check", &[])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Invalid flash image"));
}

#[test]
fn test_stage_rejects_non_package() {
    let ws = Workspace::new();
    let raw = ws.path("app.bin");
    ws.run("stage", &[path_str(&raw), "--create"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("valid rbl header"));
}
