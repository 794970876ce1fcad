//! End-to-end tests of the `qemu-runner` binary
//!
//! Every run uses `--dry-run`, so no emulator is needed.

mod fixtures;

use std::fs;

use fixtures::{copy_layers, runner_cmd};
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// run
// =============================================================================

#[test]
fn test_dry_run_prints_quoted_command_line() {
    let dir = TempDir::new().unwrap();
    copy_layers(dir.path(), &["board.ini", "edi.ini"]);

    runner_cmd(dir.path())
        .args(["run", "-l", "board.ini", "-l", "edi.ini", "--dry-run", "/path/to/kernel", "arg1", "arg2"])
        .assert()
        .success()
        .stdout(
            "qemu-system-arm -machine virt-cortex-m,flash_kb=1024 -device kp-edi-group,id=edi \
             -kernel /path/to/kernel -append 'arg1 arg2'\n",
        );
}

#[test]
fn test_built_in_layer() {
    let dir = TempDir::new().unwrap();

    runner_cmd(dir.path())
        .args(["run", "-l", "virt-cortex-m.ini", "--dry-run"])
        .assert()
        .success()
        .stdout("qemu-system-arm -machine virt_cortex_m,flash_kb=1024\n");
}

#[test]
fn test_relative_kernel_made_absolute() {
    let dir = TempDir::new().unwrap();
    copy_layers(dir.path(), &["board.ini"]);

    runner_cmd(dir.path())
        .args(["run", "-l", "board.ini", "--dry-run", "app.elf"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-kernel /").and(predicate::str::contains("app.elf\n")));
}

#[test]
fn test_debug_flags() {
    let dir = TempDir::new().unwrap();

    runner_cmd(dir.path())
        .args([
            "run",
            "-l",
            "virt-cortex-m.ini",
            "--halted",
            "--debug",
            "--debug-listen",
            "tcp::3333",
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout("qemu-system-arm -machine virt_cortex_m,flash_kb=1024 -S -gdb tcp::3333\n");
}

#[test]
fn test_explicit_qemu_and_qemu_flags() {
    let dir = TempDir::new().unwrap();

    runner_cmd(dir.path())
        .env("QEMU_FLAGS", "-d 'int,cpu'")
        .args(["run", "-l", "virt-cortex-m.ini", "--qemu", "/opt/q/qemu", "--dry-run"])
        .assert()
        .success()
        .stdout("/opt/q/qemu -d int,cpu -machine virt_cortex_m,flash_kb=1024\n");
}

#[test]
fn test_qemu_dev_overrides_explicit() {
    let dir = TempDir::new().unwrap();

    runner_cmd(dir.path())
        .env("QEMU_DEV", "/dev/build/qemu")
        .args(["run", "-l", "virt-cortex-m.ini", "--qemu", "/opt/q/qemu", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("/dev/build/qemu "));
}

#[test]
fn test_qemu_dir_search() {
    let dir = TempDir::new().unwrap();
    let qemu_dir = dir.path().join("toolchain");
    fs::create_dir_all(&qemu_dir).unwrap();
    fs::write(qemu_dir.join("qemu-system-arm"), "").unwrap();

    runner_cmd(dir.path())
        .args(["run", "-l", "virt-cortex-m.ini", "--qemu-dir"])
        .arg(&qemu_dir)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("toolchain/qemu-system-arm -machine"));
}

#[test]
fn test_runner_flags_from_environment() {
    let dir = TempDir::new().unwrap();

    runner_cmd(dir.path())
        .env("QEMU_RUNNER_FLAGS", "--halted --dry-run")
        .args(["run", "-l", "virt-cortex-m.ini"])
        .assert()
        .success()
        .stdout("qemu-system-arm -machine virt_cortex_m,flash_kb=1024 -S\n");
}

#[test]
fn test_layers_from_environment_dirs() {
    let dir = TempDir::new().unwrap();
    let layers = TempDir::new().unwrap();
    copy_layers(layers.path(), &["edi.ini"]);

    runner_cmd(dir.path())
        .env("QEMU_RUNNER_LAYERS", layers.path())
        .args(["run", "-l", "virt-cortex-m.ini", "-l", "edi.ini", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-device kp-edi-group,id=edi"));
}

#[test]
fn test_layer_dirs_from_config() {
    let dir = TempDir::new().unwrap();
    let layers = TempDir::new().unwrap();
    copy_layers(layers.path(), &["edi.ini"]);

    let config = dir.path().join("runner.toml");
    fs::write(&config, format!("layer_dirs = [{:?}]\n", layers.path().to_string_lossy())).unwrap();

    runner_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "-l", "virt-cortex-m.ini", "-l", "edi.ini", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-device kp-edi-group,id=edi"));
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_missing_layer() {
    let dir = TempDir::new().unwrap();

    runner_cmd(dir.path())
        .args(["run", "-l", "nope.ini", "--dry-run"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error: Failed to find layer nope.ini"));
}

#[test]
fn test_missing_engine() {
    let dir = TempDir::new().unwrap();
    copy_layers(dir.path(), &["edi.ini"]);

    runner_cmd(dir.path())
        .args(["run", "-l", "edi.ini", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:").and(predicate::str::contains("engine")));
}

#[test]
fn test_kernel_or_dry_run_required() {
    let dir = TempDir::new().unwrap();

    runner_cmd(dir.path()).args(["run"]).assert().failure().code(2);
}

#[test]
fn test_missing_explicit_config() {
    let dir = TempDir::new().unwrap();

    runner_cmd(dir.path())
        .args(["--config", "missing.toml", "run", "--dry-run"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_unbalanced_qemu_flags() {
    let dir = TempDir::new().unwrap();

    runner_cmd(dir.path())
        .env("QEMU_FLAGS", "'unterminated")
        .args(["run", "-l", "virt-cortex-m.ini", "--dry-run"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("QEMU_FLAGS"));
}

// =============================================================================
// make / derive / inspect
// =============================================================================

#[test]
fn test_make_derive_inspect_run() {
    let dir = TempDir::new().unwrap();
    copy_layers(dir.path(), &["board.ini", "edi.ini"]);

    runner_cmd(dir.path())
        .args(["make", "-l", "board.ini", "-o", "base.tar"])
        .assert()
        .success()
        .stdout(predicate::str::contains("base.tar (1 layers"));

    runner_cmd(dir.path())
        .args(["derive", "--bundle", "base.tar", "-l", "edi.ini", "-o", "derived.tar", "--track-qemu"])
        .assert()
        .success();

    runner_cmd(dir.path())
        .args(["inspect", "--bundle", "derived.tar"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("# Layer layers/000.ini:\n; Board layer")
                .and(predicate::str::contains("# Layer layers/001.ini:\n[device:edi]")),
        );

    runner_cmd(dir.path())
        .args(["run", "--bundle", "derived.tar", "--dry-run", "/fw.elf"])
        .assert()
        .success()
        .stdout(
            "qemu-system-arm -machine virt-cortex-m,flash_kb=1024 -device kp-edi-group,id=edi -kernel /fw.elf\n",
        );
}

#[test]
fn test_inspect_missing_bundle() {
    let dir = TempDir::new().unwrap();

    runner_cmd(dir.path())
        .args(["inspect", "--bundle", "missing.tar"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load missing.tar"));
}
