//! Shared fixtures for integration tests
//!
//! Layer files live in `tests/fixtures/layers`. `runner_cmd` builds a
//! `qemu-runner` invocation isolated from the caller's environment.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use qemu_layer::Layer;

/// Environment variables the runner reads; cleared for every CLI test
pub const RUNNER_ENV_VARS: &[&str] = &[
    "QEMU_DEV",
    "QEMU_DIR",
    "QEMU_FLAGS",
    "QEMU_RUNNER_FLAGS",
    "QEMU_RUNNER_LAYERS",
    "PATHEXT",
    "RUST_LOG",
];

/// Directory holding the fixture layers
pub fn layers_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/layers")
}

/// Path to a fixture layer
pub fn layer_path(name: &str) -> PathBuf {
    layers_dir().join(name)
}

/// Text of a fixture layer
pub fn layer_text(name: &str) -> String {
    fs::read_to_string(layer_path(name)).expect("fixture layer exists")
}

/// Parsed fixture layer
pub fn layer(name: &str) -> Layer {
    qemu_layer::parse_layer(&layer_text(name)).expect("fixture layer parses")
}

/// Copy fixture layers into `dir`
pub fn copy_layers(dir: &Path, names: &[&str]) {
    for name in names {
        fs::copy(layer_path(name), dir.join(name)).expect("copy fixture layer");
    }
}

/// `qemu-runner` command running in `workdir` with a clean environment.
///
/// `XDG_CONFIG_HOME` and `PATH` both point into `workdir`, so neither a user
/// config nor an installed QEMU leaks into the result.
pub fn runner_cmd(workdir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("qemu-runner").expect("qemu-runner binary");
    cmd.current_dir(workdir);
    for var in RUNNER_ENV_VARS {
        cmd.env_remove(var);
    }

    let empty_bin = workdir.join(".empty-bin");
    fs::create_dir_all(&empty_bin).expect("create empty bin dir");
    cmd.env("PATH", &empty_bin);
    cmd.env("XDG_CONFIG_HOME", workdir.join(".config"));
    cmd
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
