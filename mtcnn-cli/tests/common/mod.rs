//! Shared helpers for the CLI integration tests.
use std::path::{Path, PathBuf};

use assert_cmd::{Command, cargo::cargo_bin_cmd};
use mtcnn_core::fixtures::write_synthetic_params;

/// Write synthetic det1/det2/det3 parameter files under `root/params`.
pub fn synthetic_params(root: &Path) -> PathBuf {
    let dir = root.join("params");
    write_synthetic_params(&dir, 17).expect("synthetic parameters");
    dir
}

/// The CLI binary running inside `cwd`, with the parameter lookup pointed at `params`.
pub fn cli_in(cwd: &Path, params: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("mtcnn-cli");
    cmd.current_dir(cwd)
        .env("MTCNN_PARAMS_DIR", params)
        .env_remove("RUST_LOG");
    cmd
}

/// Event files written into `log_dir`.
#[allow(dead_code)]
pub fn event_files(log_dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(log_dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| {
                    path.file_name()
                        .is_some_and(|name| name.to_string_lossy().starts_with("events.out.tfevents."))
                })
                .collect()
        })
        .unwrap_or_default()
}
