//! Helper functions for launchspec integration tests

use std::path::{Path, PathBuf};

use launchspec::variants::Variant;
use tempfile::TempDir;

/// Names of the descriptor variants checked in under `deploy/`.
#[allow(dead_code)]
pub const DEPLOY_FILES: [&str; 3] = [
    "ecosystem.config.js",
    "ecosystem.install.config.js",
    "ecosystem.production.config.js",
];

/// Path to the checked-in `deploy/` directory.
#[allow(dead_code)]
pub fn deploy_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("deploy")
}

/// Loads every checked-in descriptor variant.
#[allow(dead_code)]
pub fn deploy_variants() -> Vec<Variant> {
    DEPLOY_FILES
        .iter()
        .map(|name| Variant::load(deploy_dir().join(name)).unwrap())
        .collect()
}

/// Creates a temp directory and writes each `(name, contents)` pair
/// into it, replacing `{temp_path}` in the contents with the path to
/// the directory. Returns the directory, which must be kept alive for
/// the duration of the test.
#[allow(dead_code)]
pub fn write_files(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let temp_path = dir.path().to_str().unwrap().to_string();

    for (name, contents) in files {
        std::fs::write(
            dir.path().join(name),
            contents.replace("{temp_path}", &temp_path),
        )
        .unwrap();
    }

    dir
}

/// Reads the result file written by a test script, or an empty string
/// if the script never wrote one.
#[allow(dead_code)]
pub async fn read_results(dir: &TempDir) -> String {
    match tokio::fs::read_to_string(dir.path().join("results.txt")).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => panic!("Unable to read result file: {err}"),
    }
}
