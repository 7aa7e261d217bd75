//! Shared fixtures for the integration tests.
//!
//! Model files are synthesised with the smallest structure the inspector
//! accepts; build tools are stubbed with shell scripts.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use kodegen_bundler_model::PackagerConfig;
use kodegen_bundler_model::packager::artifact::signature::{HDF5_SIGNATURE, TORCH_LEGACY_MAGIC};
use kodegen_bundler_model::packager::image::{BuildToolProbe, ToolStatus};

/// Bytes of a `torch.save` zip archive rooted at `root/`.
pub fn torch_zip_bytes(root: &str) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file(format!("{root}/data.pkl"), options).unwrap();
    zip.write_all(&[0x80, 0x02, b'}', b'q', 0x00, b'.']).unwrap();
    zip.start_file(format!("{root}/data/0"), options).unwrap();
    zip.write_all(&[0u8; 256]).unwrap();
    zip.start_file(format!("{root}/version"), options).unwrap();
    zip.write_all(b"3\n").unwrap();
    zip.finish().unwrap().into_inner()
}

/// Bytes of a legacy (pre-1.6) torch pickle.
pub fn legacy_pickle_bytes() -> Vec<u8> {
    let mut bytes = TORCH_LEGACY_MAGIC.to_vec();
    bytes.extend_from_slice(b".\x80\x02M\xe9\x03.");
    bytes
}

/// Bytes of an HDF5 file whose superblock sits at `offset`.
pub fn hdf5_bytes(offset: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; offset];
    bytes.extend_from_slice(&HDF5_SIGNATURE);
    bytes.push(0);
    bytes.resize(offset + 2048, 0);
    bytes
}

/// Writes `bytes` to `dir/name` and returns the path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// A PyTorch zip model at `dir/name`.
pub fn torch_model(dir: &Path, name: &str) -> PathBuf {
    let root = name.split('.').next().unwrap_or("archive");
    write_file(dir, name, &torch_zip_bytes(root))
}

/// A Keras HDF5 model at `dir/name`.
pub fn keras_model(dir: &Path, name: &str) -> PathBuf {
    write_file(dir, name, &hdf5_bytes(0))
}

/// Sorted file names directly inside `dir`.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Installs an executable shell script standing in for the build tool.
///
/// `on_build` runs for `build`; every other subcommand (`version`,
/// `image inspect`) exits 0.
#[cfg(unix)]
pub fn stub_tool(dir: &Path, on_build: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("stub-docker");
    let script = format!(
        "#!/bin/sh\ncase \"$1\" in\n  build)\n{on_build}\n    ;;\n  *)\n    exit 0\n    ;;\nesac\n"
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Configuration pointing the pipeline at `tool` with short timeouts.
pub fn config_for(tool: &Path, work_dir: &Path) -> PackagerConfig {
    PackagerConfig {
        build_tool: tool.display().to_string(),
        work_dir: Some(work_dir.to_path_buf()),
        kill_grace_secs: 2,
        probe_daemon: false,
        verify_image: false,
        ..PackagerConfig::default()
    }
}

/// Probe with a fixed answer.
pub struct FixedProbe(pub ToolStatus);

impl BuildToolProbe for FixedProbe {
    async fn probe(&self, _tool: &str) -> ToolStatus {
        self.0.clone()
    }
}

/// Probe that never answers, like a hung daemon check.
pub struct StalledProbe;

impl BuildToolProbe for StalledProbe {
    async fn probe(&self, _tool: &str) -> ToolStatus {
        std::future::pending().await
    }
}

/// Whether `pid` is a live, non-zombie process.
///
/// Reads `/proc`, so it reports `false` where `/proc` is unavailable.
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // State follows the parenthesised command name
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .is_some_and(|state| state != 'Z' && state != 'X'),
        Err(_) => false,
    }
}

/// Polls until `pid` is gone or `timeout` passes; returns whether it is gone.
pub async fn wait_for_exit(pid: u32, timeout: std::time::Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while process_alive(pid) {
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    true
}

/// Probe reporting the build tool as missing.
pub fn missing_tool() -> FixedProbe {
    FixedProbe(ToolStatus::Unavailable {
        reason: "`docker` was not found".to_string(),
    })
}

/// Entry names of a `.tar.gz` archive, in order.
pub fn tar_gz_entries(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    archive
        .entries()
        .unwrap()
        .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}

/// Entry names of a `.zip` archive, in order.
pub fn zip_entries(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}
