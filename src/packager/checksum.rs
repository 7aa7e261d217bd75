//! SHA-256 digests for model artifacts and build contexts.
//!
//! File digests let the assembler prove the model was copied byte-for-byte;
//! directory digests give a single fingerprint for a staged build context.

use crate::packager::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Calculates the SHA-256 of a single file, streaming it in chunks.
pub async fn calculate_file_sha256(file_path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(file_path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Calculates a SHA-256 over every file below `dir_path`.
///
/// Files are visited in sorted relative-path order, so the result only
/// depends on names and contents. Each file contributes its relative path
/// (with `/` separators), a NUL byte and its content.
pub async fn calculate_directory_sha256(dir_path: &Path) -> std::io::Result<String> {
    let mut entries: Vec<_> = walkdir::WalkDir::new(dir_path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .collect();

    entries.sort_by_key(|e| e.path().to_path_buf());

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    for entry in entries {
        if let Ok(rel_path) = entry.path().strip_prefix(dir_path) {
            let rel = rel_path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            hasher.update(rel.as_bytes());
            hasher.update([0u8]);
        }

        let mut file = tokio::fs::File::open(entry.path()).await?;
        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Checks a file against an expected digest.
pub async fn verify_file_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = calculate_file_sha256(path).await.map_err(|source| {
        crate::packager::Error::ContextWrite {
            action: "hashing staged file".to_string(),
            path: path.to_path_buf(),
            source,
        }
    })?;

    if actual != expected {
        return Err(crate::packager::Error::ContextWrite {
            action: "verifying staged file".to_string(),
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("checksum mismatch: expected {expected}, found {actual}"),
            ),
        });
    }
    Ok(())
}
