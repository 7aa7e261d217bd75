//! File system helpers for staging build contexts.
//!
//! All helpers are idempotent where removal is concerned, so cleanup paths can
//! call them without first checking what exists.

use crate::packager::error::{Error, ErrorExt, Result};
use path_absolutize::Absolutize;
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;

/// How a context directory came to exist, which decides how it is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirOrigin {
    /// Created by this run; discarding removes the directory itself
    Created,
    /// Existed before this run; discarding only empties it
    Reused,
}

/// Prepares an empty directory for staging.
///
/// Creates the directory when missing. An existing empty directory is reused.
/// An existing non-empty directory is cleared when `overwrite` is set and
/// rejected with [`Error::ContextExists`] otherwise.
pub async fn prepare_empty_dir(path: &Path, overwrite: bool) -> Result<DirOrigin> {
    match fs::metadata(path).await {
        Ok(metadata) if !metadata.is_dir() => Err(Error::ContextExists {
            path: path.to_path_buf(),
        }),
        Ok(_) => {
            if is_dir_empty(path).await.fs_context("reading context directory", path)? {
                return Ok(DirOrigin::Reused);
            }
            if !overwrite {
                return Err(Error::ContextExists {
                    path: path.to_path_buf(),
                });
            }
            log::debug!("Clearing existing build context {}", path.display());
            clear_dir(path).await?;
            Ok(DirOrigin::Reused)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path)
                .await
                .fs_context("creating build context directory", path)?;
            Ok(DirOrigin::Created)
        }
        Err(e) => Err(Error::ContextWrite {
            action: "inspecting build context directory".to_string(),
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

async fn is_dir_empty(path: &Path) -> io::Result<bool> {
    let mut entries = fs::read_dir(path).await?;
    Ok(entries.next_entry().await?.is_none())
}

/// Removes every entry inside `path`, keeping the directory.
pub async fn clear_dir(path: &Path) -> Result<()> {
    let mut entries = fs::read_dir(path)
        .await
        .fs_context("reading context directory", path)?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .fs_context("reading context directory", path)?
    {
        let entry_path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .fs_context("reading entry type", &entry_path)?;
        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&entry_path).await
        } else {
            fs::remove_file(&entry_path).await
        };
        match removed {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).fs_context("removing stale context entry", &entry_path),
        }
    }
    Ok(())
}

/// Removes the directory and its contents if it exists.
pub async fn remove_dir_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).fs_context("removing build context", path),
    }
}

/// Undoes [`prepare_empty_dir`] according to how the directory came to exist.
pub async fn discard_dir(path: &Path, origin: DirOrigin) -> Result<()> {
    match origin {
        DirOrigin::Created => remove_dir_all(path).await,
        DirOrigin::Reused => match fs::metadata(path).await {
            Ok(_) => clear_dir(path).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).fs_context("inspecting build context directory", path),
        },
    }
}

/// Absolute form of `path` with symlinks resolved as far as it exists.
///
/// Components past the deepest existing ancestor are appended as written.
pub async fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = path.absolutize()?.into_owned();
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();

    loop {
        match fs::canonicalize(existing).await {
            Ok(mut resolved) => {
                resolved.extend(missing.iter().rev());
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name);
                        existing = parent;
                    }
                    _ => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fails with [`Error::ContextOverlap`] when `path` is `dir` or lies inside it.
///
/// Both the lexical and the symlink-resolved locations are checked, since
/// clearing or discarding `dir` removes either.
pub async fn ensure_outside(dir: &Path, path: &Path, role: &str) -> Result<()> {
    let lexical_dir = dir.absolutize().fs_context("resolving build context path", dir)?;
    let lexical = path.absolutize().fs_context("resolving path", path)?;
    let resolved_dir = resolve_path(dir)
        .await
        .fs_context("resolving build context path", dir)?;
    let resolved = resolve_path(path).await.fs_context("resolving path", path)?;

    if lexical.starts_with(&lexical_dir) || resolved.starts_with(&resolved_dir) {
        return Err(Error::ContextOverlap {
            context: dir.to_path_buf(),
            path: path.to_path_buf(),
            role: role.to_string(),
        });
    }
    Ok(())
}

/// Copies a regular file byte-for-byte.
///
/// Fails if the source is missing or is not a regular file. The source is
/// never moved or modified.
pub async fn copy_file(from: &Path, to: &Path) -> Result<()> {
    let metadata = fs::metadata(from).await.fs_context("reading source file", from)?;
    if !metadata.is_file() {
        return Err(Error::ContextWrite {
            action: "copying source file".to_string(),
            path: from.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        });
    }
    fs::copy(from, to).await.fs_context("copying file", to)?;
    Ok(())
}
