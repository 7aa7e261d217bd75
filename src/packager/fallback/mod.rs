//! Fallback packaging: a portable archive when no image can be built.
//!
//! The archive holds the model, the entry point and the dependency manifest
//! from the build context, and deliberately omits the build descriptor.

pub mod archive;

use std::path::{Path, PathBuf};

use crate::packager::artifact::ArtifactDescriptor;
use crate::packager::checksum::calculate_file_sha256;
use crate::packager::context::BuildContext;
use crate::packager::context::templates::{ENTRY_POINT_FILE, MANIFEST_FILE};
use crate::packager::error::{Error, ErrorExt, Result};
use crate::packager::image::ImageReference;

pub use archive::{ArchiveEntry, ArchiveFormat};

/// Builds the fallback archive for a staged context.
#[derive(Debug, Clone)]
pub struct FallbackPackager {
    format: ArchiveFormat,
    output_dir: PathBuf,
}

impl FallbackPackager {
    /// Creates a packager writing `format` archives into `output_dir`.
    pub fn new(format: ArchiveFormat, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            format,
            output_dir: output_dir.into(),
        }
    }

    /// Final archive path for `reference`: `<name>_<tag>_package.<ext>`.
    pub fn archive_path(&self, reference: &ImageReference) -> PathBuf {
        self.output_dir.join(format!(
            "{}_package.{}",
            reference.file_stem(),
            self.format.extension()
        ))
    }

    /// Writes the archive and returns its path.
    ///
    /// The archive is written to a temporary sibling and renamed into place,
    /// so a failure never leaves a partial file under the final name. The only
    /// error produced is [`Error::ArchiveWrite`].
    pub async fn package(
        &self,
        artifact: &ArtifactDescriptor,
        context: &BuildContext,
        reference: &ImageReference,
    ) -> Result<PathBuf> {
        let destination = self.archive_path(reference);
        let entries = vec![
            ArchiveEntry {
                name: artifact.staged_file_name(),
                source: context.model_path(),
            },
            ArchiveEntry {
                name: ENTRY_POINT_FILE.to_string(),
                source: context.entry_point_path(),
            },
            ArchiveEntry {
                name: MANIFEST_FILE.to_string(),
                source: context.manifest_path(),
            },
        ];

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .archive_context("creating output directory", &self.output_dir)?;

        let temp = temp_sibling(&destination);
        log::info!(
            "Writing {} fallback archive to {}",
            self.format,
            destination.display()
        );

        let format = self.format;
        let temp_path = temp.clone();
        let written = tokio::task::spawn_blocking(move || {
            archive::write_archive(format, &entries, &temp_path)
        })
        .await
        .map_err(|e| Error::ArchiveWrite {
            action: "running archive writer".to_string(),
            path: temp.clone(),
            source: std::io::Error::other(e.to_string()),
        })
        .and_then(|result| result.archive_context("writing archive", &temp));

        let renamed = match written {
            Ok(()) => tokio::fs::rename(&temp, &destination)
                .await
                .archive_context("moving archive into place", &destination),
            Err(e) => Err(e),
        };

        if let Err(e) = renamed {
            if let Err(cleanup) = tokio::fs::remove_file(&temp).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                log::warn!(
                    "Failed to remove partial archive {}: {}",
                    temp.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        match calculate_file_sha256(&destination).await {
            Ok(digest) => log::info!("Archive SHA-256: {}", digest),
            Err(e) => log::debug!("Could not hash {}: {}", destination.display(), e),
        }

        Ok(destination)
    }
}

fn temp_sibling(destination: &Path) -> PathBuf {
    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "package".to_string());
    destination.with_file_name(format!(".{}.{}.partial", file_name, uuid::Uuid::new_v4()))
}
