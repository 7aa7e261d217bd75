//! Artifact inspection: framework detection and a best-effort load check.
//!
//! The file extension names the framework the caller claims; the structural
//! check in [`signature`] has to agree before anything is built. A file whose
//! content matches both supported signatures is reported as
//! [`Framework::Unknown`] rather than guessed at.

pub mod signature;

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::packager::checksum::calculate_file_sha256;
use crate::packager::error::{Error, Result};

pub use signature::ArtifactEncoding;

/// Framework that produced a model artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    /// `torch.save` output (`.pth`, `.pt`)
    PyTorch,
    /// Keras HDF5 output (`.h5`, `.hdf5`)
    TensorFlow,
    /// Content matched more than one framework
    Unknown,
}

impl Framework {
    /// Framework claimed by a file extension, case-insensitive.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pth" | "pt" => Some(Self::PyTorch),
            "h5" | "hdf5" => Some(Self::TensorFlow),
            _ => None,
        }
    }

    /// Lowercase tag used in manifests and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PyTorch => "pytorch",
            Self::TensorFlow => "tensorflow",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of an inspected model artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactDescriptor {
    path: PathBuf,
    framework: Framework,
    size: u64,
    valid: bool,
    extension: String,
    encoding: Option<ArtifactEncoding>,
    sha256: String,
}

impl ArtifactDescriptor {
    /// Path of the original model file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detected framework
    pub fn framework(&self) -> Framework {
        self.framework
    }

    /// Size of the model file in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the structural check confirmed exactly one framework
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Lowercased file extension without the dot
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Encoding recognised by the structural check
    pub fn encoding(&self) -> Option<&ArtifactEncoding> {
        self.encoding.as_ref()
    }

    /// Hex SHA-256 of the model file
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Fixed name the model is staged under (`model.<ext>`).
    pub fn staged_file_name(&self) -> String {
        format!("model.{}", self.extension)
    }
}

/// Inspects a model artifact.
///
/// # Errors
///
/// * [`Error::NotFound`] - `path` does not exist
/// * [`Error::Unreadable`] - `path` is not a readable regular file
/// * [`Error::UnsupportedFormat`] - the extension is not supported, or the
///   content does not carry the signature the extension claims
pub async fn inspect(path: &Path) -> Result<ArtifactDescriptor> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(Error::Unreadable {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if !metadata.is_file() {
        return Err(Error::Unreadable {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        });
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let claimed = Framework::from_extension(&extension).ok_or_else(|| Error::UnsupportedFormat {
        path: path.to_path_buf(),
        reason: if extension.is_empty() {
            "file has no extension; expected .pth, .pt, .h5 or .hdf5".to_string()
        } else {
            format!("extension `.{extension}` is not one of .pth, .pt, .h5, .hdf5")
        },
    })?;

    let size = metadata.len();
    let owned_path = path.to_path_buf();
    let encodings = tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&owned_path)?;
        signature::sniff(&mut file, size)
    })
    .await
    .map_err(|e| Error::GenericError(format!("artifact inspection task panicked: {e}")))?
    .map_err(|source| Error::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let (framework, encoding) = resolve_framework(path, claimed, encodings)?;

    let sha256 = calculate_file_sha256(path)
        .await
        .map_err(|source| Error::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

    log::debug!(
        "Inspected {}: framework={}, size={} bytes, encoding={:?}",
        path.display(),
        framework,
        size,
        encoding
    );

    Ok(ArtifactDescriptor {
        path: path.to_path_buf(),
        framework,
        size,
        valid: framework != Framework::Unknown,
        extension,
        encoding,
        sha256,
    })
}

/// Reconciles the claimed framework with the recognised encodings.
fn resolve_framework(
    path: &Path,
    claimed: Framework,
    mut encodings: Vec<ArtifactEncoding>,
) -> Result<(Framework, Option<ArtifactEncoding>)> {
    let has_torch = encodings.iter().any(|e| e.framework() == Framework::PyTorch);
    let has_hdf5 = encodings.iter().any(|e| e.framework() == Framework::TensorFlow);

    match (has_torch, has_hdf5) {
        (true, true) => {
            log::warn!(
                "{} matches both PyTorch and HDF5 signatures; refusing to guess",
                path.display()
            );
            Ok((Framework::Unknown, None))
        }
        (false, false) => Err(Error::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: format!(
                "extension claims {claimed} but the content carries no {claimed} signature"
            ),
        }),
        _ => {
            let encoding = encodings.remove(0);
            let detected = encoding.framework();
            if detected != claimed {
                return Err(Error::UnsupportedFormat {
                    path: path.to_path_buf(),
                    reason: format!("extension claims {claimed} but the content is {detected}"),
                });
            }
            Ok((detected, Some(encoding)))
        }
    }
}
