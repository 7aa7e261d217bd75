//! Structural signatures of supported model serializations.
//!
//! Only headers and directory structures are read: the zip central directory
//! for PyTorch archives, a fixed prefix for legacy PyTorch pickles, and the
//! HDF5 superblock signature. Weights are never loaded.

use serde::Serialize;
use std::io::{self, Read, Seek, SeekFrom};

use super::Framework;

/// HDF5 format signature, found at offset 0 or after a power-of-two user block.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];

/// Local file header magic of a zip archive (`torch.save` since PyTorch 1.6).
pub const ZIP_LOCAL_HEADER: [u8; 4] = [b'P', b'K', 0x03, 0x04];

/// Pickled torch magic number written first by the legacy `torch.save` format.
pub const TORCH_LEGACY_MAGIC: [u8; 14] = [
    0x80, 0x02, 0x8a, 0x0a, 0x6c, 0xfc, 0x9c, 0x46, 0xf9, 0x20, 0x6a, 0xa8, 0x50, 0x19,
];

/// First user-block size at which an HDF5 superblock may start after offset 0.
const HDF5_FIRST_USER_BLOCK: u64 = 512;

/// Highest HDF5 superblock version defined by the format.
const HDF5_MAX_SUPERBLOCK_VERSION: u8 = 3;

/// On-disk encoding recognised inside an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactEncoding {
    /// Zip container with `<root>/data.pkl`
    TorchZip {
        /// Top-level folder holding the pickled object
        archive_root: String,
    },
    /// Pre-1.6 pickle stream
    TorchLegacyPickle,
    /// HDF5 file (Keras `.h5`)
    Hdf5 {
        /// Byte offset of the superblock
        superblock_offset: u64,
        /// Superblock version byte
        superblock_version: u8,
    },
}

impl ArtifactEncoding {
    /// Framework that produces this encoding.
    pub fn framework(&self) -> Framework {
        match self {
            Self::TorchZip { .. } | Self::TorchLegacyPickle => Framework::PyTorch,
            Self::Hdf5 { .. } => Framework::TensorFlow,
        }
    }
}

/// Returns every encoding whose signature the reader matches.
///
/// More than one match means the content is ambiguous; the caller decides what
/// to do with that.
pub fn sniff<R: Read + Seek>(reader: &mut R, len: u64) -> io::Result<Vec<ArtifactEncoding>> {
    let mut matches = Vec::new();

    let mut prefix = [0u8; TORCH_LEGACY_MAGIC.len()];
    reader.seek(SeekFrom::Start(0))?;
    let prefix_len = read_up_to(reader, &mut prefix)?;
    let prefix = &prefix[..prefix_len];

    if prefix.starts_with(&ZIP_LOCAL_HEADER) {
        reader.seek(SeekFrom::Start(0))?;
        if let Some(archive_root) = torch_archive_root(reader) {
            matches.push(ArtifactEncoding::TorchZip { archive_root });
        }
    } else if prefix.starts_with(&TORCH_LEGACY_MAGIC) {
        matches.push(ArtifactEncoding::TorchLegacyPickle);
    }

    if let Some((superblock_offset, superblock_version)) = find_hdf5_superblock(reader, len)? {
        matches.push(ArtifactEncoding::Hdf5 {
            superblock_offset,
            superblock_version,
        });
    }

    Ok(matches)
}

/// Finds the `<root>/data.pkl` entry of a PyTorch zip archive.
///
/// Only the central directory is parsed. A zip without that entry (or a
/// corrupt one) is not a PyTorch archive.
fn torch_archive_root<R: Read + Seek>(reader: &mut R) -> Option<String> {
    let archive = match zip::ZipArchive::new(reader) {
        Ok(archive) => archive,
        Err(e) => {
            log::debug!("Zip central directory unreadable: {}", e);
            return None;
        }
    };

    let mut roots: Vec<&str> = archive
        .file_names()
        .filter_map(|name| name.strip_suffix("/data.pkl"))
        .filter(|root| !root.is_empty() && !root.contains('/'))
        .collect();
    roots.sort_unstable();
    roots.first().map(|root| root.to_string())
}

/// Scans offsets 0, 512, 1024, 2048, ... for the HDF5 signature.
fn find_hdf5_superblock<R: Read + Seek>(reader: &mut R, len: u64) -> io::Result<Option<(u64, u8)>> {
    let mut header = [0u8; HDF5_SIGNATURE.len() + 1];
    let mut offset = 0u64;

    while offset + header.len() as u64 <= len {
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(&mut header)?;
        if header[..HDF5_SIGNATURE.len()] == HDF5_SIGNATURE {
            let version = header[HDF5_SIGNATURE.len()];
            if version <= HDF5_MAX_SUPERBLOCK_VERSION {
                return Ok(Some((offset, version)));
            }
            log::debug!(
                "HDF5 signature at offset {} has unknown superblock version {}",
                offset,
                version
            );
            return Ok(None);
        }

        offset = if offset == 0 {
            HDF5_FIRST_USER_BLOCK
        } else {
            match offset.checked_mul(2) {
                Some(next) => next,
                None => break,
            }
        };
    }

    Ok(None)
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
