//! Deterministic archive writers.
//!
//! Entries are written in the order given with fixed metadata: mode `0644`,
//! owner `0:0`, mtime zero (gzip header included) or the zip epoch. The same
//! inputs always produce the same bytes.

use flate2::{Compression, GzBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Permission bits recorded for every entry
const ENTRY_MODE: u32 = 0o644;

/// Entries at or above this size need zip64 records
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Compressed archive format for the fallback package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    /// Gzip-compressed tarball
    #[default]
    #[serde(rename = "tar.gz", alias = "tgz")]
    TarGz,
    /// Deflate-compressed zip
    #[serde(rename = "zip")]
    Zip,
}

impl ArchiveFormat {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tar.gz" | "tgz" => Ok(Self::TarGz),
            "zip" => Ok(Self::Zip),
            other => Err(format!(
                "unknown archive format `{other}` (expected tar.gz or zip)"
            )),
        }
    }
}

/// One file to place at the archive root.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Name inside the archive
    pub name: String,
    /// File on disk providing the content
    pub source: PathBuf,
}

/// Writes `entries` to `destination` in `format`. Blocking.
pub fn write_archive(format: ArchiveFormat, entries: &[ArchiveEntry], destination: &Path) -> io::Result<()> {
    let file = File::create(destination)?;
    let file = match format {
        ArchiveFormat::TarGz => write_tar_gz(entries, file)?,
        ArchiveFormat::Zip => write_zip(entries, file)?,
    };
    file.sync_all()
}

fn write_tar_gz(entries: &[ArchiveEntry], file: File) -> io::Result<File> {
    let encoder = GzBuilder::new()
        .mtime(0)
        .write(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Deterministic);

    for entry in entries {
        let mut source = File::open(&entry.source)?;
        let size = source.metadata()?.len();

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(size);
        header.set_mode(ENTRY_MODE);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_cksum();

        builder.append_data(&mut header, &entry.name, &mut source)?;
    }

    let encoder = builder.into_inner()?;
    let writer = encoder.finish()?;
    writer.into_inner().map_err(|e| e.into_error())
}

fn write_zip(entries: &[ArchiveEntry], file: File) -> io::Result<File> {
    let mut writer = zip::ZipWriter::new(BufWriter::new(file));

    for entry in entries {
        let mut source = File::open(&entry.source)?;
        let size = source.metadata()?.len();

        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(ENTRY_MODE)
            .large_file(size >= ZIP64_THRESHOLD);

        writer
            .start_file(entry.name.as_str(), options)
            .map_err(io::Error::other)?;
        io::copy(&mut source, &mut writer)?;
    }

    let mut buffered = writer.finish().map_err(io::Error::other)?;
    buffered.flush()?;
    buffered.into_inner().map_err(|e| e.into_error())
}
