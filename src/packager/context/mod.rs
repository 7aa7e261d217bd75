//! Build context assembly.
//!
//! A build context is a directory holding exactly four files: the model
//! (`model.<ext>`), the entry point (`infer.py`), the dependency manifest
//! (`requirements.txt`) and the build descriptor (`Dockerfile`). The same
//! artifact and template version always produce byte-identical files.

pub mod descriptor;
pub mod templates;

use handlebars::Handlebars;
use std::path::{Path, PathBuf};

use crate::packager::artifact::{ArtifactDescriptor, Framework};
use crate::packager::checksum::{calculate_directory_sha256, verify_file_sha256};
use crate::packager::error::{Error, ErrorExt, Result};
use crate::packager::fs::{self, DirOrigin};

pub use descriptor::{BuildDescriptor, CopyInstruction};
use templates::{
    DESCRIPTOR_FILE, ENTRY_POINT_FILE, MANIFEST_FILE, PYTORCH_ENTRY_POINT, PYTORCH_MANIFEST,
    TEMPLATE_VERSION, TENSORFLOW_ENTRY_POINT, TENSORFLOW_MANIFEST,
};

/// Default base runtime image
pub const DEFAULT_BASE_IMAGE: &str = "python:3.9-slim";

/// Default working directory inside the image
pub const DEFAULT_WORKDIR: &str = "/app";

/// A staged build context owned by one pipeline run.
#[derive(Debug)]
pub struct BuildContext {
    root: PathBuf,
    model_file: String,
    descriptor: BuildDescriptor,
    origin: DirOrigin,
}

impl BuildContext {
    /// Context root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build descriptor written to the context
    pub fn descriptor(&self) -> &BuildDescriptor {
        &self.descriptor
    }

    /// Staged model file name (`model.<ext>`)
    pub fn model_file(&self) -> &str {
        &self.model_file
    }

    /// Staged model path
    pub fn model_path(&self) -> PathBuf {
        self.root.join(&self.model_file)
    }

    /// Staged entry point path
    pub fn entry_point_path(&self) -> PathBuf {
        self.root.join(ENTRY_POINT_FILE)
    }

    /// Staged dependency manifest path
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Staged build descriptor path
    pub fn descriptor_path(&self) -> PathBuf {
        self.root.join(DESCRIPTOR_FILE)
    }

    /// SHA-256 over the context's relative paths and contents.
    pub async fn fingerprint(&self) -> Result<String> {
        calculate_directory_sha256(&self.root)
            .await
            .fs_context("fingerprinting build context", &self.root)
    }

    /// Removes the context, or empties it when the directory predates the run.
    pub async fn discard(self) -> Result<()> {
        log::debug!("Discarding build context {}", self.root.display());
        fs::discard_dir(&self.root, self.origin).await
    }
}

/// Stages build contexts from inspected artifacts.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    base_image: String,
    workdir: String,
    entry_point: Option<PathBuf>,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            workdir: DEFAULT_WORKDIR.to_string(),
            entry_point: None,
        }
    }
}

impl ContextAssembler {
    /// Creates an assembler with the default base image and working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base runtime image.
    pub fn base_image(mut self, image: impl Into<String>) -> Self {
        self.base_image = image.into();
        self
    }

    /// Sets the working directory inside the image.
    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Uses a caller-supplied entry point instead of the built-in template.
    ///
    /// The file is copied byte-for-byte as `infer.py`; it is expected to
    /// accept `--model <path>`.
    pub fn entry_point(mut self, path: Option<PathBuf>) -> Self {
        self.entry_point = path;
        self
    }

    /// Assembles a build context for `artifact` in `dir`.
    ///
    /// `dir` is created if missing. A non-empty `dir` fails with
    /// [`Error::ContextExists`] unless `overwrite` is set, and a `dir` holding
    /// the artifact or the entry point fails with [`Error::ContextOverlap`].
    /// On any failure the files written so far are removed.
    pub async fn assemble(
        &self,
        artifact: &ArtifactDescriptor,
        dir: &Path,
        overwrite: bool,
    ) -> Result<BuildContext> {
        let (manifest_template, entry_point_template) = match artifact.framework() {
            Framework::PyTorch => (PYTORCH_MANIFEST, PYTORCH_ENTRY_POINT),
            Framework::TensorFlow => (TENSORFLOW_MANIFEST, TENSORFLOW_ENTRY_POINT),
            Framework::Unknown => {
                return Err(Error::UnsupportedFormat {
                    path: artifact.path().to_path_buf(),
                    reason: "framework could not be determined unambiguously".to_string(),
                });
            }
        };

        // Clearing or discarding `dir` must never reach the caller's inputs
        fs::ensure_outside(dir, artifact.path(), "model artifact").await?;
        if let Some(entry_point) = &self.entry_point {
            fs::ensure_outside(dir, entry_point, "entry point").await?;
        }

        let origin = fs::prepare_empty_dir(dir, overwrite).await?;

        match self
            .stage(artifact, dir, manifest_template, entry_point_template)
            .await
        {
            Ok(descriptor) => Ok(BuildContext {
                root: dir.to_path_buf(),
                model_file: artifact.staged_file_name(),
                descriptor,
                origin,
            }),
            Err(e) => {
                if let Err(cleanup) = fs::discard_dir(dir, origin).await {
                    log::warn!(
                        "Failed to clean up partial build context {}: {}",
                        dir.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    async fn stage(
        &self,
        artifact: &ArtifactDescriptor,
        dir: &Path,
        manifest_template: &str,
        entry_point_template: &str,
    ) -> Result<BuildDescriptor> {
        let model_file = artifact.staged_file_name();
        let model_path = dir.join(&model_file);

        fs::copy_file(artifact.path(), &model_path).await?;
        verify_file_sha256(&model_path, artifact.sha256()).await?;

        let data = serde_json::json!({
            "template_version": TEMPLATE_VERSION,
            "model_file": model_file,
        });

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = render(manifest_template, &data, &manifest_path)?;
        tokio::fs::write(&manifest_path, manifest)
            .await
            .fs_context("writing dependency manifest", &manifest_path)?;

        let entry_point_path = dir.join(ENTRY_POINT_FILE);
        match &self.entry_point {
            Some(custom) => {
                log::debug!("Using caller-supplied entry point {}", custom.display());
                fs::copy_file(custom, &entry_point_path).await?;
            }
            None => {
                let script = render(entry_point_template, &data, &entry_point_path)?;
                tokio::fs::write(&entry_point_path, script)
                    .await
                    .fs_context("writing entry point", &entry_point_path)?;
            }
        }

        let descriptor = self.descriptor_for(artifact.framework(), &model_file);
        let descriptor_path = dir.join(DESCRIPTOR_FILE);
        let rendered = descriptor.render()?;
        tokio::fs::write(&descriptor_path, rendered)
            .await
            .fs_context("writing build descriptor", &descriptor_path)?;

        descriptor.verify(dir)?;
        Ok(descriptor)
    }

    fn descriptor_for(&self, framework: Framework, model_file: &str) -> BuildDescriptor {
        BuildDescriptor {
            framework,
            base_image: self.base_image.clone(),
            workdir: self.workdir.clone(),
            manifest: CopyInstruction::into_workdir(MANIFEST_FILE, &self.workdir),
            install_command: ["pip", "install", "--no-cache-dir", "-r", MANIFEST_FILE]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            files: vec![
                CopyInstruction::into_workdir(model_file, &self.workdir),
                CopyInstruction::into_workdir(ENTRY_POINT_FILE, &self.workdir),
            ],
            run_command: ["python", ENTRY_POINT_FILE, "--model", model_file]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

fn render(template: &str, data: &serde_json::Value, target: &Path) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.set_strict_mode(true);

    handlebars
        .render_template(template, data)
        .map_err(|e| Error::ContextWrite {
            action: "rendering template".to_string(),
            path: target.to_path_buf(),
            source: std::io::Error::other(e.to_string()),
        })
}
