//! Typed build descriptor and its Dockerfile rendering.

use handlebars::Handlebars;
use serde::Serialize;
use std::path::Path;

use super::templates::{DESCRIPTOR_TEMPLATE, TEMPLATE_VERSION};
use crate::packager::artifact::Framework;
use crate::packager::error::{Error, Result};

/// One `COPY` step: a path relative to the context root and an absolute
/// destination inside the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyInstruction {
    /// Path relative to the build context root
    pub source: String,
    /// Absolute path inside the image
    pub destination: String,
}

impl CopyInstruction {
    /// Copies `file_name` into `workdir`.
    pub fn into_workdir(file_name: &str, workdir: &str) -> Self {
        Self {
            source: file_name.to_string(),
            destination: format!("{}/{}", workdir.trim_end_matches('/'), file_name),
        }
    }
}

/// Declarative instructions consumed by the external build tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildDescriptor {
    /// Framework the context was assembled for
    pub framework: Framework,
    /// Base runtime image
    pub base_image: String,
    /// Working directory inside the image
    pub workdir: String,
    /// Copies the dependency manifest ahead of the install step
    pub manifest: CopyInstruction,
    /// Dependency install command, shell form
    pub install_command: Vec<String>,
    /// Remaining copies (model, entry point)
    pub files: Vec<CopyInstruction>,
    /// Default run command, exec form
    pub run_command: Vec<String>,
}

impl BuildDescriptor {
    /// Every context-relative path the descriptor references.
    pub fn referenced_sources(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.manifest.source.as_str())
            .chain(self.files.iter().map(|copy| copy.source.as_str()))
    }

    /// Checks that every referenced file exists under `context_root`.
    pub fn verify(&self, context_root: &Path) -> Result<()> {
        for source in self.referenced_sources() {
            let path = context_root.join(source);
            if !path.is_file() {
                return Err(Error::ContextWrite {
                    action: "verifying build descriptor sources".to_string(),
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "file referenced by the build descriptor is missing",
                    ),
                });
            }
        }
        Ok(())
    }

    /// Renders the descriptor as Dockerfile text.
    pub fn render(&self) -> Result<String> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(true);

        // Exec form is a JSON array of strings
        let run_command = serde_json::to_string(&self.run_command)
            .map_err(|e| Error::GenericError(format!("failed to encode run command: {e}")))?;

        let data = serde_json::json!({
            "template_version": TEMPLATE_VERSION,
            "framework": self.framework.as_str(),
            "base_image": self.base_image,
            "workdir": self.workdir,
            "manifest": self.manifest,
            "install_command": self.install_command.join(" "),
            "files": self.files,
            "run_command": run_command,
        });

        handlebars
            .render_template(DESCRIPTOR_TEMPLATE, &data)
            .map_err(|e| Error::GenericError(format!("failed to render build descriptor: {e}")))
    }
}
