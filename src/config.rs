//! Packager configuration.
//!
//! Values come from built-in defaults, then an optional TOML file
//! (`--config <path>`, or `modelpack.toml` in the working directory), then
//! command line flags and `MODELPACK_*` environment variables applied by the
//! CLI layer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CliError, Result};
use crate::packager::context::{DEFAULT_BASE_IMAGE, DEFAULT_WORKDIR};
use crate::packager::fallback::ArchiveFormat;
use crate::packager::image::config::{
    BUILD_TIMEOUT, DEFAULT_BUILD_TOOL, DIAGNOSTIC_CAPTURE_LIMIT, KILL_GRACE_PERIOD, PROBE_TIMEOUT,
};

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "modelpack.toml";

/// Smallest accepted diagnostic capture limit (1 KiB)
const MIN_CAPTURE_LIMIT: usize = 1024;

/// Tunables for a packaging run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackagerConfig {
    /// Build tool name or path
    pub build_tool: String,
    /// Base runtime image written into the build descriptor
    pub base_image: String,
    /// Working directory inside the image
    pub workdir: String,
    /// Parent of auto-created build contexts; system temp dir when unset
    pub work_dir: Option<PathBuf>,
    /// Image build timeout in seconds
    pub build_timeout_secs: u64,
    /// Build tool probe timeout in seconds
    pub probe_timeout_secs: u64,
    /// Seconds between SIGTERM and SIGKILL when stopping the build tool
    pub kill_grace_secs: u64,
    /// Bytes of build output retained for diagnostics
    pub capture_limit: usize,
    /// Fallback archive format
    pub archive_format: ArchiveFormat,
    /// Run `<tool> image inspect` after a successful build
    pub verify_image: bool,
    /// Check the build tool's daemon responds before building
    pub probe_daemon: bool,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            build_tool: DEFAULT_BUILD_TOOL.to_string(),
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            workdir: DEFAULT_WORKDIR.to_string(),
            work_dir: None,
            build_timeout_secs: BUILD_TIMEOUT.as_secs(),
            probe_timeout_secs: PROBE_TIMEOUT.as_secs(),
            kill_grace_secs: KILL_GRACE_PERIOD.as_secs(),
            capture_limit: DIAGNOSTIC_CAPTURE_LIMIT,
            archive_format: ArchiveFormat::default(),
            verify_image: true,
            probe_daemon: true,
        }
    }
}

impl PackagerConfig {
    /// Loads a configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CliError::InvalidArguments {
            reason: format!("cannot read config file {}: {}", path.display(), e),
        })?;
        let config: Self = toml::from_str(&content)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `explicit` if given, else `modelpack.toml` in the working
    /// directory if present, else the defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Self::load(local);
        }

        Ok(Self::default())
    }

    /// Checks values that deserialization alone cannot.
    pub fn validate(&self) -> Result<()> {
        if self.build_tool.trim().is_empty() {
            return invalid("build_tool cannot be empty".to_string());
        }
        if self.base_image.trim().is_empty() {
            return invalid("base_image cannot be empty".to_string());
        }
        if !self.workdir.starts_with('/') {
            return invalid(format!(
                "workdir must be an absolute path inside the image, got `{}`",
                self.workdir
            ));
        }
        if self.build_timeout_secs == 0 {
            return invalid("build_timeout_secs must be greater than zero".to_string());
        }
        if self.probe_timeout_secs == 0 {
            return invalid("probe_timeout_secs must be greater than zero".to_string());
        }
        if self.capture_limit < MIN_CAPTURE_LIMIT {
            return invalid(format!(
                "capture_limit must be at least {} bytes",
                MIN_CAPTURE_LIMIT
            ));
        }
        Ok(())
    }

    /// Image build timeout
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    /// Build tool probe timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Grace period between SIGTERM and SIGKILL
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    /// Parent directory for auto-created build contexts.
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn invalid(reason: String) -> Result<()> {
    Err(CliError::InvalidArguments { reason }.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn defaults_are_valid() {
        let config = PackagerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.build_tool, "docker");
        assert_eq!(config.base_image, "python:3.9-slim");
        assert_eq!(config.build_timeout(), Duration::from_secs(1800));
        assert_eq!(config.archive_format, ArchiveFormat::TarGz);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: PackagerConfig = toml::from_str(
            r#"
            build_tool = "podman"
            archive_format = "zip"
            build_timeout_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.build_tool, "podman");
        assert_eq!(config.archive_format, ArchiveFormat::Zip);
        assert_eq!(config.build_timeout_secs, 600);
        assert_eq!(config.workdir, "/app");
        assert!(config.probe_daemon);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<PackagerConfig>("buildtool = \"docker\"").is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = PackagerConfig::load(Path::new("/nonexistent/modelpack.toml")).unwrap_err();
        assert!(matches!(err, AppError::Cli(CliError::InvalidArguments { .. })));
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("modelpack.toml");
        std::fs::write(&path, "base_image = \"python:3.11-slim\"\n").unwrap();

        let config = PackagerConfig::discover(Some(&path)).unwrap();
        assert_eq!(config.base_image, "python:3.11-slim");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = PackagerConfig {
            workdir: "app".to_string(),
            ..PackagerConfig::default()
        };
        assert!(config.validate().is_err());

        config.workdir = "/app".to_string();
        config.build_timeout_secs = 0;
        assert!(config.validate().is_err());

        config.build_timeout_secs = 10;
        config.capture_limit = 10;
        assert!(config.validate().is_err());
    }
}
