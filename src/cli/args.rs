//! Command line argument parsing and validation.
//!
//! This module provides CLI argument parsing using clap, with validation,
//! configuration overrides and the runtime output configuration.

use clap::Parser;
use std::path::PathBuf;

use crate::config::PackagerConfig;
use crate::packager::fallback::ArchiveFormat;
use crate::packager::pipeline::{FailurePolicy, PackageRequest};
use crate::packager::progress::ProgressSink;

/// Package trained ML models into container images
#[derive(Parser, Debug)]
#[command(
    name = "kodegen_bundler_model",
    version,
    about = "Package trained ML models into container images",
    long_about = "Packages a PyTorch (.pth, .pt) or Keras HDF5 (.h5, .hdf5) model into a Docker image.

Detects the framework, stages a build context (model, infer.py, requirements.txt,
Dockerfile), and runs `docker build`. When Docker is unavailable, or the build fails
with --lenient, a portable archive is written to --output-dir instead.

Usage:
  kodegen_bundler_model -i resnet18_full.pth -t my_ai_model:1.0
  kodegen_bundler_model --input model.h5 --image ml_model:latest --archive-format zip

Exit code 0 = image built or fallback archive written; 1 = failed; 130 = interrupted."
)]
pub struct Args {
    /// Path to the model file (e.g. resnet18_full.pth, my_model.h5)
    #[arg(short = 'i', long, value_name = "PATH", env = "MODELPACK_INPUT")]
    pub input: PathBuf,

    /// Image name and tag (e.g. my_ai_model:1.0); the tag defaults to latest
    #[arg(short = 't', long, value_name = "NAME:TAG", env = "MODELPACK_IMAGE")]
    pub image: String,

    /// Inference script to ship instead of the generated infer.py
    #[arg(long, value_name = "PATH", env = "MODELPACK_ENTRY_POINT")]
    pub entry_point: Option<PathBuf>,

    /// Build context directory (default: a fresh directory under the system temp dir)
    #[arg(long, value_name = "DIR", env = "MODELPACK_CONTEXT_DIR")]
    pub context_dir: Option<PathBuf>,

    /// Directory receiving the fallback archive
    #[arg(long, value_name = "DIR", default_value = ".", env = "MODELPACK_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Clear a non-empty --context-dir instead of failing
    #[arg(long)]
    pub force: bool,

    /// Keep the build context after the run
    #[arg(long)]
    pub keep_context: bool,

    /// Fall back to an archive when the image build fails
    #[arg(long)]
    pub lenient: bool,

    /// Never produce a fallback archive
    #[arg(long)]
    pub no_fallback: bool,

    /// Image build timeout in seconds
    #[arg(long, value_name = "SECONDS", env = "MODELPACK_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Build tool name or path (default: docker)
    #[arg(long, value_name = "TOOL", env = "MODELPACK_BUILD_TOOL")]
    pub build_tool: Option<String>,

    /// Fallback archive format: tar.gz or zip
    #[arg(long, value_name = "FORMAT", env = "MODELPACK_ARCHIVE_FORMAT")]
    pub archive_format: Option<ArchiveFormat>,

    /// Configuration file (default: ./modelpack.toml when present)
    #[arg(long, value_name = "PATH", env = "MODELPACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the result as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Show build tool output and detailed progress
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print errors and the final result
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.input.as_os_str().is_empty() {
            return Err("Input path cannot be empty".to_string());
        }

        if self.image.trim().is_empty() {
            return Err("Image reference cannot be empty".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be greater than zero".to_string());
        }

        if self.lenient && self.no_fallback {
            return Err(
                "--lenient falls back to an archive and cannot be combined with --no-fallback"
                    .to_string(),
            );
        }

        if self.force && self.context_dir.is_none() {
            return Err("--force only applies together with --context-dir".to_string());
        }

        Ok(())
    }

    /// Applies flag and environment overrides on top of file configuration.
    pub fn apply_to(&self, config: &mut PackagerConfig) {
        if let Some(tool) = &self.build_tool {
            config.build_tool = tool.clone();
        }
        if let Some(timeout) = self.timeout {
            config.build_timeout_secs = timeout;
        }
        if let Some(format) = self.archive_format {
            config.archive_format = format;
        }
    }

    /// Pipeline request described by these arguments.
    pub fn package_request(&self) -> PackageRequest {
        PackageRequest {
            artifact: self.input.clone(),
            image: self.image.clone(),
            entry_point: self.entry_point.clone(),
            context_dir: self.context_dir.clone(),
            output_dir: self.output_dir.clone(),
            overwrite: self.force,
            retain_context: self.keep_context,
            policy: if self.lenient {
                FailurePolicy::Lenient
            } else {
                FailurePolicy::Strict
            },
            fallback: !self.no_fallback,
        }
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Output manager for terminal output
    output: super::OutputManager,
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        // JSON output owns stdout
        let output = super::OutputManager::new(args.verbose, args.quiet || args.json);

        Self { output }
    }
}

impl RuntimeConfig {
    /// Get a reference to the output manager
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }

    /// Print success message if not in quiet mode
    pub fn success(&self, message: &str) -> std::io::Result<()> {
        self.output.success(message)
    }

    /// Print warning message if not in quiet mode
    pub fn warn(&self, message: &str) -> std::io::Result<()> {
        self.output.warn(message)
    }

    /// Print progress message
    pub fn progress(&self, message: &str) -> std::io::Result<()> {
        self.output.progress(message)
    }

    /// Print indented text
    pub fn indent(&self, message: &str) -> std::io::Result<()> {
        self.output.indent(message)
    }
}

impl ProgressSink for RuntimeConfig {
    fn progress(&self, message: &str) {
        let _ = RuntimeConfig::progress(self, message);
    }

    fn indent(&self, line: &str) {
        let _ = RuntimeConfig::indent(self, line);
    }

    fn warn(&self, message: &str) {
        let _ = RuntimeConfig::warn(self, message);
    }

    fn success(&self, message: &str) {
        let _ = RuntimeConfig::success(self, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["kodegen_bundler_model"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn parses_original_short_flags() {
        let args = parse(&["-i", "resnet18_full.pth", "-t", "my_ai_model:1.0"]);
        assert_eq!(args.input, PathBuf::from("resnet18_full.pth"));
        assert_eq!(args.image, "my_ai_model:1.0");
        assert_eq!(args.output_dir, PathBuf::from("."));
        args.validate().unwrap();
    }

    #[test]
    fn builds_request_from_flags() {
        let args = parse(&[
            "-i",
            "model.h5",
            "-t",
            "ml_model",
            "--lenient",
            "--keep-context",
            "--context-dir",
            "ctx",
            "--force",
        ]);
        let request = args.package_request();
        assert_eq!(request.policy, FailurePolicy::Lenient);
        assert!(request.fallback);
        assert!(request.retain_context);
        assert!(request.overwrite);
        assert_eq!(request.context_dir, Some(PathBuf::from("ctx")));
    }

    #[test]
    fn rejects_lenient_without_fallback() {
        let args = parse(&["-i", "m.pth", "-t", "m", "--lenient", "--no-fallback"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let args = parse(&["-i", "m.pth", "-t", "m", "--timeout", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn flags_override_configuration() {
        let args = parse(&[
            "-i",
            "m.pth",
            "-t",
            "m",
            "--build-tool",
            "podman",
            "--timeout",
            "60",
            "--archive-format",
            "zip",
        ]);
        let mut config = PackagerConfig::default();
        args.apply_to(&mut config);
        assert_eq!(config.build_tool, "podman");
        assert_eq!(config.build_timeout_secs, 60);
        assert_eq!(config.archive_format, ArchiveFormat::Zip);
    }

    #[test]
    fn unknown_archive_format_is_a_parse_error() {
        let result = Args::try_parse_from([
            "kodegen_bundler_model",
            "-i",
            "m.pth",
            "-t",
            "m",
            "--archive-format",
            "rar",
        ]);
        assert!(result.is_err());
    }
}
