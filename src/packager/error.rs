//! Error types for the packaging pipeline.
//!
//! Every stage reports through the single [`Error`] enum so the orchestrator can
//! decide, per variant, whether a failure is fatal or recoverable by falling
//! back to the archive packager.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::pipeline::PipelineState;

/// Result type alias for packaging operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the pipeline stages
#[derive(Error, Debug)]
pub enum Error {
    /// Model artifact path does not exist
    #[error("model artifact not found: {}", path.display())]
    NotFound {
        /// Requested artifact path
        path: PathBuf,
    },

    /// Model artifact exists but cannot be opened or read
    #[error("model artifact {} could not be read: {source}", path.display())]
    Unreadable {
        /// Artifact path
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Extension or content matches no supported framework
    #[error("unsupported model format for {}: {reason}", path.display())]
    UnsupportedFormat {
        /// Artifact path
        path: PathBuf,
        /// What the inspector saw
        reason: String,
    },

    /// Context directory is non-empty and overwrite was not allowed
    #[error(
        "build context {} already exists and is not empty (pass --force to overwrite)",
        path.display()
    )]
    ContextExists {
        /// Context directory
        path: PathBuf,
    },

    /// Staging a file into the build context failed
    #[error("failed {action} at {}: {source}", path.display())]
    ContextWrite {
        /// Operation being performed
        action: String,
        /// Path being written
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A caller path lies inside the build context, so staging would destroy it
    #[error(
        "build context {} contains the {role} {}; choose a context directory outside it",
        context.display(),
        path.display()
    )]
    ContextOverlap {
        /// Context directory
        context: PathBuf,
        /// Caller path inside the context
        path: PathBuf,
        /// What the path is used for
        role: String,
    },

    /// Image reference does not match the reference grammar
    #[error("invalid image reference `{reference}`: {reason}")]
    InvalidReference {
        /// Reference as supplied
        reference: String,
        /// Which rule it broke
        reason: String,
    },

    /// Build tool is missing, not executable, or its daemon is not responding
    #[error("build tool `{tool}` is unavailable: {reason}")]
    BuildToolUnavailable {
        /// Tool name or path
        tool: String,
        /// Why the tool was considered unavailable
        reason: String,
        /// Output captured before the tool was classified unavailable
        diagnostics: String,
    },

    /// Build tool ran and exited unsuccessfully
    #[error("image build failed with {}", describe_exit(*exit_code))]
    BuildFailed {
        /// Exit code, `None` when terminated by a signal
        exit_code: Option<i32>,
        /// Tail of the combined build output
        diagnostics: String,
    },

    /// Caller cancelled the build
    #[error("image build cancelled")]
    BuildCancelled {
        /// Output captured before cancellation
        diagnostics: String,
    },

    /// Build exceeded its time budget
    #[error("image build timed out after {} seconds", timeout.as_secs())]
    BuildTimedOut {
        /// Configured timeout
        timeout: Duration,
        /// Output captured before the timeout fired
        diagnostics: String,
    },

    /// Writing the fallback archive failed
    #[error("failed {action} at {}: {source}", path.display())]
    ArchiveWrite {
        /// Operation being performed
        action: String,
        /// Path being written
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Internal invariant violation
    #[error("{0}")]
    GenericError(String),
}

fn describe_exit(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_string(),
    }
}

impl Error {
    /// Build output captured before the error, if this error carries any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::BuildToolUnavailable { diagnostics, .. }
            | Self::BuildFailed { diagnostics, .. }
            | Self::BuildCancelled { diagnostics }
            | Self::BuildTimedOut { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }

    /// Whether the child build was interrupted rather than completed.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::BuildCancelled { .. } | Self::BuildTimedOut { .. })
    }
}

/// Attaches an action and a path to I/O failures.
pub trait ErrorExt<T> {
    /// Maps an I/O error into [`Error::ContextWrite`].
    fn fs_context(self, action: &str, path: &Path) -> Result<T>;

    /// Maps an I/O error into [`Error::ArchiveWrite`].
    fn archive_context(self, action: &str, path: &Path) -> Result<T>;
}

impl<T> ErrorExt<T> for std::result::Result<T, std::io::Error> {
    fn fs_context(self, action: &str, path: &Path) -> Result<T> {
        self.map_err(|source| Error::ContextWrite {
            action: action.to_string(),
            path: path.to_path_buf(),
            source,
        })
    }

    fn archive_context(self, action: &str, path: &Path) -> Result<T> {
        self.map_err(|source| Error::ArchiveWrite {
            action: action.to_string(),
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fatal pipeline failure wrapping the first fatal cause.
#[derive(Error, Debug)]
#[error("pipeline aborted while {stage}: {source}")]
pub struct PipelineAborted {
    /// State the pipeline was in when the failure occurred
    pub stage: PipelineState,
    /// First fatal cause
    #[source]
    pub source: Error,
    /// Build context left on disk for inspection, if any
    pub context_dir: Option<PathBuf>,
}

impl PipelineAborted {
    /// Whether the run stopped because the caller cancelled it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, Error::BuildCancelled { .. })
    }
}
