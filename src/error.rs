//! Application-level error types.
//!
//! Wraps pipeline errors together with CLI, configuration and I/O failures,
//! and attaches recovery suggestions for the terminal.

use thiserror::Error;

use crate::packager::{self, PipelineAborted};

/// Result type alias for application operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Main error type for the binary and the library's outer surface
#[derive(Error, Debug)]
pub enum AppError {
    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Packaging stage errors
    #[error("Packaging error: {0}")]
    Packager(#[from] packager::Error),

    /// Pipeline stopped on a fatal error
    #[error("{0}")]
    Aborted(#[from] PipelineAborted),

    /// Generic errors from anyhow
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments or configuration values
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },
}

impl AppError {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            Self::Aborted(aborted) => {
                let mut suggestions = stage_suggestions(&aborted.source);
                if let Some(dir) = &aborted.context_dir {
                    suggestions.push(format!(
                        "The build context was kept for inspection at {}",
                        dir.display()
                    ));
                }
                suggestions
            }
            Self::Packager(e) => stage_suggestions(e),
            Self::Cli(_) => vec!["Run with --help to see the accepted arguments".to_string()],
            Self::Toml(_) => vec![format!(
                "Check the configuration file syntax; see {} keys in the README",
                crate::config::DEFAULT_CONFIG_FILE
            )],
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }

    /// Whether the run was stopped by the user.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Aborted(aborted) if aborted.is_cancelled())
    }
}

fn stage_suggestions(error: &packager::Error) -> Vec<String> {
    use packager::Error;

    match error {
        Error::NotFound { .. } => vec!["Check the --input path".to_string()],
        Error::UnsupportedFormat { .. } => vec![
            "Supported inputs are PyTorch (.pth, .pt) and Keras HDF5 (.h5, .hdf5) files".to_string(),
            "Make sure the file extension matches how the model was saved".to_string(),
        ],
        Error::ContextExists { .. } => vec![
            "Pass --force to overwrite the existing build context".to_string(),
            "Or choose another directory with --context-dir".to_string(),
        ],
        Error::ContextOverlap { .. } => vec![
            "Pick a --context-dir that holds neither the model nor --output-dir".to_string(),
        ],
        Error::InvalidReference { .. } => vec![
            "Use a lowercase name with an optional tag, e.g. my_model:1.0".to_string(),
        ],
        Error::BuildToolUnavailable { .. } => vec![
            "Install Docker from https://docs.docker.com/get-docker/".to_string(),
            "Or drop --no-fallback to produce an archive instead".to_string(),
        ],
        Error::BuildTimedOut { .. } => vec!["Raise the limit with --timeout <SECONDS>".to_string()],
        Error::ArchiveWrite { .. } => vec!["Check --output-dir is writable".to_string()],
        _ => vec!["Check the error message above for specific details".to_string()],
    }
}
