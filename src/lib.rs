//! Model packaging library
//!
//! Packages a trained PyTorch or Keras model file into a runnable container
//! image in one call, and falls back to a self-contained archive (model,
//! entry point, dependency manifest) when the image cannot be built.
//!
//! It can be used both as a CLI tool and as a library dependency.

pub mod cli;
pub mod config;
pub mod error;
pub mod packager;

// Re-export commonly used types
pub use config::PackagerConfig;
pub use error::{AppError, CliError, Result};
pub use packager::{BuildResult, FailurePolicy, Outcome, PackageRequest, Pipeline};
