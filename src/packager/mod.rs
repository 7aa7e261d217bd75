//! Model packaging pipeline.
//!
//! Turns a trained model file into a container image, or into a portable
//! archive when no image can be built:
//!
//! - [`artifact`] detects the framework and checks the file structure
//! - [`context`] stages the model, entry point, manifest and build descriptor
//! - [`image`] runs the external build tool against the staged context
//! - [`fallback`] writes the archive package
//! - [`pipeline`] sequences the stages and decides between fallback and failure

pub mod artifact;
pub mod checksum;
pub mod context;
pub mod error;
pub mod fallback;
pub mod fs;
pub mod image;
pub mod pipeline;
pub mod progress;

pub use artifact::{ArtifactDescriptor, ArtifactEncoding, Framework};
pub use context::{BuildContext, BuildDescriptor, ContextAssembler};
pub use error::{Error, ErrorExt, PipelineAborted, Result};
pub use fallback::{ArchiveFormat, FallbackPackager};
pub use image::{BuildToolProbe, ImageBuilder, ImageReference, SystemProbe, ToolStatus};
pub use pipeline::{
    BuildResult, FailurePolicy, Outcome, PackageRequest, PackagedArtifact, Pipeline, PipelineState,
};
pub use progress::{ProgressSink, SilentProgress};
