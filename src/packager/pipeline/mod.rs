//! Pipeline orchestration.
//!
//! A run is sequential: inspect, assemble, build, and fall back to an archive
//! when the image cannot be built and the caller allows it. Every run ends in
//! a [`BuildResult`] or a [`PipelineAborted`](crate::packager::PipelineAborted).

pub mod orchestrator;
pub mod result;
pub mod state;

pub use orchestrator::{FailurePolicy, PackageRequest, Pipeline};
pub use result::{BuildResult, Outcome, PackagedArtifact};
pub use state::{PipelineState, StateTrace};
