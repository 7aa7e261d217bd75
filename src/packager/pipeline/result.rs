//! Structured result of a packaging run.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use super::state::{PipelineState, StateTrace};
use crate::packager::image::ImageReference;

/// How a finished run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Image built and tagged
    Success,
    /// Build tool missing and fallback disabled
    BuildToolUnavailable,
    /// Build tool ran and failed under the strict policy
    BuildFailed,
    /// Image could not be built; an archive was produced instead
    FallbackUsed,
}

impl Outcome {
    /// Snake-case tag used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::BuildToolUnavailable => "build_tool_unavailable",
            Self::BuildFailed => "build_failed",
            Self::FallbackUsed => "fallback_used",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PackagedArtifact {
    /// Container image reference
    Image(ImageReference),
    /// Fallback archive on disk
    Archive(PathBuf),
}

impl fmt::Display for PackagedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(reference) => write!(f, "{}", reference),
            Self::Archive(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Final, immutable report of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    outcome: Outcome,
    state: PipelineState,
    artifact: Option<PackagedArtifact>,
    diagnostics: String,
    trace: StateTrace,
    context_dir: Option<PathBuf>,
}

impl BuildResult {
    pub(crate) fn new(
        outcome: Outcome,
        trace: StateTrace,
        artifact: Option<PackagedArtifact>,
        diagnostics: String,
        context_dir: Option<PathBuf>,
    ) -> Self {
        debug_assert!(trace.current().is_terminal(), "result built before a terminal state");
        Self {
            outcome,
            state: trace.current(),
            artifact,
            diagnostics,
            trace,
            context_dir,
        }
    }

    /// Outcome tag
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Terminal state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Produced artifact; `None` when the run failed
    pub fn artifact(&self) -> Option<&PackagedArtifact> {
        self.artifact.as_ref()
    }

    /// Image reference or archive path as a string, if anything was produced.
    pub fn artifact_id(&self) -> Option<String> {
        self.artifact.as_ref().map(|a| a.to_string())
    }

    /// Captured build tool output (tail)
    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }

    /// States visited, in order
    pub fn visited_states(&self) -> &[PipelineState] {
        self.trace.visited()
    }

    /// Build context left on disk, if it was retained
    pub fn context_dir(&self) -> Option<&Path> {
        self.context_dir.as_deref()
    }

    /// Whether the run ended in [`PipelineState::Succeeded`].
    pub fn is_success(&self) -> bool {
        self.state == PipelineState::Succeeded
    }
}
