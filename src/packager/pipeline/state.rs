//! Pipeline state machine.

use serde::Serialize;
use std::fmt;

/// States a packaging run moves through.
///
/// `Inspecting → Assembling → Building → {Succeeded, FallingBack, Failed}`,
/// then `FallingBack → {Succeeded, Failed}`. Any non-terminal state may go
/// straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Checking the artifact and the image reference
    Inspecting,
    /// Staging the build context on disk
    Assembling,
    /// Build tool running
    Building,
    /// Writing the fallback archive
    FallingBack,
    /// Image or archive produced
    Succeeded,
    /// Run finished without an artifact
    Failed,
}

impl PipelineState {
    /// Whether the run has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Inspecting, Assembling)
                | (Inspecting, Failed)
                | (Assembling, Building)
                | (Assembling, Failed)
                | (Building, Succeeded)
                | (Building, FallingBack)
                | (Building, Failed)
                | (FallingBack, Succeeded)
                | (FallingBack, Failed)
        )
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Inspecting => "inspecting",
            Self::Assembling => "assembling",
            Self::Building => "building",
            Self::FallingBack => "falling_back",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered record of the states one run visited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StateTrace {
    visited: Vec<PipelineState>,
}

impl Default for StateTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTrace {
    /// Starts a trace in [`PipelineState::Inspecting`].
    pub fn new() -> Self {
        Self {
            visited: vec![PipelineState::Inspecting],
        }
    }

    /// Current state
    pub fn current(&self) -> PipelineState {
        self.visited
            .last()
            .copied()
            .unwrap_or(PipelineState::Inspecting)
    }

    /// Moves to `next`.
    ///
    /// Illegal transitions are an internal bug; they are logged and recorded
    /// anyway so the trace shows what happened.
    pub fn advance(&mut self, next: PipelineState) {
        let current = self.current();
        if !current.can_transition_to(next) {
            log::error!("Illegal pipeline transition {} -> {}", current, next);
            debug_assert!(false, "illegal pipeline transition {current} -> {next}");
        }
        log::debug!("Pipeline state: {} -> {}", current, next);
        self.visited.push(next);
    }

    /// Visited states in order
    pub fn visited(&self) -> &[PipelineState] {
        &self.visited
    }
}
