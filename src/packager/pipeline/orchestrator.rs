//! Sequences inspection, assembly, building and fallback for one run.

use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::result::{BuildResult, Outcome, PackagedArtifact};
use super::state::{PipelineState, StateTrace};
use crate::config::PackagerConfig;
use crate::packager::artifact::{self, ArtifactDescriptor};
use crate::packager::context::{BuildContext, ContextAssembler};
use crate::packager::error::{Error, PipelineAborted, Result};
use crate::packager::fallback::FallbackPackager;
use crate::packager::fs;
use crate::packager::image::{
    BuildToolProbe, BuiltImage, ImageBuilder, ImageReference, SystemProbe, ToolStatus,
};
use crate::packager::progress::ProgressSink;

/// Prefix of auto-created build context directories
const CONTEXT_DIR_PREFIX: &str = "modelpack-context";

/// What to do when the build tool runs but fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// A failed build fails the run
    #[default]
    Strict,
    /// A failed build falls back to the archive packager
    Lenient,
}

/// Inputs for one packaging run.
#[derive(Debug, Clone)]
pub struct PackageRequest {
    /// Model artifact to package
    pub artifact: PathBuf,
    /// Target image reference, validated before any work starts
    pub image: String,
    /// Caller-supplied entry point copied as `infer.py`
    pub entry_point: Option<PathBuf>,
    /// Build context directory; a fresh one under the work dir when unset
    pub context_dir: Option<PathBuf>,
    /// Directory receiving the fallback archive
    pub output_dir: PathBuf,
    /// Clear a non-empty context directory instead of failing
    pub overwrite: bool,
    /// Keep the build context after a finished run
    pub retain_context: bool,
    /// Strict or lenient handling of failed builds
    pub policy: FailurePolicy,
    /// Whether the archive fallback may be used at all
    pub fallback: bool,
}

impl PackageRequest {
    /// Request with default options: strict, fallback enabled, archive in `.`.
    pub fn new(artifact: impl Into<PathBuf>, image: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
            image: image.into(),
            entry_point: None,
            context_dir: None,
            output_dir: PathBuf::from("."),
            overwrite: false,
            retain_context: false,
            policy: FailurePolicy::default(),
            fallback: true,
        }
    }
}

/// Packaging pipeline.
///
/// The build tool is probed through `P` once per [`run`](Self::run); nothing
/// about tool availability is cached between runs.
#[derive(Debug, Clone)]
pub struct Pipeline<P: BuildToolProbe = SystemProbe> {
    config: PackagerConfig,
    probe: P,
}

impl Pipeline<SystemProbe> {
    /// Pipeline probing the real system as configured.
    pub fn new(config: PackagerConfig) -> Self {
        let probe = SystemProbe::new()
            .check_daemon(config.probe_daemon)
            .timeout(config.probe_timeout());
        Self { config, probe }
    }
}

impl<P: BuildToolProbe> Pipeline<P> {
    /// Pipeline using a caller-supplied probe.
    pub fn with_probe(config: PackagerConfig, probe: P) -> Self {
        Self { config, probe }
    }

    /// Configuration in use
    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    /// Runs the pipeline to a terminal state.
    ///
    /// # Returns
    ///
    /// * `Ok(BuildResult)` - the run reached `Succeeded`, or `Failed` because
    ///   the image could not be built and fallback was not allowed
    /// * `Err(PipelineAborted)` - a fatal error: inspection, assembly or
    ///   fallback failed, or the build was cancelled or timed out
    pub async fn run(
        &self,
        request: &PackageRequest,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<BuildResult, PipelineAborted> {
        let mut trace = StateTrace::new();

        // Inspecting: nothing is written to disk until this succeeds
        progress.progress(&format!("Inspecting {}", request.artifact.display()));
        let (artifact, reference) = self
            .inspect(request)
            .await
            .map_err(|e| aborted(PipelineState::Inspecting, e, None))?;
        progress.success(&format!(
            "Detected {} model ({} bytes)",
            artifact.framework(),
            artifact.size()
        ));

        if cancel.is_cancelled() {
            return Err(aborted(
                PipelineState::Inspecting,
                Error::BuildCancelled {
                    diagnostics: String::new(),
                },
                None,
            ));
        }

        trace.advance(PipelineState::Assembling);
        let context_dir = request.context_dir.clone().unwrap_or_else(|| {
            self.config
                .work_dir()
                .join(format!("{}-{}", CONTEXT_DIR_PREFIX, Uuid::new_v4()))
        });
        progress.progress(&format!("Assembling build context in {}", context_dir.display()));

        // The context is discarded after the run, so an archive written inside it would vanish
        if request.fallback {
            fs::ensure_outside(&context_dir, &request.output_dir, "fallback output directory")
                .await
                .map_err(|e| aborted(PipelineState::Assembling, e, None))?;
        }

        let context = ContextAssembler::new()
            .base_image(self.config.base_image.as_str())
            .workdir(self.config.workdir.as_str())
            .entry_point(request.entry_point.clone())
            .assemble(&artifact, &context_dir, request.overwrite)
            .await
            .map_err(|e| aborted(PipelineState::Assembling, e, None))?;

        match context.fingerprint().await {
            Ok(fingerprint) => log::debug!("Build context fingerprint: {}", fingerprint),
            Err(e) => log::debug!("Could not fingerprint build context: {}", e),
        }

        trace.advance(PipelineState::Building);
        let build_error = match self.build(&context, &reference, cancel, progress).await {
            Ok(built) => {
                trace.advance(PipelineState::Succeeded);
                let retained = finish(context, request.retain_context).await;
                return Ok(BuildResult::new(
                    Outcome::Success,
                    trace,
                    Some(PackagedArtifact::Image(built.reference)),
                    built.diagnostics,
                    retained,
                ));
            }
            Err(e) if e.is_interruption() => {
                // The context stays on disk for inspection
                let root = context.root().to_path_buf();
                return Err(aborted(PipelineState::Building, e, Some(root)));
            }
            Err(e) => e,
        };

        let (outcome, falls_back) = match build_error {
            Error::BuildToolUnavailable { .. } => {
                (Outcome::BuildToolUnavailable, request.fallback)
            }
            Error::BuildFailed { .. } => (
                Outcome::BuildFailed,
                request.fallback && request.policy == FailurePolicy::Lenient,
            ),
            _ => {
                let retained = finish(context, request.retain_context).await;
                return Err(aborted(PipelineState::Building, build_error, retained));
            }
        };

        let diagnostics = failure_diagnostics(&build_error);

        if !falls_back {
            progress.warn(&build_error.to_string());
            trace.advance(PipelineState::Failed);
            let retained = finish(context, request.retain_context).await;
            return Ok(BuildResult::new(outcome, trace, None, diagnostics, retained));
        }

        trace.advance(PipelineState::FallingBack);
        progress.warn(&format!("{}; packaging an archive instead", build_error));

        let packager = FallbackPackager::new(self.config.archive_format, &request.output_dir);
        match packager.package(&artifact, &context, &reference).await {
            Ok(archive) => {
                progress.success(&format!("Created fallback archive {}", archive.display()));
                trace.advance(PipelineState::Succeeded);
                let retained = finish(context, request.retain_context).await;
                Ok(BuildResult::new(
                    Outcome::FallbackUsed,
                    trace,
                    Some(PackagedArtifact::Archive(archive)),
                    diagnostics,
                    retained,
                ))
            }
            Err(e) => {
                let retained = finish(context, request.retain_context).await;
                Err(aborted(PipelineState::FallingBack, e, retained))
            }
        }
    }

    async fn inspect(&self, request: &PackageRequest) -> Result<(ArtifactDescriptor, ImageReference)> {
        let reference = ImageReference::parse(&request.image)?;
        let artifact = artifact::inspect(&request.artifact).await?;

        if !artifact.is_valid() {
            return Err(Error::UnsupportedFormat {
                path: artifact.path().to_path_buf(),
                reason: "content matches more than one framework signature".to_string(),
            });
        }

        Ok((artifact, reference))
    }

    async fn build(
        &self,
        context: &BuildContext,
        reference: &ImageReference,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<BuiltImage> {
        let tool = self.config.build_tool.as_str();
        let status = tokio::select! {
            status = self.probe.probe(tool) => status,
            _ = cancel.cancelled() => {
                return Err(Error::BuildCancelled {
                    diagnostics: String::new(),
                });
            }
        };
        let path = match status {
            ToolStatus::Available { path } => path,
            ToolStatus::Unavailable { reason } => {
                return Err(Error::BuildToolUnavailable {
                    tool: tool.to_string(),
                    reason,
                    diagnostics: String::new(),
                });
            }
        };

        ImageBuilder::new(path)
            .timeout(self.config.build_timeout())
            .kill_grace(self.config.kill_grace())
            .capture_limit(self.config.capture_limit)
            .verify_image(self.config.verify_image)
            .build(context, reference, cancel, progress)
            .await
    }
}

fn aborted(stage: PipelineState, source: Error, context_dir: Option<PathBuf>) -> PipelineAborted {
    log::debug!("Pipeline aborted while {}: {}", stage, source);
    PipelineAborted {
        stage,
        source,
        context_dir,
    }
}

/// Discards the context unless it is to be retained; returns the kept path.
async fn finish(context: BuildContext, retain: bool) -> Option<PathBuf> {
    if retain {
        return Some(context.root().to_path_buf());
    }

    let root = context.root().to_path_buf();
    match context.discard().await {
        Ok(()) => None,
        Err(e) => {
            log::warn!("Failed to remove build context {}: {}", root.display(), e);
            Some(root)
        }
    }
}

/// Text reported for a recoverable build error.
fn failure_diagnostics(error: &Error) -> String {
    match error {
        Error::BuildToolUnavailable {
            reason, diagnostics, ..
        } if diagnostics.is_empty() => reason.clone(),
        Error::BuildToolUnavailable {
            reason, diagnostics, ..
        } => format!("{}\n{}", reason, diagnostics),
        other => other.diagnostics().unwrap_or_default().to_string(),
    }
}
