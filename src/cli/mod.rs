//! Command line interface for the model packager.
//!
//! Parses arguments, resolves configuration, runs the pipeline with Ctrl-C
//! wired to its cancellation token, and maps the result to an exit code.

mod args;
mod output;

pub use args::{Args, RuntimeConfig};
pub use output::OutputManager;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::config::PackagerConfig;
use crate::error::{CliError, Result};
use crate::packager::pipeline::{BuildResult, Pipeline};

/// Image built or fallback archive written
pub const EXIT_SUCCESS: i32 = 0;

/// Run failed
pub const EXIT_FAILURE: i32 = 1;

/// Run interrupted with Ctrl-C
pub const EXIT_CANCELLED: i32 = 130;

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    execute(&args).await
}

/// Runs the packager for already parsed arguments.
pub async fn execute(args: &Args) -> Result<i32> {
    args.validate()
        .map_err(|reason| CliError::InvalidArguments { reason })?;

    let mut config = PackagerConfig::discover(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;

    let runtime = RuntimeConfig::from(args);
    let request = args.package_request();
    let cancel = CancellationToken::new();
    let interrupt = spawn_interrupt_watcher(cancel.clone(), runtime.clone());

    let outcome = Pipeline::new(config).run(&request, &cancel, &runtime).await;
    interrupt.abort();

    let result = outcome?;
    report(args, &runtime, &result)?;

    Ok(if result.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

/// Cancels `cancel` on the first Ctrl-C.
fn spawn_interrupt_watcher(
    cancel: CancellationToken,
    runtime: RuntimeConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = runtime.warn("Operation cancelled by user, stopping...");
            cancel.cancel();
        }
    })
}

fn report(args: &Args, runtime: &RuntimeConfig, result: &BuildResult) -> Result<()> {
    let output = runtime.output();

    if args.json {
        let json = serde_json::to_string_pretty(result).context("serializing build result")?;
        output.println(&json)?;
        return Ok(());
    }

    match result.artifact_id() {
        Some(artifact) if result.is_success() => {
            output.println(&format!("{}: {}", result.outcome(), artifact))?;
        }
        _ => {
            output.error(&format!("Packaging failed: {}", result.outcome()))?;
            for line in result.diagnostics().lines() {
                output.error(&format!("  {}", line))?;
            }
        }
    }

    if let Some(dir) = result.context_dir() {
        runtime.progress(&format!("Build context kept at {}", dir.display()))?;
    }

    Ok(())
}
