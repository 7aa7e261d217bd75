//! Build tool availability probing.
//!
//! The orchestrator probes once per run through a [`BuildToolProbe`] it is
//! handed, never through cached global state: the tool may be installed or
//! removed between runs.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use super::config::{DOCKER_START_HELP, PROBE_TIMEOUT};

/// Result of probing for the build tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    /// Tool resolved to an executable path
    Available {
        /// Resolved executable
        path: PathBuf,
    },
    /// Tool missing, not executable, or its daemon is not responding
    Unavailable {
        /// Human-readable explanation
        reason: String,
    },
}

/// Decides whether the build tool can be used for this run.
pub trait BuildToolProbe: Send + Sync {
    /// Probes for `tool` (a name looked up on `PATH`, or a path).
    fn probe(&self, tool: &str) -> impl Future<Output = ToolStatus> + Send;
}

/// Probes the real system: `PATH` lookup plus an optional daemon check.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    check_daemon: bool,
    timeout: Duration,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self {
            check_daemon: true,
            timeout: PROBE_TIMEOUT,
        }
    }
}

impl SystemProbe {
    /// Creates a probe that also checks the daemon responds to `<tool> version`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the daemon check.
    pub fn check_daemon(mut self, enabled: bool) -> Self {
        self.check_daemon = enabled;
        self
    }

    /// Sets the daemon check timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl BuildToolProbe for SystemProbe {
    async fn probe(&self, tool: &str) -> ToolStatus {
        let path = match which::which(tool) {
            Ok(path) => path,
            Err(e) => {
                log::debug!("{} not found: {}", tool, e);
                return ToolStatus::Unavailable {
                    reason: format!(
                        "`{tool}` was not found or is not executable ({e}). \
                         Install Docker from https://docs.docker.com/get-docker/"
                    ),
                };
            }
        };

        log::debug!("Found {} at: {}", tool, path.display());

        if !self.check_daemon {
            return ToolStatus::Available { path };
        }

        let status_result = timeout(
            self.timeout,
            Command::new(&path)
                .arg("version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await;

        match status_result {
            // Timeout occurred
            Err(_) => ToolStatus::Unavailable {
                reason: format!(
                    "daemon check timed out after {} seconds; the daemon is not responding. {}",
                    self.timeout.as_secs(),
                    DOCKER_START_HELP
                ),
            },

            // Command succeeded
            Ok(Ok(status)) if status.success() => {
                log::info!("✓ {} available: {}", tool, path.display());
                ToolStatus::Available { path }
            }

            // Tool exists but daemon isn't responding
            Ok(Ok(status)) => ToolStatus::Unavailable {
                reason: format!(
                    "daemon is not responding (exit code: {}). {}",
                    status.code().unwrap_or(-1),
                    DOCKER_START_HELP
                ),
            },

            // Found on PATH but could not be executed
            Ok(Err(e)) => ToolStatus::Unavailable {
                reason: format!("failed to execute {}: {}", path.display(), e),
            },
        }
    }
}
