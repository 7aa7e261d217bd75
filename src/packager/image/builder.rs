//! Image building through the external build tool.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::capture::{DiagnosticBuffer, LineSplitter};
use super::config::{
    BUILD_TIMEOUT, DIAGNOSTIC_CAPTURE_LIMIT, EXIT_COMMAND_NOT_FOUND, EXIT_NOT_EXECUTABLE,
    KILL_GRACE_PERIOD, OUTPUT_CHANNEL_CAPACITY, OUTPUT_DRAIN_TIMEOUT, OUTPUT_READ_CHUNK,
    VERIFY_TIMEOUT,
};
use super::reference::ImageReference;
use crate::packager::context::BuildContext;
use crate::packager::context::templates::DESCRIPTOR_FILE;
use crate::packager::error::{Error, Result};
use crate::packager::progress::ProgressSink;

/// Successful build output.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    /// Reference the image was tagged with
    pub reference: ImageReference,
    /// Tail of the combined build output
    pub diagnostics: String,
}

/// Runs `<tool> build` against a staged context.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    tool: PathBuf,
    timeout: Duration,
    kill_grace: Duration,
    capture_limit: usize,
    verify: bool,
}

impl ImageBuilder {
    /// Creates a builder for an already probed tool executable.
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            timeout: BUILD_TIMEOUT,
            kill_grace: KILL_GRACE_PERIOD,
            capture_limit: DIAGNOSTIC_CAPTURE_LIMIT,
            verify: true,
        }
    }

    /// Sets the overall build timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how long a terminated build tool may take to exit before it is killed.
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Sets the diagnostic capture limit in bytes.
    pub fn capture_limit(mut self, bytes: usize) -> Self {
        self.capture_limit = bytes;
        self
    }

    /// Enables or disables `image inspect` after a successful build.
    pub fn verify_image(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    /// Builds `reference` from `context`.
    ///
    /// # Returns
    ///
    /// * `Ok(BuiltImage)` - tool exited 0
    /// * `Err(Error::BuildToolUnavailable)` - tool could not be started, or
    ///   exited 126/127
    /// * `Err(Error::BuildFailed)` - any other unsuccessful exit
    /// * `Err(Error::BuildCancelled)` / `Err(Error::BuildTimedOut)` - the tool
    ///   was terminated; the context is left untouched
    pub async fn build(
        &self,
        context: &BuildContext,
        reference: &ImageReference,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<BuiltImage> {
        context.descriptor().verify(context.root())?;

        let tag = reference.to_string();
        let tool_name = self.tool.display().to_string();
        progress.progress(&format!("Building image: {}", tag));
        log::info!(
            "Running: {} build -t {} -f {} . (in {})",
            tool_name,
            tag,
            DESCRIPTOR_FILE,
            context.root().display()
        );

        let mut command = Command::new(&self.tool);
        command
            .args(["build", "-t", tag.as_str(), "-f", DESCRIPTOR_FILE, "."])
            .current_dir(context.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so termination also reaches helpers such as docker-buildx
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                ) =>
            {
                return Err(Error::BuildToolUnavailable {
                    tool: tool_name,
                    reason: format!("failed to start: {e}"),
                    diagnostics: String::new(),
                });
            }
            Err(e) => {
                return Err(Error::BuildFailed {
                    exit_code: None,
                    diagnostics: format!("failed to start {tool_name}: {e}"),
                });
            }
        };

        let (tx, mut rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let _pump = OutputPump::start(&mut child, tx, self.capture_limit);
        let mut capture = DiagnosticBuffer::new(self.capture_limit);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let status = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    progress.warn("Image build cancelled, terminating build tool...");
                    self.terminate(&mut child).await;
                    drain_ready(&mut rx, &mut capture);
                    return Err(Error::BuildCancelled {
                        diagnostics: capture.into_text(),
                    });
                }

                _ = &mut deadline => {
                    progress.warn(&format!(
                        "Image build timed out after {} seconds, terminating build tool...",
                        self.timeout.as_secs()
                    ));
                    self.terminate(&mut child).await;
                    drain_ready(&mut rx, &mut capture);
                    return Err(Error::BuildTimedOut {
                        timeout: self.timeout,
                        diagnostics: capture.into_text(),
                    });
                }

                Some(line) = rx.recv() => {
                    progress.indent(&line);
                    capture.push_line(line);
                }

                status = child.wait() => break status,
            }
        };

        // Collect whatever the tool wrote just before exiting
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
            while let Some(line) = rx.recv().await {
                progress.indent(&line);
                capture.push_line(line);
            }
        })
        .await;

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                capture.push_line(format!("failed waiting for {tool_name}: {e}"));
                return Err(Error::BuildFailed {
                    exit_code: None,
                    diagnostics: capture.into_text(),
                });
            }
        };

        let diagnostics = classify(status, &tool_name, capture)?;

        progress.success(&format!("Built image {}", tag));

        if self.verify && !self.image_exists(&tag, cancel).await {
            progress.warn(&format!(
                "Build succeeded but `image inspect {}` could not confirm the image",
                tag
            ));
        }

        Ok(BuiltImage {
            reference: reference.clone(),
            diagnostics,
        })
    }

    /// Asks the tool whether `tag` now exists. Never fails the build.
    async fn image_exists(&self, tag: &str, cancel: &CancellationToken) -> bool {
        let inspect = tokio::time::timeout(
            VERIFY_TIMEOUT,
            Command::new(&self.tool)
                .args(["image", "inspect", tag])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        );

        let result = tokio::select! {
            result = inspect => result,
            _ = cancel.cancelled() => {
                log::debug!("Skipping verification of {}: cancelled", tag);
                return false;
            }
        };

        match result {
            Ok(Ok(status)) if status.success() => {
                log::debug!("Verified image {}", tag);
                true
            }
            Ok(Ok(status)) => {
                log::warn!("image inspect {} exited with {:?}", tag, status.code());
                false
            }
            Ok(Err(e)) => {
                log::warn!("image inspect {} failed to run: {}", tag, e);
                false
            }
            Err(_) => {
                log::warn!("image inspect {} timed out", tag);
                false
            }
        }
    }

    /// Terminates the build tool's process group: SIGTERM, then SIGKILL
    /// after the grace period.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            let group = Pid::from_raw(pid);
            match killpg(group, Signal::SIGTERM) {
                Ok(()) => match tokio::time::timeout(self.kill_grace, child.wait()).await {
                    Ok(Ok(status)) => log::debug!("Build tool exited after SIGTERM: {}", status),
                    _ => log::warn!(
                        "Build tool ignored SIGTERM for {} seconds, killing",
                        self.kill_grace.as_secs()
                    ),
                },
                Err(e) => log::debug!("SIGTERM to build tool process group failed: {}", e),
            }

            // Sweep anything left in the group, including the leader
            match killpg(group, Signal::SIGKILL) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => log::warn!("Failed to kill build tool process group: {}", e),
            }
        }

        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        if let Err(e) = child.kill().await {
            log::warn!("Failed to kill build tool process: {}", e);
        }
    }
}

/// Maps an exit status onto the build outcome.
fn classify(status: ExitStatus, tool_name: &str, capture: DiagnosticBuffer) -> Result<String> {
    match status.code() {
        Some(0) => Ok(capture.into_text()),
        Some(code @ (EXIT_COMMAND_NOT_FOUND | EXIT_NOT_EXECUTABLE)) => {
            Err(Error::BuildToolUnavailable {
                tool: tool_name.to_string(),
                reason: format!("exited with {code} (command not found or not executable)"),
                diagnostics: capture.into_text(),
            })
        }
        exit_code => Err(Error::BuildFailed {
            exit_code,
            diagnostics: capture.into_text(),
        }),
    }
}

fn drain_ready(rx: &mut mpsc::Receiver<String>, capture: &mut DiagnosticBuffer) {
    while let Ok(line) = rx.try_recv() {
        capture.push_line(line);
    }
}

/// Reader tasks forwarding child output lines; aborted when dropped.
struct OutputPump {
    readers: Vec<JoinHandle<()>>,
}

impl OutputPump {
    fn start(child: &mut Child, tx: mpsc::Sender<String>, max_line: usize) -> Self {
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, tx.clone(), max_line));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, tx, max_line));
        }
        Self { readers }
    }
}

impl Drop for OutputPump {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Forwards `stream` as lines of at most `max_line` bytes.
fn spawn_line_reader<R>(mut stream: R, tx: mpsc::Sender<String>, max_line: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut splitter = LineSplitter::new(max_line);
        let mut chunk = vec![0u8; OUTPUT_READ_CHUNK];
        loop {
            let read = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(read) => read,
            };
            for line in splitter.feed(&chunk[..read]) {
                if tx.send(line).await.is_err() {
                    return;
                }
            }
        }
        if let Some(line) = splitter.finish() {
            let _ = tx.send(line).await;
        }
    })
}
