//! Image build defaults and constants.

use std::time::Duration;

/// Build tool invoked when none is configured
pub const DEFAULT_BUILD_TOOL: &str = "docker";

/// Timeout for the daemon availability check (5 seconds)
/// Quick daemon availability check shouldn't take long
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for image build operations (30 minutes)
/// Image builds can take a long time due to base image downloads and pip installs
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(1800);

/// Time a terminated build tool gets to exit before it is killed
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Timeout for post-build image verification
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed to drain buffered output after the build tool exits
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on captured build output (64 KiB, tail retained)
pub const DIAGNOSTIC_CAPTURE_LIMIT: usize = 64 * 1024;

/// Bytes read from the build tool's output per read call
pub const OUTPUT_READ_CHUNK: usize = 8 * 1024;

/// Output lines buffered between the reader tasks and the build loop
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Exit code a shell reports when a command is not found
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// Exit code a shell reports when a command is found but not executable
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Platform-specific Docker startup instructions
#[cfg(target_os = "macos")]
pub const DOCKER_START_HELP: &str = "Start Docker Desktop from Applications or Spotlight";

#[cfg(target_os = "linux")]
pub const DOCKER_START_HELP: &str = "Start Docker daemon: sudo systemctl start docker";

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub const DOCKER_START_HELP: &str = "Start Docker Desktop";
