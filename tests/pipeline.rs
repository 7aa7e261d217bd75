#![cfg(unix)]

mod common;

use common::*;
use kodegen_bundler_model::packager::{
    Error, FailurePolicy, Outcome, PackageRequest, PackagedArtifact, Pipeline, PipelineState,
    SilentProgress, SystemProbe,
};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Files every archive and context must hold for a `.pth` model.
const ARCHIVE_ENTRIES: [&str; 3] = ["model.pth", "infer.py", "requirements.txt"];

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for sub in ["work", "out", "bin"] {
            std::fs::create_dir(dir.path().join(sub)).unwrap();
        }
        Self { dir }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    fn request(&self) -> PackageRequest {
        let model = torch_model(self.dir.path(), "resnet18_full.pth");
        let mut request = PackageRequest::new(model, "my_model:1.0");
        request.output_dir = self.path("out");
        request
    }

    fn pipeline(&self, on_build: &str) -> Pipeline<SystemProbe> {
        let tool = stub_tool(&self.path("bin"), on_build);
        let config = config_for(&tool, &self.path("work"));
        Pipeline::with_probe(config, SystemProbe::new().check_daemon(false))
    }

    fn work_dir_entries(&self) -> Vec<String> {
        list_dir(&self.path("work"))
    }
}

#[tokio::test]
async fn succeeding_tool_yields_image_reference() {
    let fixture = Fixture::new();
    let log = fixture.path("invocation.log");
    let listing = fixture.path("context.log");
    let pipeline = fixture.pipeline(&format!(
        "    echo \"$@\" > '{}'\n    ls > '{}'\n    echo 'Successfully tagged my_model:1.0'\n    exit 0",
        log.display(),
        listing.display()
    ));

    let result = pipeline
        .run(&fixture.request(), &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap();

    assert_eq!(result.outcome(), Outcome::Success);
    assert_eq!(result.state(), PipelineState::Succeeded);
    assert_eq!(result.artifact_id().as_deref(), Some("my_model:1.0"));
    assert!(matches!(result.artifact(), Some(PackagedArtifact::Image(_))));
    assert!(result.diagnostics().contains("Successfully tagged"));
    assert_eq!(
        result.visited_states(),
        [
            PipelineState::Inspecting,
            PipelineState::Assembling,
            PipelineState::Building,
            PipelineState::Succeeded
        ]
    );

    let invocation = std::fs::read_to_string(&log).unwrap();
    assert_eq!(invocation.trim(), "build -t my_model:1.0 -f Dockerfile .");
    let staged = std::fs::read_to_string(&listing).unwrap();
    for name in ["Dockerfile", "infer.py", "model.pth", "requirements.txt"] {
        assert!(staged.lines().any(|line| line == name), "{name} not staged");
    }

    // Clean success removes the generated context and writes no archive
    assert!(fixture.work_dir_entries().is_empty());
    assert!(list_dir(&fixture.path("out")).is_empty());
    assert!(result.context_dir().is_none());
}

#[tokio::test]
async fn retained_context_survives_success() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline("    exit 0");
    let mut request = fixture.request();
    request.retain_context = true;

    let result = pipeline
        .run(&request, &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap();

    let context = result.context_dir().unwrap();
    assert!(context.starts_with(fixture.path("work")));
    assert!(
        context
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("modelpack-context-")
    );
    assert_eq!(
        list_dir(context),
        ["Dockerfile", "infer.py", "model.pth", "requirements.txt"]
    );
}

#[tokio::test]
async fn command_not_found_exit_falls_back_to_archive() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline("    echo 'docker: command not found' >&2\n    exit 127");

    let result = pipeline
        .run(&fixture.request(), &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap();

    assert_eq!(result.outcome(), Outcome::FallbackUsed);
    assert_eq!(result.state(), PipelineState::Succeeded);
    assert!(
        result
            .visited_states()
            .contains(&PipelineState::FallingBack)
    );

    let archive = match result.artifact() {
        Some(PackagedArtifact::Archive(path)) => path.clone(),
        other => panic!("expected an archive, got {other:?}"),
    };
    assert_eq!(archive, fixture.path("out").join("my_model_1.0_package.tar.gz"));
    assert_eq!(tar_gz_entries(&archive), ARCHIVE_ENTRIES);
    assert!(result.diagnostics().contains("command not found"));
}

#[tokio::test]
async fn absent_tool_falls_back_to_archive() {
    let fixture = Fixture::new();
    let tool = fixture.path("bin").join("docker");
    let pipeline = Pipeline::with_probe(config_for(&tool, &fixture.path("work")), missing_tool());

    let result = pipeline
        .run(&fixture.request(), &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap();

    assert_eq!(result.outcome(), Outcome::FallbackUsed);
    let archive = result.artifact_id().unwrap();
    assert!(archive.ends_with("my_model_1.0_package.tar.gz"));
    assert_eq!(tar_gz_entries(Path::new(&archive)), ARCHIVE_ENTRIES);
    assert!(fixture.work_dir_entries().is_empty());
}

#[tokio::test]
async fn absent_tool_without_fallback_fails() {
    let fixture = Fixture::new();
    let tool = fixture.path("bin").join("docker");
    let pipeline = Pipeline::with_probe(config_for(&tool, &fixture.path("work")), missing_tool());
    let mut request = fixture.request();
    request.fallback = false;

    let result = pipeline
        .run(&request, &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap();

    assert_eq!(result.outcome(), Outcome::BuildToolUnavailable);
    assert_eq!(result.state(), PipelineState::Failed);
    assert!(result.artifact().is_none());
    assert!(result.diagnostics().contains("not found"));
    assert!(list_dir(&fixture.path("out")).is_empty());
}

#[tokio::test]
async fn failed_build_is_fatal_under_strict_policy() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline("    echo 'ERROR: pip install failed' >&2\n    exit 1");

    let result = pipeline
        .run(&fixture.request(), &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap();

    assert_eq!(result.outcome(), Outcome::BuildFailed);
    assert_eq!(result.state(), PipelineState::Failed);
    assert!(result.artifact().is_none());
    assert!(result.diagnostics().contains("ERROR: pip install failed"));
    assert!(list_dir(&fixture.path("out")).is_empty());
    assert!(fixture.work_dir_entries().is_empty());
}

#[tokio::test]
async fn failed_build_falls_back_under_lenient_policy() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline("    echo 'ERROR: pip install failed' >&2\n    exit 1");
    let mut request = fixture.request();
    request.policy = FailurePolicy::Lenient;

    let result = pipeline
        .run(&request, &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap();

    assert_eq!(result.outcome(), Outcome::FallbackUsed);
    assert!(result.is_success());
    assert!(result.diagnostics().contains("ERROR: pip install failed"));
    assert_eq!(list_dir(&fixture.path("out")), ["my_model_1.0_package.tar.gz"]);
}

#[tokio::test]
async fn cancellation_stops_the_build_and_keeps_the_context() {
    let fixture = Fixture::new();
    let pid_file = fixture.path("helper.pid");
    // The helper runs as a grandchild, the way docker runs docker-buildx
    let pipeline = fixture.pipeline(&format!(
        "    echo 'Step 1/7 : FROM python:3.9-slim'\n    sleep 30 &\n    echo $! > '{}'\n    wait",
        pid_file.display()
    ));
    let mut request = fixture.request();
    let context_dir = fixture.path("ctx");
    request.context_dir = Some(context_dir.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = pipeline
        .run(&request, &cancel, &SilentProgress)
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(err.is_cancelled());
    assert_eq!(err.stage, PipelineState::Building);
    assert_eq!(err.context_dir.as_deref(), Some(context_dir.as_path()));
    assert_eq!(
        list_dir(&context_dir),
        ["Dockerfile", "infer.py", "model.pth", "requirements.txt"]
    );
    assert!(list_dir(&fixture.path("out")).is_empty());

    let helper: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(
        wait_for_exit(helper, Duration::from_secs(5)).await,
        "helper process {helper} survived cancellation"
    );
}

#[tokio::test]
async fn cancellation_interrupts_a_hung_tool_probe() {
    let fixture = Fixture::new();
    let tool = stub_tool(&fixture.path("bin"), "    exit 0");
    let pipeline = Pipeline::with_probe(config_for(&tool, &fixture.path("work")), StalledProbe);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = pipeline
        .run(&fixture.request(), &cancel, &SilentProgress)
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(err.is_cancelled());
    assert_eq!(err.stage, PipelineState::Building);
    assert!(err.context_dir.unwrap().exists());
}

#[tokio::test]
async fn cancellation_cuts_short_image_verification() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new();
    let tool = fixture.path("bin/stub-docker");
    std::fs::write(
        &tool,
        "#!/bin/sh\ncase \"$1\" in\n  image)\n    exec sleep 30\n    ;;\n  *)\n    exit 0\n    ;;\nesac\n",
    )
    .unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
    let mut config = config_for(&tool, &fixture.path("work"));
    config.verify_image = true;
    let pipeline = Pipeline::with_probe(config, SystemProbe::new().check_daemon(false));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = pipeline
        .run(&fixture.request(), &cancel, &SilentProgress)
        .await
        .unwrap();

    // Verification never changes the outcome, it only stops waiting
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.outcome(), Outcome::Success);
}

#[tokio::test]
async fn timeout_stops_the_build() {
    let fixture = Fixture::new();
    let tool = stub_tool(&fixture.path("bin"), "    exec sleep 30");
    let mut config = config_for(&tool, &fixture.path("work"));
    config.build_timeout_secs = 1;
    let pipeline = Pipeline::with_probe(config, SystemProbe::new().check_daemon(false));

    let started = Instant::now();
    let err = pipeline
        .run(&fixture.request(), &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(err.source, Error::BuildTimedOut { .. }));
    assert_eq!(err.stage, PipelineState::Building);
    let context = err.context_dir.unwrap();
    assert!(context.exists());
}

#[tokio::test]
async fn inspector_failure_creates_no_context() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline("    exit 0");
    let mut request = fixture.request();
    request.artifact = fixture.path("missing.pth");
    request.context_dir = Some(fixture.path("ctx"));

    let err = pipeline
        .run(&request, &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineState::Inspecting);
    assert!(matches!(err.source, Error::NotFound { .. }));
    assert!(!fixture.path("ctx").exists());
    assert!(fixture.work_dir_entries().is_empty());
}

#[tokio::test]
async fn invalid_reference_fails_before_assembly() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline("    exit 0");
    let mut request = fixture.request();
    request.image = "My Model:1.0".to_string();

    let err = pipeline
        .run(&request, &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineState::Inspecting);
    assert!(matches!(err.source, Error::InvalidReference { .. }));
    assert!(fixture.work_dir_entries().is_empty());
}

#[tokio::test]
async fn ambiguous_model_aborts_before_build() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline("    exit 0");
    let mut bytes = legacy_pickle_bytes();
    bytes.resize(512, 0);
    bytes.extend_from_slice(&hdf5_bytes(0));
    let mut request = fixture.request();
    request.artifact = write_file(fixture.dir.path(), "both.pth", &bytes);

    let err = pipeline
        .run(&request, &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineState::Inspecting);
    assert!(matches!(err.source, Error::UnsupportedFormat { .. }));
}

#[tokio::test]
async fn occupied_context_is_an_assembly_failure() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline("    exit 0");
    let context_dir = fixture.path("ctx");
    std::fs::create_dir(&context_dir).unwrap();
    std::fs::write(context_dir.join("keep.txt"), "mine").unwrap();
    let mut request = fixture.request();
    request.context_dir = Some(context_dir.clone());

    let err = pipeline
        .run(&request, &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineState::Assembling);
    assert!(matches!(err.source, Error::ContextExists { .. }));
    assert_eq!(list_dir(&context_dir), ["keep.txt"]);
}

#[tokio::test]
async fn context_holding_the_model_is_never_cleared() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline("    exit 0");
    let models = fixture.path("models");
    std::fs::create_dir(&models).unwrap();
    let model = torch_model(&models, "resnet18_full.pth");
    let original = std::fs::read(&model).unwrap();

    let mut request = fixture.request();
    request.artifact = model.clone();
    request.context_dir = Some(models.clone());
    request.overwrite = true;

    let err = pipeline
        .run(&request, &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineState::Assembling);
    assert!(matches!(err.source, Error::ContextOverlap { .. }));
    assert_eq!(std::fs::read(&model).unwrap(), original);
    assert_eq!(list_dir(&models), ["resnet18_full.pth"]);
}

#[tokio::test]
async fn context_holding_the_entry_point_is_never_cleared() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline("    exit 0");
    let context_dir = fixture.path("ctx");
    std::fs::create_dir(&context_dir).unwrap();
    let script = write_file(&context_dir, "infer.py", b"print('mine')\n");

    let mut request = fixture.request();
    request.entry_point = Some(script.clone());
    request.context_dir = Some(context_dir.clone());
    request.overwrite = true;

    let err = pipeline
        .run(&request, &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap_err();

    assert!(matches!(err.source, Error::ContextOverlap { .. }));
    assert_eq!(std::fs::read(&script).unwrap(), b"print('mine')\n");
}

#[tokio::test]
async fn output_dir_inside_the_context_is_rejected() {
    let fixture = Fixture::new();
    let tool = fixture.path("bin/docker");
    let pipeline = Pipeline::with_probe(config_for(&tool, &fixture.path("work")), missing_tool());
    let context_dir = fixture.path("ctx");

    let mut request = fixture.request();
    request.context_dir = Some(context_dir.clone());
    request.output_dir = context_dir.join("dist");

    let err = pipeline
        .run(&request, &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineState::Assembling);
    assert!(matches!(err.source, Error::ContextOverlap { .. }));
    assert!(!context_dir.exists());

    // Same layout is fine when no archive can be written
    request.fallback = false;
    let result = pipeline
        .run(&request, &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap();
    assert_eq!(result.outcome(), Outcome::BuildToolUnavailable);
}

#[tokio::test]
async fn output_without_newlines_is_read_in_bounded_pieces() {
    let fixture = Fixture::new();
    let tool = stub_tool(
        &fixture.path("bin"),
        "    head -c 20000000 /dev/zero | tr '\\0' a\n    exit 1",
    );
    let mut config = config_for(&tool, &fixture.path("work"));
    config.capture_limit = 4096;
    let pipeline = Pipeline::with_probe(config, SystemProbe::new().check_daemon(false));

    let result = pipeline
        .run(&fixture.request(), &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap();

    let diagnostics = result.diagnostics();
    assert_eq!(result.outcome(), Outcome::BuildFailed);
    assert!(diagnostics.len() <= 4096 + 64);
    assert!(diagnostics.starts_with("[... "));
    let tail: Vec<&str> = diagnostics.lines().skip(1).collect();
    assert!(!tail.is_empty());
    assert!(tail.iter().all(|piece| piece.len() <= 4096 && piece.bytes().all(|b| b == b'a')));
}

#[tokio::test]
async fn captured_output_stays_bounded() {
    let fixture = Fixture::new();
    let tool = stub_tool(
        &fixture.path("bin"),
        "    i=0\n    while [ $i -lt 2000 ]; do\n      echo \"line $i of noisy build output padding padding padding\"\n      i=$((i+1))\n    done\n    echo 'final error line'\n    exit 1",
    );
    let mut config = config_for(&tool, &fixture.path("work"));
    config.capture_limit = 4096;
    let pipeline = Pipeline::with_probe(config, SystemProbe::new().check_daemon(false));

    let result = pipeline
        .run(&fixture.request(), &CancellationToken::new(), &SilentProgress)
        .await
        .unwrap();

    let diagnostics = result.diagnostics();
    assert_eq!(result.outcome(), Outcome::BuildFailed);
    assert!(diagnostics.len() <= 4096 + 64);
    assert!(diagnostics.starts_with("[... "));
    assert!(diagnostics.contains("final error line"));
}
