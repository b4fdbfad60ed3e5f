//! Inference bridge: runs external model scripts on behalf of HTTP handlers.
//!
//! Control flow for every job: validate → wait for an admission slot →
//! stage the upload → spawn → collect (buffered) or relay (streaming) →
//! release the upload. The staged file is deleted on every path, and only
//! after the script has been reaped.

pub mod error;
pub mod extract;
pub mod invoker;
pub mod job;
pub mod relay;
pub mod staging;

#[cfg(all(test, unix))]
pub(crate) mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

use crate::config::{BridgeConfig, DEFAULT_SCRIPT_TIMEOUT};

pub use error::BridgeError;
pub use extract::{extract_report, ExtractedReport};
pub use job::{Job, JobKind, Mode, OutputContract, Runtime, ScriptRuntime};
pub use relay::RelaySession;
pub use staging::{TemporaryArtifact, Upload};

use invoker::{ProcessHandle, ProcessOutput};
use staging::release_quietly;

/// Decoded result of a buffered job.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferedOutput {
    Json(Value),
    Text(String),
    Report(ExtractedReport),
}

/// Shared entry point for all jobs. Cheap to share behind an `Arc`.
pub struct InferenceBridge {
    runtime: Arc<dyn Runtime>,
    staging_dir: PathBuf,
    admission: Arc<Semaphore>,
    max_concurrent: usize,
    script_timeout: Duration,
}

impl std::fmt::Debug for InferenceBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceBridge")
            .field("staging_dir", &self.staging_dir)
            .field("max_concurrent", &self.max_concurrent)
            .field("script_timeout", &self.script_timeout)
            .finish()
    }
}

impl InferenceBridge {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        staging_dir: impl Into<PathBuf>,
        max_concurrent: usize,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            runtime,
            staging_dir: staging_dir.into(),
            admission: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
        }
    }

    /// Limit for buffered runs; streaming runs are never timed out.
    pub fn with_script_timeout(mut self, limit: Duration) -> Self {
        self.script_timeout = limit;
        self
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            Arc::new(ScriptRuntime::new(&config.interpreter, &config.scripts_dir)),
            &config.staging_dir,
            config.max_concurrent_processes,
        )
        .with_script_timeout(config.script_timeout)
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Slots not currently held by a running script.
    pub fn available_slots(&self) -> usize {
        self.admission.available_permits()
    }

    /// Run a buffered job to completion and decode its stdout.
    ///
    /// A nonzero exit is a `ScriptFailure` regardless of what stdout holds.
    pub async fn run_buffered(
        &self,
        job: &Job,
        upload: Option<&Upload>,
    ) -> Result<BufferedOutput, BridgeError> {
        expect_mode(job, Mode::Buffered)?;
        let upload = required_upload(job, upload)?;

        let permit = self.admit(job).await?;
        let artifact = self.stage(job, upload).await?;
        let handle = match self.spawn(job, artifact.as_ref().map(TemporaryArtifact::path)) {
            Ok(handle) => handle,
            Err(e) => {
                release_quietly(artifact);
                return Err(e);
            }
        };

        let output = self.supervise(job, handle, artifact, permit).await?;
        if !output.success() {
            return Err(BridgeError::ScriptFailure {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        decode(job, &output.stdout)
    }

    /// Start a streaming job. The returned session owns the process, the
    /// upload and the admission slot until the stream ends or is dropped.
    pub async fn run_streaming(
        &self,
        job: &Job,
        upload: Option<&Upload>,
    ) -> Result<RelaySession, BridgeError> {
        expect_mode(job, Mode::Streaming)?;
        let upload = required_upload(job, upload)?;

        let permit = self.admit(job).await?;
        let artifact = self.stage(job, upload).await?;
        let lines = match self.spawn(job, artifact.as_ref().map(TemporaryArtifact::path)) {
            Ok(handle) => handle.iterate_lines()?,
            Err(e) => {
                release_quietly(artifact);
                return Err(e);
            }
        };

        Ok(RelaySession::new(job.name(), lines, artifact, Some(permit)))
    }

    async fn stage(
        &self,
        job: &Job,
        upload: Option<&Upload>,
    ) -> Result<Option<TemporaryArtifact>, BridgeError> {
        let Some(upload) = upload else {
            return Ok(None);
        };
        let artifact =
            TemporaryArtifact::stage(&self.staging_dir, upload, job.default_extension()).await?;
        Ok(Some(artifact))
    }

    async fn admit(&self, job: &Job) -> Result<OwnedSemaphorePermit, BridgeError> {
        if self.admission.available_permits() == 0 {
            tracing::info!(job = job.name(), "All script slots busy; waiting");
        }
        self.admission
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BridgeError::Io(std::io::Error::other("admission semaphore closed")))
    }

    fn spawn(&self, job: &Job, input: Option<&Path>) -> Result<ProcessHandle, BridgeError> {
        let invocation = self.runtime.invocation(job, input)?;
        tracing::info!(job = job.name(), mode = ?job.mode, "Running script");
        invoker::invoke(&invocation.program, &invocation.args)
    }

    /// Collect a buffered run in a detached task that owns the child, the
    /// upload and the slot. If the caller is dropped mid-run, or the run
    /// outlives the timeout, the task kills and reaps the child before the
    /// upload is deleted.
    async fn supervise(
        &self,
        job: &Job,
        handle: ProcessHandle,
        artifact: Option<TemporaryArtifact>,
        permit: OwnedSemaphorePermit,
    ) -> Result<ProcessOutput, BridgeError> {
        let name = job.name();
        let limit = self.script_timeout;
        // Dropping the sender (caller went away) stops the run.
        let (caller_alive, caller_gone) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let stop = async move {
                tokio::select! {
                    _ = caller_gone => {
                        tracing::info!(job = name, "Request dropped before script finished");
                    }
                    () = tokio::time::sleep(limit) => {
                        tracing::warn!(job = name, limit_secs = limit.as_secs(), "Script timed out");
                    }
                }
            };
            let result = match handle.collect_until(stop).await {
                Ok(Some(output)) => Ok(output),
                Ok(None) => Err(BridgeError::Timeout { job: name, limit }),
                Err(e) => Err(e),
            };
            release_quietly(artifact);
            drop(permit);
            result
        });

        let result = task
            .await
            .map_err(|e| BridgeError::Io(std::io::Error::other(e)))?;
        drop(caller_alive);
        result
    }
}

fn required_upload<'a>(
    job: &Job,
    upload: Option<&'a Upload>,
) -> Result<Option<&'a Upload>, BridgeError> {
    if !job.needs_upload() {
        return Ok(None);
    }
    upload
        .map(Some)
        .ok_or_else(|| BridgeError::BadInput(format!("{} requires a file", job.name())))
}

fn expect_mode(job: &Job, mode: Mode) -> Result<(), BridgeError> {
    if job.mode == mode {
        Ok(())
    } else {
        Err(BridgeError::BadInput(format!(
            "{} runs in {:?} mode",
            job.name(),
            job.mode
        )))
    }
}

fn decode(job: &Job, stdout: &str) -> Result<BufferedOutput, BridgeError> {
    match job.contract() {
        OutputContract::Json => serde_json::from_str(stdout.trim())
            .map(BufferedOutput::Json)
            .map_err(|e| BridgeError::Parse(format!("{} printed invalid JSON: {e}", job.name()))),
        OutputContract::Report => Ok(BufferedOutput::Report(extract_report(stdout))),
        OutputContract::Text | OutputContract::Lines => {
            Ok(BufferedOutput::Text(stdout.trim().to_string()))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::bridge::testing::{wait_until, Fixture};

    fn classify() -> Job {
        Job::new(JobKind::Classify {
            model_type: "brain".into(),
        })
    }

    fn scan() -> Upload {
        Upload::new(Some("scan.png".into()), b"not really a png".to_vec())
    }

    #[tokio::test]
    async fn json_job_returns_parsed_value_and_cleans_up() {
        let fx = Fixture::new();
        fx.script(
            "classifier/classifier.py",
            r#"test -f "$1" || exit 7
echo "{\"label\": \"glioma\", \"model\": \"$2\", \"bytes\": $(wc -c < "$1")}""#,
        );
        let bridge = fx.bridge(2);

        let out = bridge.run_buffered(&classify(), Some(&scan())).await.unwrap();
        assert_eq!(
            out,
            BufferedOutput::Json(json!({"label": "glioma", "model": "brain", "bytes": 16}))
        );
        assert_eq!(fx.staged_files(), 0);
        assert_eq!(bridge.available_slots(), 2);
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_even_with_stdout() {
        let fx = Fixture::new();
        fx.script(
            "classifier/classifier.py",
            "echo '{\"label\": \"partial\"}'; echo 'CUDA not available' >&2; exit 2",
        );

        let err = fx.bridge(1).run_buffered(&classify(), Some(&scan())).await.unwrap_err();
        match err {
            BridgeError::ScriptFailure { exit_code, stderr } => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(stderr, "CUDA not available");
            }
            other => panic!("expected script failure, got {other:?}"),
        }
        assert_eq!(fx.staged_files(), 0);
    }

    #[tokio::test]
    async fn crash_is_failure_and_cleans_up() {
        let fx = Fixture::new();
        fx.script("classifier/classifier.py", "kill -9 $$");

        let err = fx.bridge(1).run_buffered(&classify(), Some(&scan())).await.unwrap_err();
        assert!(matches!(err, BridgeError::ScriptFailure { exit_code: None, .. }));
        assert_eq!(fx.staged_files(), 0);
    }

    #[tokio::test]
    async fn invalid_json_is_parse_error() {
        let fx = Fixture::new();
        fx.script("classifier/classifier.py", "echo 'Loading model...'");

        let err = fx.bridge(1).run_buffered(&classify(), Some(&scan())).await.unwrap_err();
        assert!(matches!(err, BridgeError::Parse(_)));
        assert_eq!(fx.staged_files(), 0);
    }

    #[tokio::test]
    async fn missing_interpreter_is_spawn_error() {
        let fx = Fixture::new();
        let bridge = InferenceBridge::new(
            Arc::new(ScriptRuntime::new("/nonexistent/python", fx.scripts.path())),
            fx.staging.path(),
            1,
        );

        let err = bridge.run_buffered(&classify(), Some(&scan())).await.unwrap_err();
        assert!(matches!(err, BridgeError::Spawn { .. }));
        assert_eq!(fx.staged_files(), 0);
        assert_eq!(bridge.available_slots(), 1);
    }

    #[tokio::test]
    async fn missing_upload_is_rejected_before_staging() {
        let fx = Fixture::new();
        fx.script("classifier/classifier.py", "echo '{}'");

        let err = fx.bridge(1).run_buffered(&classify(), None).await.unwrap_err();
        assert!(matches!(err, BridgeError::BadInput(_)));
        assert_eq!(fx.staged_files(), 0);
    }

    #[tokio::test]
    async fn wrong_mode_is_rejected() {
        let fx = Fixture::new();
        let bridge = fx.bridge(1);
        let live = Job::new(JobKind::ExerciseLive {
            exercise_type: "Squat".into(),
        });

        assert!(matches!(
            bridge.run_buffered(&live, None).await,
            Err(BridgeError::BadInput(_))
        ));
        assert!(matches!(
            bridge.run_streaming(&classify(), Some(&scan())).await,
            Err(BridgeError::BadInput(_))
        ));
    }

    #[tokio::test]
    async fn report_job_reads_upload_and_extracts() {
        let fx = Fixture::new();
        fx.script("report-inference/report-inference.py", r#"cat "$1""#);
        let report = "Name of Test: **CBC**\n\
                      Table:\n\
                      | Test | Result |\n\
                      |------|--------|\n\
                      | Hemoglobin | 13.5 g/dL |\n\
                      Inferences: Normal.";
        let upload = Upload::new(Some("cbc.txt".into()), report.as_bytes().to_vec());
        let job = Job::new(JobKind::ReportInference {
            language: "en".into(),
        });

        let out = fx.bridge(1).run_buffered(&job, Some(&upload)).await.unwrap();
        let BufferedOutput::Report(extracted) = out else {
            panic!("expected report output");
        };
        assert_eq!(extracted.classification, "CBC");
        assert_eq!(
            extracted.structured_fields.get("Hemoglobin").map(String::as_str),
            Some("13.5 g/dL")
        );
        assert_eq!(fx.staged_files(), 0);
    }

    #[tokio::test]
    async fn text_job_takes_string_arguments() {
        let fx = Fixture::new();
        fx.script(
            "report-inference/compare_inference.py",
            r#"printf '  new=%s old=%s  \n' "$1" "$2""#,
        );
        let job = Job::new(JobKind::CompareInference {
            new_inference: r#"{"hb":13}"#.into(),
            previous_inference: r#"{"hb":11}"#.into(),
        });

        let out = fx.bridge(1).run_buffered(&job, None).await.unwrap();
        assert_eq!(
            out,
            BufferedOutput::Text(r#"new={"hb":13} old={"hb":11}"#.into())
        );
    }

    #[tokio::test]
    async fn admission_limits_concurrent_scripts() {
        let fx = Fixture::new();
        // Fails if another instance holds the lock directory.
        fx.script(
            "general-health-support/general_health_support.py",
            r#"mkdir "$1" 2>/dev/null || { echo overlap >&2; exit 9; }
sleep 0.2
rmdir "$1"
echo '{"advice": "rest"}'"#,
        );
        let bridge = fx.bridge(1);
        let lock = fx.staging.path().join("lock").display().to_string();
        let job = Job::new(JobKind::HealthSupport {
            symptoms: lock,
            language: "en".into(),
        });

        let (a, b, c) = tokio::join!(
            bridge.run_buffered(&job, None),
            bridge.run_buffered(&job, None),
            bridge.run_buffered(&job, None),
        );
        for result in [a, b, c] {
            assert_eq!(result.unwrap(), BufferedOutput::Json(json!({"advice": "rest"})));
        }
        assert_eq!(bridge.available_slots(), 1);
    }

    fn pid_alive(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn dropped_request_reaps_script_before_deleting_upload() {
        let fx = Fixture::new();
        fx.script(
            "classifier/classifier.py",
            r#"echo $$ > "$(dirname "$0")/pid"
exec sleep 30"#,
        );
        let bridge = fx.bridge(1);
        let upload = scan();

        let script = classify();
        let run = bridge.run_buffered(&script, Some(&upload));
        let cancelled = tokio::time::timeout(Duration::from_millis(300), run).await;
        assert!(cancelled.is_err());

        // The slot is given back last, after the kill, the reap and the delete.
        assert!(wait_until(Duration::from_secs(5), || bridge.available_slots() == 1).await);
        assert_eq!(fx.staged_files(), 0);
        let pid = std::fs::read_to_string(fx.scripts.path().join("classifier/pid")).unwrap();
        assert!(!pid_alive(pid.trim()));
    }

    #[tokio::test]
    async fn runaway_script_times_out() {
        let fx = Fixture::new();
        fx.script("classifier/classifier.py", "exec sleep 30");
        let bridge = fx.bridge(1).with_script_timeout(Duration::from_millis(200));

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            bridge.run_buffered(&classify(), Some(&scan())),
        )
        .await
        .expect("timeout fires before the test limit")
        .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { job: "classify", .. }));
        assert_eq!(fx.staged_files(), 0);
        assert_eq!(bridge.available_slots(), 1);
    }

    #[tokio::test]
    async fn queued_request_stages_nothing_until_admitted() {
        let fx = Fixture::new();
        fx.script("exercise/exercise_stream.py", "exec sleep 30");
        fx.script("classifier/classifier.py", r#"echo '{"label": "none"}'"#);
        let bridge = fx.bridge(1);
        let video = Job::new(JobKind::ExerciseVideo {
            exercise_type: "Squat".into(),
        });
        let clip = Upload::new(Some("set.mp4".into()), b"frames".to_vec());
        let upload = scan();

        let session = bridge.run_streaming(&video, Some(&clip)).await.unwrap();
        assert_eq!(fx.staged_files(), 1);

        let script = classify();
        let queued = bridge.run_buffered(&script, Some(&upload));
        tokio::pin!(queued);
        tokio::select! {
            _ = &mut queued => panic!("request should wait for the busy slot"),
            () = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
        // Only the streaming upload is on disk while the second request waits.
        assert_eq!(fx.staged_files(), 1);

        drop(session);
        let out = tokio::time::timeout(Duration::from_secs(5), queued)
            .await
            .expect("admitted once the stream is gone")
            .unwrap();
        assert_eq!(out, BufferedOutput::Json(json!({"label": "none"})));
        assert!(wait_until(Duration::from_secs(5), || fx.staged_files() == 0).await);
    }

    #[tokio::test]
    async fn streaming_session_holds_slot_until_done() {
        let fx = Fixture::new();
        fx.script(
            "exercise/exercise_stream.py",
            r#"test -f "$2" || exit 3
echo "{\"exercise\": \"$1\", \"rep\": 1}"
echo "{\"exercise\": \"$1\", \"rep\": 2}""#,
        );
        let bridge = fx.bridge(1);
        let job = Job::new(JobKind::ExerciseVideo {
            exercise_type: "Squat".into(),
        });
        let clip = Upload::new(Some("set.mp4".into()), b"frames".to_vec());

        let mut session = bridge.run_streaming(&job, Some(&clip)).await.unwrap();
        assert_eq!(bridge.available_slots(), 0);
        assert_eq!(fx.staged_files(), 1);

        let mut payloads = Vec::new();
        while let Some(p) = tokio::time::timeout(Duration::from_secs(5), session.next_payload())
            .await
            .unwrap()
        {
            payloads.push(p);
        }
        assert_eq!(
            payloads,
            vec![
                r#"{"exercise": "Squat", "rep": 1}"#,
                r#"{"exercise": "Squat", "rep": 2}"#
            ]
        );

        drop(session);
        assert_eq!(fx.staged_files(), 0);
        assert_eq!(bridge.available_slots(), 1);
    }

    #[tokio::test]
    async fn streaming_spawn_failure_releases_everything() {
        let fx = Fixture::new();
        let bridge = InferenceBridge::new(
            Arc::new(ScriptRuntime::new("/nonexistent/python", fx.scripts.path())),
            fx.staging.path(),
            1,
        );
        let job = Job::new(JobKind::ExerciseVideo {
            exercise_type: "Squat".into(),
        });
        let clip = Upload::new(None, b"frames".to_vec());

        let err = bridge.run_streaming(&job, Some(&clip)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Spawn { .. }));
        assert_eq!(fx.staged_files(), 0);
        assert_eq!(bridge.available_slots(), 1);
    }
}
