use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::sandbox::stdout;

/// File name the candidate is written to inside the sandbox directory.
/// Stack frames are attributed to the candidate by this name.
pub const CANDIDATE_FILENAME: &str = "buggy_code.py";

/// Stderr reported for a run that hit the wall-clock limit.
pub const TIMEOUT_MARKER: &str = "TimeoutExpired: sandboxed run exceeded its time limit";

/// How long to keep draining pipes after the child was killed. Grandchildren
/// that inherited the pipes can hold them open past the kill.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Per-stream capture limit used unless the runner is configured otherwise.
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Result of one sandboxed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub tests_passed: bool,
}

impl RunOutcome {
    /// Whether the workflow may stop: the run succeeded with a zero exit status.
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// Runs candidate programs as child processes in throwaway directories.
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    interpreter: String,
    timeout: Duration,
    output_limit: usize,
}

impl SandboxRunner {
    pub fn new(interpreter: &str, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            timeout,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }

    /// Keep at most `bytes` of each of stdout and stderr. The rest is read
    /// and discarded so the child never blocks on a full pipe.
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Execute `code`, with `tests` appended to the same file when given.
    ///
    /// A nonzero exit or a timeout is reported through the outcome; only
    /// failures to prepare or spawn the process are errors.
    pub async fn run(&self, code: &str, tests: Option<&str>) -> Result<RunOutcome> {
        let dir = tempfile::Builder::new()
            .prefix("mender-sandbox-")
            .tempdir()
            .map_err(|e| AppError::Sandbox(format!("Failed to create sandbox dir: {e}")))?;

        let source = match tests {
            Some(tests) => format!("{code}\n\n{tests}"),
            None => code.to_string(),
        };
        let code_path = dir.path().join(CANDIDATE_FILENAME);
        tokio::fs::write(&code_path, source)
            .await
            .map_err(|e| AppError::Sandbox(format!("Failed to write candidate: {e}")))?;

        let outcome = self.execute(dir.path(), &code_path, tests.is_some()).await;

        // The directory is dropped (and removed) here regardless of the outcome.
        drop(dir);
        outcome
    }

    async fn execute(&self, workdir: &Path, code_path: &Path, with_tests: bool) -> Result<RunOutcome> {
        tracing::debug!(
            interpreter = %self.interpreter,
            with_tests,
            timeout_secs = self.timeout.as_secs_f64(),
            "Starting sandboxed run"
        );

        let mut child = Command::new(&self.interpreter)
            .arg(code_path)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::Sandbox(format!("Failed to spawn {}: {e}", self.interpreter))
            })?;

        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Sandbox("stdout was not piped".to_string()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Sandbox("stderr was not piped".to_string()))?;

        let stdout_capture = PipeCapture::spawn(stdout_pipe, self.output_limit);
        let stderr_capture = PipeCapture::spawn(stderr_pipe, self.output_limit);

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                let exit_code = status.code().unwrap_or(-1);
                let (raw_stdout, stdout_truncated) = stdout_capture.finish().await;
                let (mut stderr, stderr_truncated) = stderr_capture.finish().await;

                let tests_passed = exit_code == 0;
                let mut stdout = if with_tests {
                    stdout::condense(&raw_stdout).join("\n")
                } else {
                    raw_stdout
                };
                stdout.push_str(&truncation_notice("stdout", stdout_truncated));
                stderr.push_str(&truncation_notice("stderr", stderr_truncated));

                if stdout_truncated > 0 || stderr_truncated > 0 {
                    tracing::warn!(stdout_truncated, stderr_truncated, "Sandbox output truncated");
                }
                tracing::info!(exit_code, with_tests, "Sandboxed run finished");
                Ok(RunOutcome {
                    success: tests_passed,
                    stdout,
                    stderr,
                    exit_code,
                    tests_passed,
                })
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Sandboxed run timed out, killing"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill timed out child");
                }
                let (mut partial_stdout, truncated) = stdout_capture.finish().await;
                partial_stdout.push_str(&truncation_notice("stdout", truncated));
                stderr_capture.abort();

                Ok(RunOutcome {
                    success: false,
                    stdout: partial_stdout,
                    stderr: TIMEOUT_MARKER.to_string(),
                    exit_code: -1,
                    tests_passed: false,
                })
            }
        }
    }
}

fn truncation_notice(label: &str, truncated: usize) -> String {
    if truncated > 0 {
        format!("\n[{label} truncated {truncated} bytes]\n")
    } else {
        String::new()
    }
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// Background reader that accumulates a pipe into a shared buffer so whatever
/// arrived before a kill is still available. Bytes past `limit` are counted
/// but not kept.
struct PipeCapture {
    captured: Arc<Mutex<Captured>>,
    handle: JoinHandle<()>,
}

impl PipeCapture {
    fn spawn<R>(mut pipe: R, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let sink = Arc::clone(&captured);
        let handle = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut out) = sink.lock() {
                            let keep = n.min(limit.saturating_sub(out.bytes.len()));
                            out.bytes.extend_from_slice(&chunk[..keep]);
                            out.truncated += n - keep;
                        }
                    }
                }
            }
        });
        Self { captured, handle }
    }

    /// Wait briefly for EOF, then return what was kept and how many bytes
    /// were dropped.
    async fn finish(mut self) -> (String, usize) {
        if tokio::time::timeout(DRAIN_GRACE, &mut self.handle)
            .await
            .is_err()
        {
            self.handle.abort();
        }
        match self.captured.lock() {
            Ok(out) => (String::from_utf8_lossy(&out.bytes).into_owned(), out.truncated),
            Err(_) => (String::new(), 0),
        }
    }

    fn abort(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(timeout: Duration) -> SandboxRunner {
        SandboxRunner::new("sh", timeout)
    }

    #[tokio::test]
    async fn test_zero_exit_without_tests_succeeds() {
        let outcome = sh(Duration::from_secs(10))
            .run("echo hello", None)
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.tests_passed);
        assert!(outcome.passed());
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, "hello\n");
        assert!(outcome.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let outcome = sh(Duration::from_secs(10))
            .run("echo broken >&2\nexit 3", None)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(!outcome.tests_passed);
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stderr, "broken\n");
    }

    #[tokio::test]
    async fn test_tests_are_appended_and_stdout_condensed() {
        let tests = "echo '>   assert add(1, 2) == 3'\necho 'E   assert -1 == 3'\necho done\nexit 1";
        let outcome = sh(Duration::from_secs(10))
            .run("echo noise", Some(tests))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(!outcome.tests_passed);
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(
            outcome.stdout,
            ">   assert add(1, 2) == 3\nE   assert -1 == 3\nE   assert -1 == 3\ndone"
        );
    }

    #[tokio::test]
    async fn test_passing_tests_report_tests_passed() {
        let outcome = sh(Duration::from_secs(10))
            .run("x=1", Some("[ \"$x\" = 1 ] || exit 1"))
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.tests_passed);
        assert_eq!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn test_candidate_runs_from_fixed_filename() {
        let outcome = sh(Duration::from_secs(10))
            .run("basename \"$0\"", None)
            .await
            .unwrap();
        assert_eq!(outcome.stdout.trim(), CANDIDATE_FILENAME);
    }

    #[tokio::test]
    async fn test_timeout_yields_failed_outcome_with_partial_stdout() {
        let outcome = sh(Duration::from_millis(300))
            .run("echo started\nexec sleep 10", None)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(!outcome.tests_passed);
        assert_eq!(outcome.exit_code, -1);
        assert_eq!(outcome.stderr, TIMEOUT_MARKER);
        assert_eq!(outcome.stdout, "started\n");
    }

    #[tokio::test]
    async fn test_output_past_limit_is_dropped_with_notice() {
        let outcome = sh(Duration::from_secs(30))
            .with_output_limit(1024)
            .run("yes 'noise line' | head -c 2000000\nyes 'err line' | head -c 5000 >&2", None)
            .await
            .unwrap();

        assert!(outcome.success);
        let kept = "noise line\n".repeat(93) + "n";
        assert_eq!(
            outcome.stdout,
            format!("{kept}\n[stdout truncated {} bytes]\n", 2_000_000 - 1024)
        );
        assert!(outcome
            .stderr
            .ends_with(&format!("\n[stderr truncated {} bytes]\n", 5000 - 1024)));
        assert!(outcome.stderr.len() < 1024 + 64);
    }

    #[tokio::test]
    async fn test_output_within_limit_has_no_notice() {
        let outcome = sh(Duration::from_secs(10))
            .with_output_limit(6)
            .run("printf hello", None)
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "hello");
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_sandbox_error() {
        let runner = SandboxRunner::new("/nonexistent/interpreter", Duration::from_secs(1));
        let err = runner.run("print(1)", None).await.unwrap_err();
        assert!(matches!(err, AppError::Sandbox(_)));
    }

    #[tokio::test]
    async fn test_each_run_gets_a_fresh_directory() {
        let runner = sh(Duration::from_secs(10));
        let first = runner.run("touch marker; ls", None).await.unwrap();
        let second = runner.run("ls", None).await.unwrap();

        assert!(first.stdout.contains("marker"));
        assert!(!second.stdout.contains("marker"));
    }
}
