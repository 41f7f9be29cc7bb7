//! Stage execution abstraction
//!
//! The runner only knows the invocation contract: a program and arguments go
//! in, an exit status and captured streams come out. How a stage is realized
//! (local binary, container, fetched script) is up to the executor.

use async_trait::async_trait;
use ldn_core::{LdnError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument};

/// A concrete external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a configured command (`["uv", "run", "x.py"]`) and append `extra`
    pub fn from_command<I>(command: &[String], extra: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let (program, lead) = command
            .split_first()
            .ok_or_else(|| LdnError::Invalid("empty stage command".to_string()))?;
        let mut args = lead.to_vec();
        args.extend(extra);
        Ok(Self::new(program.clone(), args))
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command_line())
    }
}

/// Captured result of one invocation
///
/// `stdout` is kept as raw bytes because it may become an artifact;
/// `stderr` is only ever logged or reported, so it is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl ProcessOutput {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            success: false,
        }
    }

    /// Stdout decoded for display; invalid UTF-8 is replaced
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

impl From<Output> for ProcessOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        }
    }
}

/// Trait for running stage invocations (allows mocking in tests)
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run `invocation` for the stage called `stage` and capture its output
    ///
    /// A non-zero exit is reported through `ProcessOutput::success`, not as
    /// an error. Errors mean the stage could not run to completion at all.
    async fn execute(&self, stage: &str, invocation: &Invocation) -> Result<ProcessOutput>;
}

/// Runs stages as local child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any stage running longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl StageExecutor for ProcessExecutor {
    #[instrument(skip(self, invocation), fields(program = %invocation.program))]
    async fn execute(&self, stage: &str, invocation: &Invocation) -> Result<ProcessOutput> {
        debug!("Executing {}", invocation);

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            // Dropping the future (timeout or shutdown) must not orphan the child
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let spawn_error = |e: std::io::Error| LdnError::Spawn {
            stage: stage.to_string(),
            reason: format!("{}: {}", invocation.program, e),
        };

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| LdnError::TimedOut {
                    stage: stage.to_string(),
                    after: limit,
                })?
                .map_err(spawn_error)?,
            None => command.output().await.map_err(spawn_error)?,
        };

        let output = ProcessOutput::from(output);
        if !output.success {
            debug!("Stage {} exited with {:?}", stage, output.exit_code);
        }
        Ok(output)
    }
}

/// Mock stage executor for testing
///
/// Responses are matched by the longest registered command-line prefix, so
/// tests need not predict generated artifact paths. Every invocation is
/// recorded, including ones with no scripted response.
#[derive(Clone, Default)]
pub struct MockStageExecutor {
    responses: HashMap<String, ProcessOutput>,
    calls: Arc<Mutex<Vec<Invocation>>>,
    write_out_files: bool,
}

impl MockStageExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, command_prefix: &str, output: ProcessOutput) -> Self {
        self.responses.insert(command_prefix.to_string(), output);
        self
    }

    /// Behave like a well-formed tool: on success, write the scripted
    /// stdout to the path following `--out`, if the invocation has one
    pub fn writing_out_files(mut self) -> Self {
        self.write_out_files = true;
        self
    }

    /// Invocations seen so far, in order
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StageExecutor for MockStageExecutor {
    async fn execute(&self, stage: &str, invocation: &Invocation) -> Result<ProcessOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }

        let line = invocation.command_line();
        let output = self
            .responses
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, output)| output.clone())
            .ok_or_else(|| LdnError::Spawn {
                stage: stage.to_string(),
                reason: format!("No mock response for: {}", line),
            })?;

        if self.write_out_files && output.success {
            let out = invocation
                .args
                .iter()
                .position(|a| a == "--out")
                .and_then(|i| invocation.args.get(i + 1));
            if let Some(path) = out {
                tokio::fs::write(path, &output.stdout).await?;
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_from_command_appends_args() {
        let command = vec!["uv".to_string(), "run".to_string(), "x.py".to_string()];
        let inv = Invocation::from_command(&command, vec!["--in".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(inv.program, "uv");
        assert_eq!(inv.command_line(), "uv run x.py --in a");
        assert!(Invocation::from_command(&[], Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_mock_executor_longest_prefix() {
        let executor = MockStageExecutor::new()
            .with_response("uv run", ProcessOutput::ok("generic"))
            .with_response("uv run embedder.py", ProcessOutput::ok("embedder"));

        let inv = Invocation::new(
            "uv",
            vec!["run".into(), "embedder.py".into(), "--in".into(), "x".into()],
        );
        let output = executor.execute("embeddings", &inv).await.unwrap();
        assert_eq!(output.stdout, b"embedder");
        assert_eq!(executor.calls(), vec![inv]);
    }

    #[tokio::test]
    async fn test_mock_executor_missing_response() {
        let executor = MockStageExecutor::new();
        let result = executor.execute("x", &Invocation::new("nope", vec![])).await;
        assert!(matches!(result, Err(LdnError::Spawn { .. })));
        assert_eq!(executor.calls().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_executor_captures_streams() {
        let executor = ProcessExecutor::new();
        let output = executor
            .execute("echo", &sh("echo out; echo err >&2"))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout_lossy().trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_executor_reports_exit_code() {
        let executor = ProcessExecutor::new();
        let output = executor
            .execute("fail", &sh("echo boom >&2; exit 3"))
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr.trim(), "boom");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_executor_timeout() {
        let executor = ProcessExecutor::new().with_timeout(Some(Duration::from_millis(100)));
        let result = executor.execute("slow", &sh("sleep 5")).await;
        match result {
            Err(LdnError::TimedOut { stage, after }) => {
                assert_eq!(stage, "slow");
                assert_eq!(after, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_executor_keeps_raw_stdout() {
        let executor = ProcessExecutor::new();
        let output = executor
            .execute("bytes", &sh("printf '\\377\\376\\000A'"))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, vec![0xff, 0xfe, 0x00, b'A']);
        assert_eq!(output.stdout_lossy(), "\u{fffd}\u{fffd}\u{0}A");
    }

    #[tokio::test]
    async fn test_mock_executor_writes_out_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("chunks.jsonl");
        let executor = MockStageExecutor::new()
            .with_response("split", ProcessOutput::ok("{}"))
            .writing_out_files();

        let inv = Invocation::new(
            "split",
            vec!["--in".into(), "x".into(), "--out".into(), out.display().to_string()],
        );
        executor.execute("chunks", &inv).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_process_executor_missing_program() {
        let executor = ProcessExecutor::new();
        let result = executor
            .execute("x", &Invocation::new("definitely-not-a-real-program-ldn", vec![]))
            .await;
        assert!(matches!(result, Err(LdnError::Spawn { .. })));
    }
}
