//! Sequential pipeline runner
//!
//! Stages run one after another, never in parallel: stage n+1 reads what
//! stage n wrote. The first failing stage aborts the rest of the job.

use async_trait::async_trait;
use ldn_core::{Artifact, LdnError, Result};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::executor::StageExecutor;
use crate::stage::{check_chain, PipelineStage, StageOutput};

/// Notified once per artifact, right after it is written
#[async_trait]
pub trait ArtifactObserver: Send + Sync {
    async fn artifact_ready(&self, stage: &PipelineStage, artifact: &Artifact);
}

/// Observer that ignores artifacts
pub struct NoopObserver;

#[async_trait]
impl ArtifactObserver for NoopObserver {
    async fn artifact_ready(&self, _stage: &PipelineStage, _artifact: &Artifact) {}
}

/// Runs a job's stages through an executor
pub struct PipelineRunner<E: StageExecutor> {
    executor: E,
}

impl<E: StageExecutor> PipelineRunner<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run `stages` in order and return the last stage's artifact
    pub async fn run(
        &self,
        stages: &[PipelineStage],
        observer: &dyn ArtifactObserver,
    ) -> Result<Artifact> {
        if stages.is_empty() {
            return Err(LdnError::Invalid("job has no stages".to_string()));
        }
        check_chain(stages)?;

        let total = stages.len();
        let mut last = None;

        for (i, stage) in stages.iter().enumerate() {
            info!("Stage {}/{} '{}': {}", i + 1, total, stage.name, stage.invocation);

            if let Some(parent) = stage.output.path().parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    LdnError::Storage(format!(
                        "Failed to create artifact directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }

            let output = self.executor.execute(&stage.name, &stage.invocation).await?;
            if !output.stderr.is_empty() {
                debug!("Stage '{}' stderr:\n{}", stage.name, output.stderr.trim_end());
            }

            if !output.success {
                if !output.stdout.is_empty() {
                    debug!("Stage '{}' stdout:\n{}", stage.name, output.stdout_lossy().trim_end());
                }
                return Err(LdnError::Execution {
                    stage: stage.name.clone(),
                    exit_code: output.exit_code,
                    stderr: output.stderr,
                });
            }

            match &stage.output {
                StageOutput::Stdout(path) => write_durably(path, &output.stdout).await?,
                StageOutput::File(path) => ensure_written(&stage.name, path).await?,
            }

            let artifact = stage.artifact();
            info!("Stage '{}' produced {}", stage.name, artifact.path.display());
            observer.artifact_ready(stage, &artifact).await;
            last = Some(artifact);
        }

        last.ok_or_else(|| LdnError::Invalid("job produced no artifact".to_string()))
    }
}

/// A tool that exits 0 without writing its `--out` file has still failed
async fn ensure_written(stage: &str, path: &Path) -> Result<()> {
    let present = tokio::fs::try_exists(path).await.map_err(|e| {
        LdnError::Storage(format!("Failed to stat {}: {}", path.display(), e))
    })?;
    if !present {
        return Err(LdnError::Storage(format!(
            "Stage '{}' exited 0 but did not write {}",
            stage,
            path.display()
        )));
    }
    Ok(())
}

async fn write_durably(path: &Path, contents: &[u8]) -> Result<()> {
    let storage = |e: std::io::Error| {
        LdnError::Storage(format!("Failed to write {}: {}", path.display(), e))
    };
    let mut file = tokio::fs::File::create(path).await.map_err(storage)?;
    file.write_all(contents).await.map_err(storage)?;
    file.sync_all().await.map_err(storage)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{FixedPipeline, InvocationStrategy, Passthrough};
    use crate::executor::{Invocation, MockStageExecutor, ProcessOutput};
    use crate::stage::JobWorkspace;
    use ldn_core::{JobDescriptor, StrategyConfig};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactObserver for RecordingObserver {
        async fn artifact_ready(&self, stage: &PipelineStage, _artifact: &Artifact) {
            self.seen.lock().unwrap().push(stage.name.clone());
        }
    }

    fn pipeline_stages(ws: &JobWorkspace) -> Vec<PipelineStage> {
        let strategy = match StrategyConfig::default_pipeline() {
            StrategyConfig::Pipeline { stages } => FixedPipeline::new(stages),
            _ => unreachable!(),
        };
        let mut job = JobDescriptor::new();
        job.insert("url", json!("https://example.org/doc.txt"));
        strategy.build(&job, ws).unwrap()
    }

    #[tokio::test]
    async fn test_all_stages_run_in_order() {
        let dir = TempDir::new().unwrap();
        let ws = JobWorkspace::new(dir.path());
        let stages = pipeline_stages(&ws);

        let executor = MockStageExecutor::new()
            .with_response("uv run", ProcessOutput::ok("{}"))
            .writing_out_files();
        let observer = RecordingObserver::default();
        let runner = PipelineRunner::new(executor.clone());

        let artifact = runner.run(&stages, &observer).await.unwrap();

        assert_eq!(artifact.path, ws.job_dir().join("index.jsonl"));
        let programs: Vec<String> = executor.calls().iter().map(|c| c.args[1].clone()).collect();
        assert_eq!(programs, vec!["splitter.py", "embedder.py", "indexer.py"]);
        assert_eq!(
            *observer.seen.lock().unwrap(),
            vec!["chunks", "embeddings", "index"]
        );
        assert!(ws.job_dir().is_dir());
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_stages() {
        let dir = TempDir::new().unwrap();
        let ws = JobWorkspace::new(dir.path());
        let stages = pipeline_stages(&ws);

        let executor = MockStageExecutor::new()
            .with_response("uv run", ProcessOutput::ok("{}"))
            .with_response("uv run embedder.py", ProcessOutput::failed(1, "out of memory"))
            .writing_out_files();
        let observer = RecordingObserver::default();
        let runner = PipelineRunner::new(executor.clone());

        let err = runner.run(&stages, &observer).await.unwrap_err();
        match err {
            LdnError::Execution {
                stage,
                exit_code,
                stderr,
            } => {
                assert_eq!(stage, "embeddings");
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr, "out of memory");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(executor.calls().len(), 2);
        assert!(executor
            .calls()
            .iter()
            .all(|c| !c.args.contains(&"indexer.py".to_string())));
        assert_eq!(*observer.seen.lock().unwrap(), vec!["chunks"]);
    }

    #[tokio::test]
    async fn test_missing_out_file_fails_the_stage() {
        let dir = TempDir::new().unwrap();
        let ws = JobWorkspace::new(dir.path());
        let stages = pipeline_stages(&ws);

        // exits 0 but never writes --out
        let executor = MockStageExecutor::new().with_response("uv run", ProcessOutput::ok(""));
        let observer = RecordingObserver::default();
        let runner = PipelineRunner::new(executor.clone());

        let err = runner.run(&stages, &observer).await.unwrap_err();
        match err {
            LdnError::Storage(msg) => {
                assert!(msg.contains("'chunks'"), "{msg}");
                assert!(msg.contains("chunks.jsonl"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(executor.calls().len(), 1);
        assert!(observer.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stdout_bytes_are_persisted_verbatim() {
        let dir = TempDir::new().unwrap();
        let ws = JobWorkspace::new(dir.path());
        let strategy = Passthrough::new(vec!["dump".into()], vec![], "raw".into());
        let stages = strategy.build(&JobDescriptor::new(), &ws).unwrap();

        let bytes = vec![0xff, 0xfe, 0x00, b'A', b'\n'];
        let executor = MockStageExecutor::new().with_response("dump", ProcessOutput::ok(bytes.clone()));
        let artifact = PipelineRunner::new(executor).run(&stages, &NoopObserver).await.unwrap();

        assert_eq!(std::fs::read(&artifact.path).unwrap(), bytes);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_stdout_bytes_are_persisted_verbatim() {
        use crate::executor::ProcessExecutor;

        let dir = TempDir::new().unwrap();
        let ws = JobWorkspace::new(dir.path());
        let strategy = Passthrough::new(
            vec!["sh".into(), "-c".into(), "printf '\\377\\376\\000A'".into()],
            vec![],
            "raw".into(),
        );
        let stages = strategy.build(&JobDescriptor::new(), &ws).unwrap();

        let runner = PipelineRunner::new(ProcessExecutor::new());
        let artifact = runner.run(&stages, &NoopObserver).await.unwrap();

        assert_eq!(std::fs::read(&artifact.path).unwrap(), vec![0xff, 0xfe, 0x00, b'A']);
    }

    #[tokio::test]
    async fn test_stdout_is_persisted() {
        let dir = TempDir::new().unwrap();
        let ws = JobWorkspace::new(dir.path());
        let strategy = Passthrough::new(vec!["infer".into()], vec![], "inference-result".into());
        let mut job = JobDescriptor::new();
        job.insert("user_prompt", json!("hi"));
        let stages = strategy.build(&job, &ws).unwrap();

        let executor = MockStageExecutor::new().with_response("infer", ProcessOutput::ok("hello there"));
        let runner = PipelineRunner::new(executor);
        let artifact = runner.run(&stages, &NoopObserver).await.unwrap();

        assert_eq!(
            artifact.name,
            format!("inference-result-{}.txt", ws.job_id)
        );
        let written = std::fs::read_to_string(&artifact.path).unwrap();
        assert_eq!(written, "hello there");
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_invalid() {
        let runner = PipelineRunner::new(MockStageExecutor::new());
        let result = runner.run(&[], &NoopObserver).await;
        assert!(matches!(result, Err(LdnError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_broken_chain_never_executes() {
        let dir = TempDir::new().unwrap();
        let ws = JobWorkspace::new(dir.path());
        let mut stages = pipeline_stages(&ws);
        stages[1].input = Some("elsewhere".to_string());
        stages[1].invocation = Invocation::new("uv", vec![]);

        let executor = MockStageExecutor::new().with_response("uv", ProcessOutput::ok(""));
        let runner = PipelineRunner::new(executor.clone());

        assert!(runner.run(&stages, &NoopObserver).await.is_err());
        assert!(executor.calls().is_empty());
    }
}
