//! Pipeline stage definitions

use ldn_core::{Artifact, LdnError, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::executor::Invocation;

/// Where a stage's artifact comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    /// The tool writes this file itself (`--out <path>`)
    File(PathBuf),
    /// The runner persists the tool's stdout to this file
    Stdout(PathBuf),
}

impl StageOutput {
    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) | Self::Stdout(path) => path,
        }
    }
}

/// One step of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStage {
    pub name: String,
    /// Tool reference for provenance (`prov:wasAssociatedWith`)
    pub tool: Option<String>,
    pub invocation: Invocation,
    /// Input artifact reference; the previous stage's output path when chained
    pub input: Option<String>,
    pub output: StageOutput,
    pub artifact_name: String,
}

impl PipelineStage {
    pub fn artifact(&self) -> Artifact {
        Artifact::new(self.artifact_name.clone(), self.output.path())
    }
}

/// Per-job output location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    pub job_id: Uuid,
    pub artifacts_dir: PathBuf,
}

impl JobWorkspace {
    /// Fresh workspace with a random job id
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self::with_id(artifacts_dir, Uuid::new_v4())
    }

    pub fn with_id(artifacts_dir: impl Into<PathBuf>, job_id: Uuid) -> Self {
        Self {
            job_id,
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Directory holding a multi-stage job's intermediate artifacts
    pub fn job_dir(&self) -> PathBuf {
        self.artifacts_dir.join(self.job_id.to_string())
    }
}

/// Check that each stage consumes exactly what the previous one produced
pub fn check_chain(stages: &[PipelineStage]) -> Result<()> {
    for pair in stages.windows(2) {
        let produced = pair[0].output.path().display().to_string();
        if pair[1].input.as_deref() != Some(produced.as_str()) {
            return Err(LdnError::Invalid(format!(
                "stage '{}' does not consume the output of '{}' ({})",
                pair[1].name, pair[0].name, produced
            )));
        }
    }
    Ok(())
}
