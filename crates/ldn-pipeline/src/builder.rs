//! Invocation builder - job parameters to stage invocations
//!
//! Two interchangeable strategies, picked by orchestrator configuration:
//!
//! - [`Passthrough`]: every job key becomes a command-line flag, one stage,
//!   stdout is the result.
//! - [`FixedPipeline`]: a configured chain of tools fed by the job's input
//!   reference, each stage reading the previous stage's output.

use ldn_core::{JobDescriptor, LdnError, Result, StageConfig, StrategyConfig};
use serde_json::Value;

use crate::executor::Invocation;
use crate::stage::{JobWorkspace, PipelineStage, StageOutput};

/// Maps a job onto the stages that carry it out
pub trait InvocationStrategy: Send + Sync {
    fn build(&self, job: &JobDescriptor, workspace: &JobWorkspace) -> Result<Vec<PipelineStage>>;
}

/// Build the strategy named by configuration
pub fn strategy_from_config(config: &StrategyConfig) -> Box<dyn InvocationStrategy> {
    match config {
        StrategyConfig::Passthrough {
            command,
            required,
            result_prefix,
        } => Box::new(Passthrough::new(command.clone(), required.clone(), result_prefix.clone())),
        StrategyConfig::Pipeline { stages } => Box::new(FixedPipeline::new(stages.clone())),
    }
}

/// Turn job parameters into flags, in descriptor order
///
/// `user_prompt` becomes `--user-prompt`. `true` is a bare flag; `false` and
/// `null` are dropped. Strings pass through verbatim, numbers use their JSON
/// text, arrays and objects are passed as compact JSON.
pub fn passthrough_flags(job: &JobDescriptor) -> Vec<String> {
    let mut args = Vec::with_capacity(job.len() * 2);
    for (key, value) in job.iter() {
        let flag = format!("--{}", key.replace('_', "-"));
        match value {
            Value::Bool(true) => args.push(flag),
            Value::Bool(false) | Value::Null => {}
            Value::String(s) => {
                args.push(flag);
                args.push(s.clone());
            }
            other => {
                args.push(flag);
                args.push(other.to_string());
            }
        }
    }
    args
}

/// Single-stage strategy forwarding every parameter as a flag
#[derive(Debug, Clone)]
pub struct Passthrough {
    command: Vec<String>,
    required: Vec<String>,
    result_prefix: String,
}

impl Passthrough {
    pub fn new(command: Vec<String>, required: Vec<String>, result_prefix: String) -> Self {
        Self {
            command,
            required,
            result_prefix,
        }
    }
}

impl InvocationStrategy for Passthrough {
    fn build(&self, job: &JobDescriptor, workspace: &JobWorkspace) -> Result<Vec<PipelineStage>> {
        job.require(&self.required)?;

        let invocation = Invocation::from_command(&self.command, passthrough_flags(job))?;
        let file_name = format!("{}-{}.txt", self.result_prefix, workspace.job_id);

        Ok(vec![PipelineStage {
            name: self.result_prefix.clone(),
            tool: Some(self.command.join(" ")),
            invocation,
            input: None,
            output: StageOutput::Stdout(workspace.artifacts_dir.join(&file_name)),
            artifact_name: file_name,
        }])
    }
}

/// Fixed chain of tools, each invoked as `<command> --in <prev> --out <this>`
#[derive(Debug, Clone)]
pub struct FixedPipeline {
    stages: Vec<StageConfig>,
}

impl FixedPipeline {
    pub fn new(stages: Vec<StageConfig>) -> Self {
        Self { stages }
    }
}

impl InvocationStrategy for FixedPipeline {
    fn build(&self, job: &JobDescriptor, workspace: &JobWorkspace) -> Result<Vec<PipelineStage>> {
        let initial = match job.get_str("url")? {
            Some(url) => url,
            None => job.get_str("id")?.ok_or_else(|| LdnError::MissingParameter {
                key: "url".to_string(),
            })?,
        };

        let job_dir = workspace.job_dir();
        let mut current = initial.to_string();
        let mut built = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let output = job_dir.join(&stage.output);
            let invocation = Invocation::from_command(
                &stage.command,
                [
                    "--in".to_string(),
                    current.clone(),
                    "--out".to_string(),
                    output.display().to_string(),
                ],
            )?;

            built.push(PipelineStage {
                name: stage.name.clone(),
                tool: stage.tool.clone(),
                invocation,
                input: Some(current),
                artifact_name: format!("{}/{}", workspace.job_id, stage.name),
                output: StageOutput::File(output.clone()),
            });
            current = output.display().to_string();
        }

        Ok(built)
    }
}
