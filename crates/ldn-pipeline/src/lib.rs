//! # ldn-pipeline
//!
//! Turns job descriptors into external invocations and runs them.
//!
//! This crate provides:
//! - Stage execution abstraction (real processes and a mock)
//! - Invocation strategies (flag passthrough, fixed tool chains)
//! - Sequential runner with artifact chaining between stages

mod builder;
mod executor;
mod runner;
mod stage;

pub use builder::{
    passthrough_flags, strategy_from_config, FixedPipeline, InvocationStrategy, Passthrough,
};
pub use executor::{Invocation, MockStageExecutor, ProcessExecutor, ProcessOutput, StageExecutor};
pub use runner::{ArtifactObserver, NoopObserver, PipelineRunner};
pub use stage::{check_chain, JobWorkspace, PipelineStage, StageOutput};
