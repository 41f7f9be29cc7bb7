//! Inbox polling loop
//!
//! One message at a time, in the order the inbox lists them:
//! fingerprint, skip if seen, filter, build stages, run them, mark seen.
//! Jobs never overlap, so the seen log and the artifact directory have a
//! single writer.

use ldn_core::{Artifact, Fingerprint, LdnError, Notification, OrchestratorConfig, Result};
use ldn_pipeline::{strategy_from_config, InvocationStrategy, JobWorkspace, PipelineRunner, StageExecutor};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::announce::Announcer;
use crate::dedup::DedupStore;
use crate::filter::CapabilityFilter;
use crate::mailbox::Mailbox;
use crate::state_machine::{transition, MessageEvent, MessageState};

/// What happened to one message
#[derive(Debug)]
pub enum MessageOutcome {
    /// Fingerprint already in the seen log
    AlreadySeen,
    /// Not an actionable job request
    Ignored,
    Succeeded(Artifact),
    Failed(LdnError),
    /// Shutdown arrived while the job was running
    Interrupted,
}

#[derive(Debug)]
pub struct MessageReport {
    pub fingerprint: Fingerprint,
    pub outcome: MessageOutcome,
    /// The outcome reached the seen log
    pub marked: bool,
}

/// Counters for one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub skipped_seen: usize,
    pub ignored: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub interrupted: usize,
    /// Finished jobs whose seen-log append failed; they will run again
    pub unmarked: usize,
    /// Shutdown stopped the cycle before the end of the list
    pub stopped_early: bool,
}

impl CycleReport {
    pub fn dispatched(&self) -> usize {
        self.succeeded + self.failed + self.interrupted
    }

    fn record(&mut self, report: &MessageReport) {
        match report.outcome {
            MessageOutcome::AlreadySeen => self.skipped_seen += 1,
            MessageOutcome::Ignored => self.ignored += 1,
            MessageOutcome::Succeeded(_) => self.succeeded += 1,
            MessageOutcome::Failed(_) => self.failed += 1,
            MessageOutcome::Interrupted => self.interrupted += 1,
        }
        let finished = matches!(
            report.outcome,
            MessageOutcome::Succeeded(_) | MessageOutcome::Failed(_)
        );
        if finished && !report.marked {
            self.unmarked += 1;
        }
    }
}

/// Notification-driven job runner
pub struct Orchestrator<M: Mailbox + Clone, E: StageExecutor> {
    config: OrchestratorConfig,
    mailbox: M,
    dedup: DedupStore,
    filter: CapabilityFilter,
    strategy: Box<dyn InvocationStrategy>,
    runner: PipelineRunner<E>,
    announcer: Announcer<M>,
    artifacts_dir: PathBuf,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<M: Mailbox + Clone, E: StageExecutor> Orchestrator<M, E> {
    /// Prepare the state directory and load the seen log
    ///
    /// A seen log that cannot be read is fatal: running without it would
    /// reprocess every message in the inbox.
    pub async fn new(mut config: OrchestratorConfig, mailbox: M, executor: E) -> Result<Self> {
        config.state_dir = prepare_state_dir(&config.state_dir).await?;
        let artifacts_dir = config.artifacts_dir();
        tokio::fs::create_dir_all(&artifacts_dir).await.map_err(|e| {
            LdnError::Storage(format!(
                "Failed to create artifact directory {}: {}",
                artifacts_dir.display(),
                e
            ))
        })?;

        let dedup = DedupStore::load(config.seen_log_path()).await?;
        let filter = CapabilityFilter::new(config.action.clone());
        let strategy = strategy_from_config(&config.strategy);
        let announcer = Announcer::new(
            mailbox.clone(),
            config.actor.clone(),
            config.artifact_urn_prefix.clone(),
        );

        Ok(Self {
            config,
            mailbox,
            dedup,
            filter,
            strategy,
            runner: PipelineRunner::new(executor),
            announcer,
            artifacts_dir,
            shutdown: None,
        })
    }

    /// Stop when `shutdown` flips to `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn seen_count(&self) -> usize {
        self.dedup.len()
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Poll until shutdown, backing off after failed fetches
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Watching {} for '{}' jobs ({} already seen)",
            self.config.inbox_url,
            self.config.action,
            self.dedup.len()
        );

        loop {
            let pause = match self.poll_once().await {
                Ok(report) => {
                    if report.dispatched() > 0 {
                        info!(
                            "Cycle done: {} succeeded, {} failed, {} interrupted",
                            report.succeeded, report.failed, report.interrupted
                        );
                    } else {
                        debug!("Cycle done: {:?}", report);
                    }
                    self.config.poll_interval()
                }
                Err(e) => {
                    let backoff = self.config.error_backoff();
                    warn!("Inbox poll failed: {}; retrying in {:?}", e, backoff);
                    backoff
                }
            };

            if self.shutdown_requested() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown_signal(self.shutdown.clone()) => break,
            }
        }

        info!("Orchestrator stopped");
        Ok(())
    }

    /// Fetch the inbox once and process every message in it
    ///
    /// Only the fetch can fail; per-message errors are logged and counted.
    pub async fn poll_once(&mut self) -> Result<CycleReport> {
        let messages = self.mailbox.fetch().await?;
        let mut report = CycleReport {
            fetched: messages.len(),
            ..CycleReport::default()
        };

        for message in messages {
            if self.shutdown_requested() {
                report.stopped_early = true;
                break;
            }

            let outcome = self.process_message(message).await;
            report.record(&outcome);
            if matches!(outcome.outcome, MessageOutcome::Interrupted) {
                report.stopped_early = true;
                break;
            }
        }

        Ok(report)
    }

    /// Take one message through its lifecycle
    pub async fn process_message(&mut self, message: Value) -> MessageReport {
        let fingerprint = Fingerprint::of_value(&message);
        if self.dedup.contains(&fingerprint) {
            return MessageReport {
                fingerprint,
                outcome: MessageOutcome::AlreadySeen,
                marked: true,
            };
        }

        let notification = match Notification::from_value(message) {
            Ok(n) => n,
            Err(e) => {
                debug!("Skipping {}: {}", fingerprint.short(), e);
                return MessageReport {
                    fingerprint,
                    outcome: MessageOutcome::Ignored,
                    marked: false,
                };
            }
        };

        let actionable = self.filter.is_actionable(&notification);
        let mut state = advance(MessageState::Unseen, MessageEvent::Filtered { actionable });
        if !actionable {
            debug!(
                "Ignoring {} ({})",
                fingerprint.short(),
                notification.kind().unwrap_or("untyped")
            );
            return MessageReport {
                fingerprint,
                outcome: MessageOutcome::Ignored,
                marked: false,
            };
        }

        let activity_ref = notification.activity_ref(&fingerprint);
        info!("Dispatching {} ({})", activity_ref, fingerprint.short());

        let result = tokio::select! {
            result = self.dispatch(&notification, &activity_ref) => Some(result),
            _ = shutdown_signal(self.shutdown.clone()) => None,
        };

        let outcome = match result {
            None => {
                advance(state, MessageEvent::ShutdownRequested);
                warn!(
                    "Shutdown during {}; leaving it unmarked for the next run",
                    activity_ref
                );
                return MessageReport {
                    fingerprint,
                    outcome: MessageOutcome::Interrupted,
                    marked: false,
                };
            }
            Some(Ok(artifact)) => {
                info!("Job {} produced {}", activity_ref, artifact.path.display());
                state = advance(state, MessageEvent::JobSucceeded);
                MessageOutcome::Succeeded(artifact)
            }
            Some(Err(e)) => {
                error!("Job {} failed: {}", activity_ref, e);
                state = advance(state, MessageEvent::JobFailed);
                MessageOutcome::Failed(e)
            }
        };

        let mut marked = false;
        if state.needs_marking() {
            match self.dedup.mark_seen(fingerprint.clone()).await {
                Ok(_) => {
                    advance(state, MessageEvent::MarkedSeen);
                    marked = true;
                }
                Err(e) => error!(
                    "Could not record {} as seen, it will be processed again: {}",
                    fingerprint.short(),
                    e
                ),
            }
        }

        MessageReport {
            fingerprint,
            outcome,
            marked,
        }
    }

    async fn dispatch(&self, notification: &Notification, activity_ref: &str) -> Result<Artifact> {
        let job = notification.job_descriptor()?;
        let workspace = JobWorkspace::new(&self.artifacts_dir);
        let stages = self.strategy.build(&job, &workspace)?;
        debug!("Job {} has {} stage(s)", workspace.job_id, stages.len());

        let observer = self.announcer.for_activity(activity_ref);
        self.runner.run(&stages, &observer).await
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

fn advance(state: MessageState, event: MessageEvent) -> MessageState {
    transition(state, event).unwrap_or_else(|| {
        warn!("Ignoring {:?} in state {:?}", event, state);
        state
    })
}

/// Resolves once shutdown is requested; never if there is no signal
async fn shutdown_signal(shutdown: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = shutdown else {
        return std::future::pending().await;
    };
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // Sender gone without signalling
            return std::future::pending().await;
        }
    }
}

/// Create `dir` and return its absolute form, so artifact URLs are absolute
async fn prepare_state_dir(dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        LdnError::Storage(format!(
            "Failed to create state directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    tokio::fs::canonicalize(dir).await.map_err(|e| {
        LdnError::Storage(format!("Failed to resolve {}: {}", dir.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MemoryMailbox;
    use ldn_pipeline::{MockStageExecutor, ProcessOutput};
    use serde_json::json;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> OrchestratorConfig {
        OrchestratorConfig {
            state_dir: dir.path().join("state"),
            ..OrchestratorConfig::default()
        }
    }

    fn infer_request(prompt: &str) -> Value {
        json!({
            "type": "Create",
            "actor": "https://example.org/users/cli-user",
            "object": {"provider": "groq", "model": "llama", "user_prompt": prompt},
            "instrument": {"type": "Service", "action": "infer"}
        })
    }

    #[test]
    fn test_cycle_report_counts() {
        let mut report = CycleReport::default();
        let fp = Fingerprint::of_value(&json!({}));
        report.record(&MessageReport {
            fingerprint: fp.clone(),
            outcome: MessageOutcome::Failed(LdnError::Invalid("x".into())),
            marked: false,
        });
        report.record(&MessageReport {
            fingerprint: fp,
            outcome: MessageOutcome::AlreadySeen,
            marked: true,
        });
        assert_eq!(report.failed, 1);
        assert_eq!(report.unmarked, 1);
        assert_eq!(report.skipped_seen, 1);
        assert_eq!(report.dispatched(), 1);
    }

    #[tokio::test]
    async fn test_state_dir_is_created_and_absolute() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(config(&dir), MemoryMailbox::new(), MockStageExecutor::new())
            .await
            .unwrap();

        assert!(orchestrator.config().state_dir.is_absolute());
        assert!(orchestrator.artifacts_dir().is_dir());
        assert_eq!(orchestrator.seen_count(), 0);
    }

    #[tokio::test]
    async fn test_process_message_marks_success() {
        let dir = TempDir::new().unwrap();
        let executor = MockStageExecutor::new().with_response("uv run inference.py", ProcessOutput::ok("answer"));
        let mut orchestrator = Orchestrator::new(config(&dir), MemoryMailbox::new(), executor)
            .await
            .unwrap();

        let report = orchestrator.process_message(infer_request("hi")).await;
        assert!(report.marked);
        match report.outcome {
            MessageOutcome::Succeeded(artifact) => {
                assert!(artifact.name.starts_with("inference-result-"));
                assert_eq!(std::fs::read_to_string(artifact.path).unwrap(), "answer");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let again = orchestrator.process_message(infer_request("hi")).await;
        assert!(matches!(again.outcome, MessageOutcome::AlreadySeen));
    }

    #[tokio::test]
    async fn test_non_object_messages_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut orchestrator = Orchestrator::new(config(&dir), MemoryMailbox::new(), MockStageExecutor::new())
            .await
            .unwrap();

        let report = orchestrator.process_message(json!("Create")).await;
        assert!(matches!(report.outcome, MessageOutcome::Ignored));
        assert!(!report.marked);
        assert_eq!(orchestrator.seen_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_object_fails_and_is_marked() {
        let dir = TempDir::new().unwrap();
        let mut orchestrator = Orchestrator::new(config(&dir), MemoryMailbox::new(), MockStageExecutor::new())
            .await
            .unwrap();

        let message = json!({
            "type": "Create",
            "object": [1, 2, 3],
            "instrument": {"type": "Service", "action": "infer"}
        });
        let report = orchestrator.process_message(message).await;
        assert!(matches!(
            report.outcome,
            MessageOutcome::Failed(LdnError::InvalidNotification(_))
        ));
        assert!(report.marked);
    }

    #[tokio::test]
    async fn test_shutdown_before_cycle_processes_nothing() {
        let dir = TempDir::new().unwrap();
        let mailbox = MemoryMailbox::with_messages(vec![infer_request("a"), infer_request("b")]);
        let executor = MockStageExecutor::new().with_response("uv", ProcessOutput::ok(""));
        let (tx, rx) = watch::channel(false);
        let mut orchestrator = Orchestrator::new(config(&dir), mailbox, executor.clone())
            .await
            .unwrap()
            .with_shutdown(rx);

        tx.send(true).unwrap();
        let report = orchestrator.poll_once().await.unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.dispatched(), 0);
        assert!(executor.calls().is_empty());

        // The loop returns without sleeping
        orchestrator.run().await.unwrap();
    }
}
