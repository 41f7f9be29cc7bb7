//! Announce emitter
//!
//! Posts one `Announce` per artifact back to the inbox. Delivery is
//! best-effort: the artifact already exists on disk, so a failed post is
//! logged and the job carries on.

use async_trait::async_trait;
use ldn_core::fail_open::fail_open;
use ldn_core::{AnnounceActivity, Artifact, GeneratingActivity, Result};
use ldn_pipeline::{ArtifactObserver, PipelineStage};
use tracing::info;

use crate::mailbox::Mailbox;

pub struct Announcer<M: Mailbox> {
    mailbox: M,
    actor: String,
    urn_prefix: String,
}

impl<M: Mailbox> Announcer<M> {
    pub fn new(mailbox: M, actor: impl Into<String>, urn_prefix: impl Into<String>) -> Self {
        Self {
            mailbox,
            actor: actor.into(),
            urn_prefix: urn_prefix.into(),
        }
    }

    /// Build and post the announcement; `false` if delivery failed
    pub async fn announce(&self, artifact: &Artifact, generated_by: GeneratingActivity) -> bool {
        let activity = AnnounceActivity::new(&self.actor, artifact, &self.urn_prefix, generated_by);

        let delivered = fail_open("announce", || self.deliver(&activity))
            .await
            .is_some();

        if delivered {
            info!("Announced {} as {}", artifact.name, activity.object.id);
        }
        delivered
    }

    async fn deliver(&self, activity: &AnnounceActivity) -> Result<()> {
        let body = serde_json::to_value(activity)?;
        self.mailbox.post(&body).await
    }

    /// Observer announcing each stage artifact of one job
    pub fn for_activity(&self, activity_ref: impl Into<String>) -> JobAnnouncer<'_, M> {
        JobAnnouncer {
            announcer: self,
            activity_ref: activity_ref.into(),
        }
    }
}

/// Links every artifact of a job to the activity that requested it
pub struct JobAnnouncer<'a, M: Mailbox> {
    announcer: &'a Announcer<M>,
    activity_ref: String,
}

#[async_trait]
impl<M: Mailbox> ArtifactObserver for JobAnnouncer<'_, M> {
    async fn artifact_ready(&self, stage: &PipelineStage, artifact: &Artifact) {
        let generated_by = GeneratingActivity::new(self.activity_ref.clone(), stage.tool.clone());
        self.announcer.announce(artifact, generated_by).await;
    }
}
