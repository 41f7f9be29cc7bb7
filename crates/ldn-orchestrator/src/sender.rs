//! Job submission
//!
//! Wraps a job descriptor in a `Create` activity and posts it to an inbox,
//! the same way any other producer would.

use ldn_core::{CreateActivity, JobDescriptor, LdnError, Result};
use serde_json::Value;
use tracing::info;

use crate::mailbox::Mailbox;

/// Parse a `key=value` job parameter
///
/// The value is read as JSON when it parses (`0.2`, `true`, `[1,2]`),
/// otherwise kept as a string. Dashes in the key become underscores so
/// `--param max-tokens=5` and `--max-tokens 5` name the same key.
pub fn parse_param(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw.split_once('=').ok_or_else(|| LdnError::InvalidParameter {
        key: raw.to_string(),
        reason: "expected key=value".to_string(),
    })?;

    let key = key.trim();
    if key.is_empty() {
        return Err(LdnError::InvalidParameter {
            key: raw.to_string(),
            reason: "empty key".to_string(),
        });
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.replace('-', "_"), value))
}

/// Build the `Create` activity for a job
pub fn create_activity(actor: &str, action: &str, job: JobDescriptor) -> CreateActivity {
    CreateActivity::new(actor, action, job)
}

/// Post a job request and return what was sent
pub async fn send_job<M: Mailbox>(
    mailbox: &M,
    actor: &str,
    action: &str,
    job: JobDescriptor,
) -> Result<CreateActivity> {
    let activity = create_activity(actor, action, job);
    let body = serde_json::to_value(&activity)?;
    mailbox.post(&body).await?;
    info!("Sent {} requesting '{}'", activity.id, action);
    Ok(activity)
}
