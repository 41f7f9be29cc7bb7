//! Inbox transport
//!
//! The orchestrator needs only two operations: list what is in the inbox
//! (GET) and append a message (POST). Delivery is at-least-once and may
//! repeat or reorder messages; callers deduplicate by fingerprint.

use async_trait::async_trait;
use ldn_core::{LdnError, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const LD_JSON: &str = "application/ld+json";

/// Trait for inbox access (allows an in-memory inbox in tests)
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// All messages currently in the inbox, in the order the server returns
    async fn fetch(&self) -> Result<Vec<Value>>;

    /// Append one message
    async fn post(&self, body: &Value) -> Result<()>;
}

/// Linked Data Notifications inbox over HTTP
#[derive(Debug, Clone)]
pub struct HttpMailbox {
    client: reqwest::Client,
    inbox_url: String,
}

impl HttpMailbox {
    pub fn new(inbox_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LdnError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            inbox_url: inbox_url.into(),
        })
    }

    pub fn inbox_url(&self) -> &str {
        &self.inbox_url
    }
}

#[async_trait]
impl Mailbox for HttpMailbox {
    async fn fetch(&self) -> Result<Vec<Value>> {
        debug!("GET {}", self.inbox_url);

        let response = self
            .client
            .get(&self.inbox_url)
            .header(ACCEPT, format!("{}, application/json", LD_JSON))
            .send()
            .await
            .map_err(|e| LdnError::Fetch(format!("Failed to reach inbox: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LdnError::Fetch(format!("Inbox returned {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LdnError::Fetch(format!("Failed to parse inbox response: {}", e)))?;

        match body {
            Value::Array(messages) => Ok(messages),
            other => Err(LdnError::Fetch(format!(
                "Expected a JSON array from the inbox, got: {}",
                truncate(&other.to_string(), 200)
            ))),
        }
    }

    async fn post(&self, body: &Value) -> Result<()> {
        debug!("POST {}", self.inbox_url);

        let response = self
            .client
            .post(&self.inbox_url)
            .header(CONTENT_TYPE, LD_JSON)
            .body(serde_json::to_vec(body)?)
            .send()
            .await
            .map_err(|e| LdnError::Delivery(format!("Failed to reach inbox: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            return Err(LdnError::Delivery(format!(
                "Inbox returned {}: {}",
                status,
                truncate(&text, 200)
            )));
        }

        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// In-process inbox
///
/// Posts are appended to the same list fetches return, so announcements
/// show up on the next poll the way they would on a real inbox. Clones
/// share state.
#[derive(Clone, Default)]
pub struct MemoryMailbox {
    messages: Arc<Mutex<Vec<Value>>>,
    posted: Arc<Mutex<Vec<Value>>>,
    fail_fetch: Arc<AtomicBool>,
    fail_post: Arc<AtomicBool>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Value>) -> Self {
        let mailbox = Self::default();
        for message in messages {
            mailbox.push(message);
        }
        mailbox
    }

    /// Add a message as if a producer had posted it
    pub fn push(&self, message: Value) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
    }

    /// Everything currently in the inbox
    pub fn messages(&self) -> Vec<Value> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Only what was delivered through [`Mailbox::post`]
    pub fn posted(&self) -> Vec<Value> {
        self.posted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_fetch_failure(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_post_failure(&self, fail: bool) {
        self.fail_post.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn fetch(&self) -> Result<Vec<Value>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(LdnError::Fetch("inbox unavailable".to_string()));
        }
        Ok(self.messages())
    }

    async fn post(&self, body: &Value) -> Result<()> {
        if self.fail_post.load(Ordering::SeqCst) {
            return Err(LdnError::Delivery("inbox unavailable".to_string()));
        }
        self.posted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(body.clone());
        self.push(body.clone());
        Ok(())
    }
}
