//! Core type definitions for inbox notifications and jobs

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::fingerprint::Fingerprint;
use crate::{LdnError, Result};

/// ActivityStreams JSON-LD context
pub const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
/// W3C PROV context
pub const PROV_CONTEXT: &str = "https://www.w3.org/ns/prov#";

pub const TYPE_CREATE: &str = "Create";
pub const TYPE_ANNOUNCE: &str = "Announce";

/// Parameter keys that carry routing meaning and must be strings when present
pub const KNOWN_STRING_KEYS: &[&str] = &[
    "provider",
    "model",
    "user_prompt",
    "system_prompt",
    "url",
    "id",
];

/// An activity message exactly as it was read from the inbox
///
/// This is a read-only view: the orchestrator never edits a received
/// message, it only derives new ones. Fingerprints are computed over the
/// whole body, including fields this type has no accessor for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Notification {
    body: Map<String, Value>,
}

impl Notification {
    /// Wrap a JSON value; only objects are notifications
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(body) => Ok(Self { body }),
            other => Err(LdnError::InvalidNotification(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn id(&self) -> Option<&str> {
        self.body.get("id").and_then(Value::as_str)
    }

    /// The activity type tag (`type` on the wire)
    pub fn kind(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }

    pub fn actor(&self) -> Option<&str> {
        self.body.get("actor").and_then(Value::as_str)
    }

    pub fn object(&self) -> Option<&Value> {
        self.body.get("object")
    }

    /// The capability named by `instrument.action`
    ///
    /// Read independently of `instrument.type`, which JSON-LD allows to be
    /// an array of types.
    pub fn instrument_action(&self) -> Option<&str> {
        self.body.get("instrument")?.get("action")?.as_str()
    }

    pub fn instrument(&self) -> Option<Instrument> {
        let instrument = self.body.get("instrument")?.as_object()?;
        let kind = match instrument.get("type") {
            Some(Value::String(kind)) => Some(kind.clone()),
            Some(Value::Array(kinds)) => kinds.iter().find_map(Value::as_str).map(str::to_string),
            _ => None,
        };
        Some(Instrument {
            kind,
            action: self.instrument_action().map(str::to_string),
        })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_value(&Value::Object(self.body.clone()))
    }

    /// Reference to this activity for provenance links
    ///
    /// Producers are not required to assign ids, so fall back to a URN built
    /// from the fingerprint.
    pub fn activity_ref(&self, fingerprint: &Fingerprint) -> String {
        match self.id() {
            Some(id) => id.to_string(),
            None => format!("urn:uuid:{}", fingerprint),
        }
    }

    /// Read the `object` as a job descriptor
    ///
    /// A missing object is an empty job (required-field checks report it).
    /// A bare string is an object reference and becomes `{"id": ...}`.
    pub fn job_descriptor(&self) -> Result<JobDescriptor> {
        match self.object() {
            None | Some(Value::Null) => Ok(JobDescriptor::default()),
            Some(Value::Object(map)) => Ok(JobDescriptor::from_map(map)),
            Some(Value::String(reference)) => {
                let mut job = JobDescriptor::default();
                job.insert("id", Value::String(reference.clone()));
                Ok(job)
            }
            Some(other) => Err(LdnError::InvalidNotification(format!(
                "object must be a JSON object, got {}",
                json_kind(other)
            ))),
        }
    }
}

/// Capability descriptor carried in `instrument`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Instrument {
    pub fn service(action: impl Into<String>) -> Self {
        Self {
            kind: Some("Service".to_string()),
            action: Some(action.into()),
        }
    }
}

/// Parameters of a job request, in the order the producer sent them
///
/// Unknown keys are kept and forwarded. The well-known keys
/// get typed accessors and are checked eagerly by [`JobDescriptor::require`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobDescriptor {
    params: IndexMap<String, Value>,
}

impl JobDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            params: map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.params.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// String value of a key; `None` when absent or null
    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(LdnError::InvalidParameter {
                key: key.to_string(),
                reason: format!("expected a string, got {}", json_kind(other)),
            }),
        }
    }

    pub fn provider(&self) -> Option<&str> {
        self.get_str("provider").ok().flatten()
    }

    pub fn model(&self) -> Option<&str> {
        self.get_str("model").ok().flatten()
    }

    pub fn user_prompt(&self) -> Option<&str> {
        self.get_str("user_prompt").ok().flatten()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.get_str("system_prompt").ok().flatten()
    }

    /// Document to process: `url`, falling back to `id`
    pub fn input_reference(&self) -> Option<&str> {
        self.get_str("url")
            .ok()
            .flatten()
            .or_else(|| self.get_str("id").ok().flatten())
    }

    /// Fail fast on the first missing or mistyped required key
    pub fn require<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        for key in keys {
            let key = key.as_ref();
            match self.params.get(key) {
                None | Some(Value::Null) => {
                    return Err(LdnError::MissingParameter {
                        key: key.to_string(),
                    })
                }
                Some(_) if KNOWN_STRING_KEYS.contains(&key) => {
                    self.get_str(key)?;
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// A named output written by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
}

impl Artifact {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn url(&self) -> String {
        file_url(&self.path)
    }
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// The activity an announced artifact came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratingActivity {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(
        rename = "prov:wasAssociatedWith",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub associated_with: Option<String>,
}

impl GeneratingActivity {
    pub fn new(activity_ref: impl Into<String>, tool: Option<String>) -> Self {
        Self {
            kind: "Activity".to_string(),
            id: activity_ref.into(),
            associated_with: tool,
        }
    }
}

/// Document object inside an Announce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncedDocument {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
    pub url: String,
}

/// Provenance notification for one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnounceActivity {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: String,
    pub published: DateTime<Utc>,
    pub object: AnnouncedDocument,
    #[serde(rename = "prov:wasGeneratedBy")]
    pub was_generated_by: GeneratingActivity,
}

impl AnnounceActivity {
    pub fn new(
        actor: impl Into<String>,
        artifact: &Artifact,
        urn_prefix: &str,
        was_generated_by: GeneratingActivity,
    ) -> Self {
        Self {
            context: vec![AS_CONTEXT.to_string(), PROV_CONTEXT.to_string()],
            id: format!("urn:uuid:{}", Uuid::new_v4()),
            kind: TYPE_ANNOUNCE.to_string(),
            actor: actor.into(),
            published: Utc::now(),
            object: AnnouncedDocument {
                kind: "Document".to_string(),
                id: format!("{}{}", urn_prefix, artifact.name),
                name: artifact.name.clone(),
                url: artifact.url(),
            },
            was_generated_by,
        }
    }
}

/// Job request as posted by a sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateActivity {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub actor: String,
    pub object: JobDescriptor,
    pub instrument: Instrument,
}

impl CreateActivity {
    pub fn new(actor: impl Into<String>, action: impl Into<String>, job: JobDescriptor) -> Self {
        Self {
            context: AS_CONTEXT.to_string(),
            id: format!("urn:uuid:{}", Uuid::new_v4()),
            kind: TYPE_CREATE.to_string(),
            actor: actor.into(),
            object: job,
            instrument: Instrument::service(action),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
