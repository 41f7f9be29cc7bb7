//! Configuration management for ldn
//!
//! One `OrchestratorConfig` is built at startup and handed to every
//! component. Values come from defaults, then `ldn.toml`, then environment
//! variables; the CLI applies its own flags last.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{LdnError, Result};

/// File name looked up in the working directory when no path is given
pub const CONFIG_FILE_NAME: &str = "ldn.toml";

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Inbox polled for jobs and posted to for announcements
    #[serde(default = "default_inbox_url")]
    pub inbox_url: String,

    /// Capability this instance handles (`instrument.action`)
    #[serde(default = "default_action")]
    pub action: String,

    /// Actor URI stamped on announcements
    #[serde(default = "default_actor")]
    pub actor: String,

    /// Holds the seen log and produced artifacts
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Wait after a failed poll
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Per-stage limit; 0 disables it
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Prefix for announced document ids
    #[serde(default = "default_artifact_urn_prefix")]
    pub artifact_urn_prefix: String,

    #[serde(default)]
    pub strategy: StrategyConfig,
}

/// How job parameters become stage invocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Every job key becomes a `--flag`; stdout is the result
    Passthrough {
        /// Program and leading arguments, e.g. `["uv", "run", "inference.py"]`
        command: Vec<String>,
        #[serde(default = "default_required")]
        required: Vec<String>,
        #[serde(default = "default_result_prefix")]
        result_prefix: String,
    },
    /// Fixed chain of tools fed by the job's input reference
    Pipeline { stages: Vec<StageConfig> },
}

/// One step of a fixed pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Artifact name (`chunks`, `embeddings`, ...)
    pub name: String,
    /// Program and leading arguments; `--in`/`--out` are appended
    pub command: Vec<String>,
    /// Output file name inside the job's artifact directory
    pub output: String,
    /// Tool reference recorded as `prov:wasAssociatedWith`
    #[serde(default)]
    pub tool: Option<String>,
}

// Default value providers
fn default_inbox_url() -> String {
    "http://localhost:8080/inbox".to_string()
}

fn default_action() -> String {
    "infer".to_string()
}

fn default_actor() -> String {
    "https://example.org/actors/ldn-runner".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_error_backoff_secs() -> u64 {
    5
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_stage_timeout_secs() -> u64 {
    3600
}

fn default_artifact_urn_prefix() -> String {
    "urn:ldn:artifact:".to_string()
}

fn default_required() -> Vec<String> {
    vec![
        "provider".to_string(),
        "model".to_string(),
        "user_prompt".to_string(),
    ]
}

fn default_result_prefix() -> String {
    "inference-result".to_string()
}

impl OrchestratorConfig {
    /// Load `path`, or `./ldn.toml` when present, or defaults
    ///
    /// Environment overrides are applied on top in every case.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let local = Path::new(CONFIG_FILE_NAME);
                if local.exists() {
                    Self::from_file(local)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LdnError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| LdnError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Write default configuration to `<dir>/ldn.toml`
    pub fn write_default(dir: &Path) -> Result<PathBuf> {
        let path = dir.join(CONFIG_FILE_NAME);
        Self::default().save(&path)?;
        Ok(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| LdnError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `INBOX_URL`, `LDN_ACTION`, `LDN_STATE_DIR`, `LDN_POLL_INTERVAL_SECS`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("INBOX_URL") {
            self.inbox_url = url;
        }
        if let Some(action) = lookup("LDN_ACTION") {
            self.action = action;
        }
        if let Some(dir) = lookup("LDN_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("LDN_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = secs.trim().parse().map_err(|_| {
                LdnError::Config(format!("LDN_POLL_INTERVAL_SECS is not a number: {}", secs))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.inbox_url.trim().is_empty() {
            return Err(LdnError::Config("inbox_url is empty".to_string()));
        }
        if self.action.trim().is_empty() {
            return Err(LdnError::Config("action is empty".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(LdnError::Config(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        match &self.strategy {
            StrategyConfig::Passthrough { command, .. } if command.is_empty() => Err(
                LdnError::Config("passthrough strategy needs a command".to_string()),
            ),
            StrategyConfig::Pipeline { stages } if stages.is_empty() => Err(LdnError::Config(
                "pipeline strategy needs at least one stage".to_string(),
            )),
            StrategyConfig::Pipeline { stages } => {
                match stages.iter().find(|s| s.command.is_empty()) {
                    Some(stage) => Err(LdnError::Config(format!(
                        "pipeline stage '{}' has no command",
                        stage.name
                    ))),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        match self.stage_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn seen_log_path(&self) -> PathBuf {
        self.state_dir.join("seen.txt")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.state_dir.join("artifacts")
    }
}

impl StrategyConfig {
    /// Document indexing chain: split, embed, index
    pub fn default_pipeline() -> Self {
        let stage = |name: &str, script: &str, output: &str| StageConfig {
            name: name.to_string(),
            command: vec!["uv".to_string(), "run".to_string(), script.to_string()],
            output: output.to_string(),
            tool: Some(script.to_string()),
        };
        Self::Pipeline {
            stages: vec![
                stage("chunks", "splitter.py", "chunks.jsonl"),
                stage("embeddings", "embedder.py", "embeddings.jsonl"),
                stage("index", "indexer.py", "index.jsonl"),
            ],
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::Passthrough {
            command: vec![
                "uv".to_string(),
                "run".to_string(),
                "inference.py".to_string(),
            ],
            required: default_required(),
            result_prefix: default_result_prefix(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            inbox_url: default_inbox_url(),
            action: default_action(),
            actor: default_actor(),
            state_dir: default_state_dir(),
            poll_interval_secs: default_poll_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            stage_timeout_secs: default_stage_timeout_secs(),
            artifact_urn_prefix: default_artifact_urn_prefix(),
            strategy: StrategyConfig::default(),
        }
    }
}
