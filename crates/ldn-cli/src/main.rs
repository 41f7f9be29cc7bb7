//! ldn CLI - notification-driven job runner
//!
//! Usage:
//!   ldn init [path]            Write a default ldn.toml
//!   ldn run                    Watch the inbox and run matching jobs
//!   ldn run --once             Process the inbox once and exit
//!   ldn send -u <prompt> ...   Post an inference job to an inbox
//!   ldn seen [--list]          Show processed message fingerprints

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ldn_core::config::CONFIG_FILE_NAME;
use ldn_core::{JobDescriptor, OrchestratorConfig, StrategyConfig};
use ldn_orchestrator::{create_activity, parse_param, send_job, DedupStore, HttpMailbox, Orchestrator};
use ldn_pipeline::ProcessExecutor;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_SENDER_ACTOR: &str = "https://example.org/users/cli-user";

#[derive(Parser)]
#[command(name = "ldn")]
#[command(author, version, about = "Run jobs requested through a Linked Data Notifications inbox")]
struct Cli {
    /// Enable verbose logging (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (defaults to ./ldn.toml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Directory to write ldn.toml into
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Configure the split/embed/index pipeline instead of inference
        #[arg(long)]
        pipeline: bool,

        /// Overwrite an existing ldn.toml
        #[arg(long)]
        force: bool,
    },

    /// Watch the inbox and run matching jobs
    Run {
        /// Process the inbox once and exit
        #[arg(long)]
        once: bool,

        /// Inbox URL
        #[arg(long, value_name = "URL")]
        inbox: Option<String>,

        /// Capability to serve (instrument.action)
        #[arg(long)]
        action: Option<String>,

        /// Directory for the seen log and artifacts
        #[arg(long, value_name = "DIR")]
        state_dir: Option<PathBuf>,

        /// Seconds between polls
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
        poll_interval: Option<u64>,
    },

    /// Post a job request to an inbox
    Send(SendArgs),

    /// Show processed message fingerprints
    Seen {
        /// Print every fingerprint
        #[arg(long)]
        list: bool,
    },
}

#[derive(clap::Args)]
struct SendArgs {
    /// Inbox URL (defaults to the configured inbox)
    #[arg(long, value_name = "URL")]
    inbox: Option<String>,

    /// Actor URI for the notification
    #[arg(long, default_value = DEFAULT_SENDER_ACTOR)]
    actor: String,

    /// Capability requested (instrument.action)
    #[arg(long, default_value = "infer")]
    action: String,

    /// openai | groq | ollama | hf | huggingface
    #[arg(long)]
    provider: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// Override base URL for the provider
    #[arg(long)]
    base_url: Option<String>,

    /// HuggingFace router subpath
    #[arg(long)]
    hf_subpath: Option<String>,

    /// Ask the inference tool to list available models
    #[arg(long)]
    list_models: bool,

    /// Request raw JSON output from inference
    #[arg(long)]
    json_output: bool,

    /// Request verbose logs from inference
    #[arg(long = "verbose", id = "request_verbose")]
    request_verbose: bool,

    #[arg(short = 'u', long)]
    user_prompt: Option<String>,

    #[arg(short = 's', long)]
    system_prompt: Option<String>,

    #[arg(long)]
    temperature: Option<f64>,

    #[arg(long)]
    top_p: Option<f64>,

    #[arg(long)]
    max_tokens: Option<u64>,

    /// Enable streaming (true/false, 1/0, yes/no)
    #[arg(long, value_name = "BOOL", value_parser = parse_truthy)]
    stream: Option<bool>,

    #[arg(long, value_parser = ["low", "medium", "high"])]
    reasoning_effort: Option<String>,

    /// Document to process (pipeline jobs)
    #[arg(long)]
    url: Option<String>,

    /// Extra job parameter; the value is parsed as JSON when possible
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Print the notification without sending it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init {
            path,
            pipeline,
            force,
        } => cmd_init(&path, pipeline, force),
        Commands::Run {
            once,
            inbox,
            action,
            state_dir,
            poll_interval,
        } => {
            let mut config = load_config(config_path)?;
            if let Some(inbox) = inbox {
                config.inbox_url = inbox;
            }
            if let Some(action) = action {
                config.action = action;
            }
            if let Some(dir) = state_dir {
                config.state_dir = dir;
            }
            if let Some(secs) = poll_interval {
                config.poll_interval_secs = secs;
            }
            config.validate()?;
            cmd_run(config, once).await
        }
        Commands::Send(args) => cmd_send(config_path, args).await,
        Commands::Seen { list } => cmd_seen(config_path, list).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    OrchestratorConfig::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })
}

fn cmd_init(path: &Path, pipeline: bool, force: bool) -> Result<()> {
    let target = path.join(CONFIG_FILE_NAME);
    if target.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", target.display());
    }

    let config = if pipeline {
        OrchestratorConfig {
            action: "index".to_string(),
            strategy: StrategyConfig::default_pipeline(),
            ..OrchestratorConfig::default()
        }
    } else {
        OrchestratorConfig::default()
    };
    config
        .save(&target)
        .with_context(|| format!("Failed to write {}", target.display()))?;

    println!("Created {}", target.display());
    println!("  inbox:  {}", config.inbox_url);
    println!("  action: {}", config.action);
    println!("  state:  {}", config.state_dir.display());
    Ok(())
}

async fn cmd_run(config: OrchestratorConfig, once: bool) -> Result<()> {
    let mailbox = HttpMailbox::new(config.inbox_url.clone(), config.http_timeout())?;
    let executor = ProcessExecutor::new().with_timeout(config.stage_timeout());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut orchestrator = Orchestrator::new(config, mailbox, executor)
        .await
        .context("Failed to initialize orchestrator state")?
        .with_shutdown(shutdown_rx);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    if once {
        let report = orchestrator
            .poll_once()
            .await
            .context("Failed to poll inbox")?;
        println!(
            "fetched {}, already seen {}, ignored {}, succeeded {}, failed {}, interrupted {}",
            report.fetched,
            report.skipped_seen,
            report.ignored,
            report.succeeded,
            report.failed,
            report.interrupted
        );
        if report.unmarked > 0 {
            warn!("{} finished job(s) could not be recorded as seen", report.unmarked);
        }
        return Ok(());
    }

    orchestrator.run().await?;
    Ok(())
}

async fn cmd_send(config_path: Option<&Path>, args: SendArgs) -> Result<()> {
    let inbox = match &args.inbox {
        Some(inbox) => inbox.clone(),
        None => load_config(config_path)?.inbox_url,
    };
    let action = args.action.clone();
    let actor = args.actor.clone();
    let job = job_from_args(args)?;

    if job.dry_run {
        let activity = create_activity(&actor, &action, job.descriptor);
        println!("{}", serde_json::to_string_pretty(&activity)?);
        return Ok(());
    }

    let mailbox = HttpMailbox::new(inbox.clone(), Duration::from_secs(30))?;
    let activity = send_job(&mailbox, &actor, &action, job.descriptor)
        .await
        .with_context(|| format!("Failed to send notification to {}", inbox))?;

    println!("{}", serde_json::to_string_pretty(&activity)?);
    println!("Sent {} to {}", activity.id, inbox);
    Ok(())
}

struct SendJob {
    descriptor: JobDescriptor,
    dry_run: bool,
}

/// Only the flags actually given become job parameters, in flag order
fn job_from_args(args: SendArgs) -> Result<SendJob> {
    let mut job = JobDescriptor::new();

    let strings = [
        ("provider", args.provider),
        ("model", args.model),
        ("base_url", args.base_url),
        ("hf_subpath", args.hf_subpath),
    ];
    for (key, value) in strings {
        if let Some(value) = value {
            job.insert(key, Value::String(value));
        }
    }

    let switches = [
        ("list_models", args.list_models),
        ("json_output", args.json_output),
        ("verbose", args.request_verbose),
    ];
    for (key, on) in switches {
        if on {
            job.insert(key, Value::Bool(true));
        }
    }

    if let Some(prompt) = args.user_prompt {
        job.insert("user_prompt", Value::String(prompt));
    }
    if let Some(prompt) = args.system_prompt {
        job.insert("system_prompt", Value::String(prompt));
    }
    if let Some(t) = args.temperature {
        job.insert("temperature", json!(t));
    }
    if let Some(p) = args.top_p {
        job.insert("top_p", json!(p));
    }
    if let Some(n) = args.max_tokens {
        job.insert("max_tokens", json!(n));
    }
    if args.stream == Some(true) {
        job.insert("stream", Value::Bool(true));
    }
    if let Some(effort) = args.reasoning_effort {
        job.insert("reasoning_effort", Value::String(effort));
    }
    if let Some(url) = args.url {
        job.insert("url", Value::String(url));
    }

    for raw in &args.params {
        let (key, value) = parse_param(raw)?;
        job.insert(key, value);
    }

    Ok(SendJob {
        descriptor: job,
        dry_run: args.dry_run,
    })
}

fn parse_truthy(raw: &str) -> std::result::Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(format!("expected true or false, got '{}'", other)),
    }
}

async fn cmd_seen(config_path: Option<&Path>, list: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let path = config.seen_log_path();
    let store = DedupStore::read_only(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    println!("{} message(s) seen ({})", store.len(), path.display());
    if list {
        let mut fingerprints: Vec<_> = store.iter().collect();
        fingerprints.sort();
        for fp in fingerprints {
            println!("{}", fp);
        }
    }
    Ok(())
}
