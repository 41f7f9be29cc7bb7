//! Persistent set of processed message fingerprints
//!
//! Stored as an append-only text file, one fingerprint per line. Loaded once
//! at startup; every `mark_seen` is a single durable append.

use ldn_core::{Fingerprint, LdnError, Result};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// The SeenSet: fingerprints whose processing attempt has completed
#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    seen: HashSet<Fingerprint>,
    /// File ends without a newline, so the next append must start one
    needs_newline: bool,
    read_only: bool,
}

impl DedupStore {
    /// Load the log at `path`, creating its parent directory if needed
    ///
    /// A final line that lacks its newline and does not parse is left over
    /// from an interrupted append. It is cut off with a warning. Any other
    /// bad line is a storage error.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                LdnError::Storage(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let Some(content) = read_log(&path).await? else {
            debug!("No seen log at {}, starting empty", path.display());
            return Ok(Self {
                path,
                seen: HashSet::new(),
                needs_newline: false,
                read_only: false,
            });
        };

        let (seen, torn_at) = parse_log(&path, &content)?;
        let mut needs_newline = !content.is_empty() && !content.ends_with('\n');

        if let Some(offset) = torn_at {
            truncate_to(&path, offset).await?;
            needs_newline = false;
        }

        info!("Loaded {} seen fingerprints from {}", seen.len(), path.display());
        Ok(Self {
            path,
            seen,
            needs_newline,
            read_only: false,
        })
    }

    /// Load the log for inspection without touching the filesystem
    ///
    /// No directory is created and a torn final entry is skipped in memory
    /// only. The returned store refuses `mark_seen`.
    pub async fn read_only(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let seen = match read_log(&path).await? {
            Some(content) => parse_log(&path, &content)?.0,
            None => HashSet::new(),
        };
        Ok(Self {
            path,
            seen,
            needs_newline: false,
            read_only: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Durably record `fingerprint`; `Ok(false)` if it was already recorded
    ///
    /// The in-memory set changes only after the append reached disk, so a
    /// failed write leaves the message eligible for another attempt.
    pub async fn mark_seen(&mut self, fingerprint: Fingerprint) -> Result<bool> {
        if self.seen.contains(&fingerprint) {
            return Ok(false);
        }
        if self.read_only {
            return Err(LdnError::Storage(format!(
                "{} was opened read-only",
                self.path.display()
            )));
        }

        let mut line = String::with_capacity(fingerprint.as_str().len() + 2);
        if self.needs_newline {
            line.push('\n');
        }
        line.push_str(fingerprint.as_str());
        line.push('\n');

        let storage = |e: std::io::Error| {
            LdnError::Storage(format!("Failed to append to {}: {}", self.path.display(), e))
        };
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(storage)?;
        file.write_all(line.as_bytes()).await.map_err(storage)?;
        file.flush().await.map_err(storage)?;
        file.sync_data().await.map_err(storage)?;

        self.needs_newline = false;
        debug!("Marked {} seen", fingerprint.short());
        self.seen.insert(fingerprint);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.seen.iter()
    }
}

/// Log content, or `None` if there is no log yet
async fn read_log(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LdnError::Storage(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Parse log content; returns the set and the byte offset of a torn tail
fn parse_log(path: &Path, content: &str) -> Result<(HashSet<Fingerprint>, Option<u64>)> {
    let mut seen = HashSet::new();
    let mut offset = 0usize;
    let mut lines = content.split_inclusive('\n').enumerate().peekable();

    while let Some((index, raw)) = lines.next() {
        let start = offset;
        offset += raw.len();

        let terminated = raw.ends_with('\n');
        let line = raw.trim_end_matches(['\n', '\r']).trim();
        if line.is_empty() {
            continue;
        }

        match Fingerprint::parse(line) {
            Ok(fp) => {
                seen.insert(fp);
            }
            Err(_) if !terminated && lines.peek().is_none() => {
                warn!(
                    "Discarding incomplete final entry in {} (interrupted write)",
                    path.display()
                );
                return Ok((seen, Some(start as u64)));
            }
            Err(_) => {
                return Err(LdnError::Storage(format!(
                    "Corrupt entry at {}:{}: {:?}",
                    path.display(),
                    index + 1,
                    line
                )));
            }
        }
    }

    Ok((seen, None))
}

async fn truncate_to(path: &Path, len: u64) -> Result<()> {
    let storage = |e: std::io::Error| {
        LdnError::Storage(format!("Failed to repair {}: {}", path.display(), e))
    };
    let file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(storage)?;
    file.set_len(len).await.map_err(storage)?;
    file.sync_all().await.map_err(storage)?;
    Ok(())
}
