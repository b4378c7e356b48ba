//! # Adapters
//!
//! Upstream content producers behind one uniform contract.
//!
//! Every adapter turns its upstream system (a code host, a wiki, a ticket
//! tracker, a chat service, local folders) into a flat snapshot of
//! [`SourceFile`]s. The reconciler depends only on the [`Adapter`] trait:
//! a returned snapshot is authoritative for that adapter, and per-item
//! upstream failures are logged and skipped inside the adapter rather than
//! failing the whole fetch.

pub mod confluence;
pub mod error;
pub mod github;
mod html;
mod http;
pub mod jira;
pub mod local;
pub mod slack;

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use config::Config;
use tokio_util::sync::CancellationToken;

pub use error::{AdapterError, AdapterResult};

/// A logical file produced by an adapter.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Source-relative logical path; stable across runs for the same
    /// artifact.
    pub path: String,
    pub content: Vec<u8>,
    /// Lowercase SHA-256 hex over `content`; the sole change signal.
    pub fingerprint: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    /// Tag naming the producing adapter.
    pub source: String,
    /// Target knowledge base, chosen per file from the adapter's mapping
    /// table. May be empty when a process-wide fallback is configured.
    pub knowledge_id: String,
}

impl SourceFile {
    pub fn new(
        path: impl Into<String>,
        content: Vec<u8>,
        modified_at: DateTime<Utc>,
        source: impl Into<String>,
        knowledge_id: impl Into<String>,
    ) -> Self {
        let fingerprint = utils::fingerprint_bytes(&content);
        let size = content.len() as u64;
        Self {
            path: path.into(),
            content,
            fingerprint,
            size,
            modified_at,
            source: source.into(),
            knowledge_id: knowledge_id.into(),
        }
    }

    pub fn basename(&self) -> &str {
        utils::basename(&self.path)
    }
}

/// The uniform producer contract the reconciler consumes.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the complete current snapshot of this adapter's files.
    async fn fetch_files(&self, cancel: &CancellationToken) -> AdapterResult<Vec<SourceFile>>;

    fn last_sync(&self) -> DateTime<Utc>;

    fn set_last_sync(&self, at: DateTime<Utc>);
}

/// Observable, settable last-sync timestamp shared by all adapters.
#[derive(Debug)]
pub struct SyncStamp(RwLock<DateTime<Utc>>);

impl SyncStamp {
    /// Starts one day in the past, matching the widest default fetch window.
    pub fn new() -> Self {
        Self(RwLock::new(Utc::now() - Duration::hours(24)))
    }

    pub fn get(&self) -> DateTime<Utc> {
        *self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Default for SyncStamp {
    fn default() -> Self {
        Self::new()
    }
}

/// Construct every enabled adapter, in the declared sync order.
///
/// Constructor-time misconfiguration (missing credential, empty mapping
/// table) is fatal here; upstream availability is not checked until the
/// first fetch.
pub fn build_enabled(
    config: &Config,
    storage_root: &Path,
) -> AdapterResult<Vec<Arc<dyn Adapter>>> {
    let mut adapters: Vec<Arc<dyn Adapter>> = Vec::new();

    if config.github.enabled {
        adapters.push(Arc::new(github::GithubAdapter::new(
            &config.github,
            &config.retry,
        )?));
    }
    if config.confluence.enabled {
        adapters.push(Arc::new(confluence::ConfluenceAdapter::new(
            &config.confluence,
            &config.retry,
        )?));
    }
    if config.local_folders.enabled {
        adapters.push(Arc::new(local::LocalFolderAdapter::new(
            &config.local_folders,
        )?));
    }
    if config.slack.enabled {
        adapters.push(Arc::new(slack::SlackAdapter::new(
            &config.slack,
            &config.retry,
            storage_root,
        )?));
    }
    if config.jira.enabled {
        adapters.push(Arc::new(jira::JiraAdapter::new(
            &config.jira,
            &config.retry,
        )?));
    }

    Ok(adapters)
}
