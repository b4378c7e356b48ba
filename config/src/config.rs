//! Configuration structures for every component of the synchronizer.
//!
//! All structures deserialize from the YAML config file with serde and
//! carry defaults so a partial file is valid. Mapping tables bind an
//! upstream selector (repository, space, parent page, project, channel,
//! folder) to the knowledge base its files belong to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
    pub openwebui: OpenWebUiConfig,
    pub github: GithubConfig,
    pub confluence: ConfluenceConfig,
    pub jira: JiraConfig,
    pub local_folders: LocalFolderConfig,
    pub slack: SlackConfig,
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
            openwebui: OpenWebUiConfig::default(),
            github: GithubConfig::default(),
            confluence: ConfluenceConfig::default(),
            jira: JiraConfig::default(),
            local_folders: LocalFolderConfig::default(),
            slack: SlackConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Every knowledge base id referenced by an enabled adapter's mapping
    /// table, plus the process-wide fallback when set. Drives the startup
    /// re-import.
    pub fn referenced_knowledge_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();

        if !self.openwebui.knowledge_id.is_empty() {
            ids.insert(self.openwebui.knowledge_id.clone());
        }
        if self.github.enabled {
            ids.extend(
                self.github
                    .mappings
                    .iter()
                    .map(|m| m.knowledge_id.clone()),
            );
        }
        if self.confluence.enabled {
            ids.extend(
                self.confluence
                    .space_mappings
                    .iter()
                    .map(|m| m.knowledge_id.clone()),
            );
            ids.extend(
                self.confluence
                    .parent_page_mappings
                    .iter()
                    .map(|m| m.knowledge_id.clone()),
            );
        }
        if self.jira.enabled {
            ids.extend(self.jira.mappings.iter().map(|m| m.knowledge_id.clone()));
        }
        if self.local_folders.enabled {
            ids.extend(
                self.local_folders
                    .mappings
                    .iter()
                    .map(|m| m.knowledge_id.clone()),
            );
        }
        if self.slack.enabled {
            ids.extend(
                self.slack
                    .channel_mappings
                    .iter()
                    .map(|m| m.knowledge_id.clone()),
            );
            ids.extend(
                self.slack
                    .regex_patterns
                    .iter()
                    .map(|p| p.knowledge_id.clone()),
            );
        }

        ids.retain(|id| !id.is_empty());
        ids
    }
}

/// Sync cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minutes between reconciliation cycles.
    pub interval_minutes: u64,
    /// Upper bound on a single cycle.
    pub cycle_timeout_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            cycle_timeout_minutes: 30,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_minutes * 60)
    }
}

/// Local storage root for the file index and per-file snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/data"),
        }
    }
}

/// Downstream endpoint and credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenWebUiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Process-wide fallback knowledge base for files whose adapter did not
    /// assign one. Empty means no fallback.
    pub knowledge_id: String,
}

impl Default for OpenWebUiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            knowledge_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryMapping {
    /// `owner/repo`.
    pub repository: String,
    pub knowledge_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GithubConfig {
    pub enabled: bool,
    pub token: String,
    pub mappings: Vec<RepositoryMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceMapping {
    pub space_key: String,
    pub knowledge_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtreeMapping {
    pub parent_page_id: String,
    pub knowledge_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub enabled: bool,
    pub base_url: String,
    pub username: String,
    pub api_key: String,
    pub space_mappings: Vec<SpaceMapping>,
    pub parent_page_mappings: Vec<SubtreeMapping>,
    /// Page size for paginated space listings.
    pub page_limit: u32,
    pub include_attachments: bool,
    pub use_markdown: bool,
    pub include_blog_posts: bool,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            username: String::new(),
            api_key: String::new(),
            space_mappings: Vec::new(),
            parent_page_mappings: Vec::new(),
            page_limit: 100,
            include_attachments: true,
            use_markdown: false,
            include_blog_posts: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMapping {
    pub project_key: String,
    pub knowledge_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    pub enabled: bool,
    pub base_url: String,
    pub username: String,
    pub api_token: String,
    pub mappings: Vec<ProjectMapping>,
    /// Cap on issues fetched per project per cycle.
    pub issue_limit: u32,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            username: String::new(),
            api_token: String::new(),
            mappings: Vec::new(),
            issue_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderMapping {
    pub folder_path: PathBuf,
    pub knowledge_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LocalFolderConfig {
    pub enabled: bool,
    pub mappings: Vec<FolderMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMapping {
    pub channel_id: String,
    /// Display name; used for transcript filenames.
    pub channel_name: String,
    pub knowledge_id: String,
}

/// Regex-based channel discovery rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPattern {
    pub pattern: String,
    pub knowledge_id: String,
    #[serde(default)]
    pub auto_join: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub enabled: bool,
    pub token: String,
    pub channel_mappings: Vec<ChannelMapping>,
    pub regex_patterns: Vec<ChannelPattern>,
    /// How far back to fetch messages.
    pub days_to_fetch: u32,
    /// Accrete transcripts across runs instead of aging messages off.
    pub maintain_history: bool,
    /// Cap on messages per channel per run.
    pub message_limit: u32,
    pub include_threads: bool,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            channel_mappings: Vec::new(),
            regex_patterns: Vec::new(),
            days_to_fetch: 30,
            maintain_history: false,
            message_limit: 1000,
            include_threads: true,
        }
    }
}

/// Transport retry policy shared by the downstream client and adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}
