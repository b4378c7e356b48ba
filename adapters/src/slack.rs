//! Slack adapter: channel transcripts mapped to knowledge bases.
//!
//! Channels come from static mappings plus regex discovery over the channel
//! list. Each channel's recent history (optionally with thread replies) is
//! flattened into one Markdown transcript per cycle; with
//! `maintain_history`, previously seen messages are merged back in from a
//! JSON store so the transcript accretes instead of aging off.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use config::{ChannelMapping, RetryConfig, SlackConfig};
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utils::retry::{retry_with_backoff, RetryPolicy};

use crate::error::{AdapterError, AdapterResult};
use crate::http::send_checked;
use crate::{Adapter, SourceFile, SyncStamp};

const DEFAULT_API_BASE: &str = "https://slack.com/api";
const PAGE_SIZE: u32 = 200;

/// Join failures that will never succeed on retry for this channel.
const PERMANENT_JOIN_ERRORS: &[&str] = &[
    "is_archived",
    "channel_not_found",
    "method_not_supported_for_channel_type",
    "cant_invite_self",
];

struct CompiledPattern {
    regex: Regex,
    knowledge_id: String,
    auto_join: bool,
}

pub struct SlackAdapter {
    http: Client,
    token: String,
    api_base: String,
    channel_mappings: Vec<ChannelMapping>,
    patterns: Vec<CompiledPattern>,
    days_to_fetch: u32,
    maintain_history: bool,
    message_limit: u32,
    include_threads: bool,
    history_dir: PathBuf,
    retry: RetryPolicy,
    last_sync: SyncStamp,
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channels: Vec<ChannelInfo>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_member: bool,
    #[serde(default)]
    is_archived: bool,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    ts: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    reply_count: Option<u32>,
    #[serde(default)]
    subtype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JoinResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// A message as persisted in the per-channel history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMessage {
    ts: String,
    user: String,
    text: String,
    #[serde(default)]
    replies: Vec<StoredReply>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredReply {
    ts: String,
    user: String,
    text: String,
}

impl SlackAdapter {
    pub fn new(
        config: &SlackConfig,
        retry: &RetryConfig,
        storage_root: &Path,
    ) -> AdapterResult<Self> {
        if config.token.is_empty() {
            return Err(AdapterError::Configuration {
                message: "slack token is required".to_string(),
            });
        }
        if config.channel_mappings.is_empty() && config.regex_patterns.is_empty() {
            return Err(AdapterError::Configuration {
                message: "at least one slack channel mapping or pattern must be configured"
                    .to_string(),
            });
        }

        let mut patterns = Vec::with_capacity(config.regex_patterns.len());
        for pattern in &config.regex_patterns {
            let regex = Regex::new(&pattern.pattern).map_err(|e| AdapterError::Pattern {
                pattern: pattern.pattern.clone(),
                message: e.to_string(),
            })?;
            patterns.push(CompiledPattern {
                regex,
                knowledge_id: pattern.knowledge_id.clone(),
                auto_join: pattern.auto_join,
            });
        }

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            token: config.token.clone(),
            api_base: DEFAULT_API_BASE.to_string(),
            channel_mappings: config.channel_mappings.clone(),
            patterns,
            days_to_fetch: config.days_to_fetch.max(1),
            maintain_history: config.maintain_history,
            message_limit: config.message_limit.max(1),
            include_threads: config.include_threads,
            history_dir: storage_root.join("slack_history"),
            retry: RetryPolicy::new(
                retry.max_retries,
                retry.initial_backoff_ms,
                retry.max_backoff_ms,
            ),
            last_sync: SyncStamp::new(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method_name: &str,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> AdapterResult<T> {
        let url = format!("{}/{method_name}", self.api_base);
        retry_with_backoff(&self.retry, cancel, method_name, || {
            let builder = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .query(params);
            async move {
                send_checked("slack", builder, cancel)
                    .await?
                    .json()
                    .await
                    .map_err(AdapterError::Http)
            }
        })
        .await
    }

    /// Static mappings first, then regex discovery over the channel list.
    async fn resolve_channels(
        &self,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<ChannelMapping>> {
        let mut channels = self.channel_mappings.clone();

        if !self.patterns.is_empty() {
            match self.discover_channels(&channels, cancel).await {
                Ok(discovered) => {
                    if !discovered.is_empty() {
                        info!(count = discovered.len(), "Discovered channels by pattern");
                    }
                    channels.extend(discovered);
                }
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(error = %e, "Channel discovery failed, using static mappings only");
                }
            }
        }

        Ok(channels)
    }

    async fn discover_channels(
        &self,
        known: &[ChannelMapping],
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<ChannelMapping>> {
        let mut discovered = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut params = vec![
                ("types", "public_channel".to_string()),
                ("exclude_archived", "true".to_string()),
                ("limit", PAGE_SIZE.to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }

            let response: ChannelListResponse =
                self.call("conversations.list", &params, cancel).await?;
            check_ok("conversations.list", response.ok, response.error)?;

            for channel in response.channels {
                if channel.is_archived
                    || known.iter().any(|m| m.channel_id == channel.id)
                    || discovered
                        .iter()
                        .any(|m: &ChannelMapping| m.channel_id == channel.id)
                {
                    continue;
                }

                let Some(pattern) = self
                    .patterns
                    .iter()
                    .find(|p| p.regex.is_match(&channel.name))
                else {
                    continue;
                };

                if pattern.auto_join && !channel.is_member {
                    self.join_channel(&channel, cancel).await;
                }

                debug!(channel = %channel.name, knowledge_id = %pattern.knowledge_id, "Channel matched pattern");
                discovered.push(ChannelMapping {
                    channel_id: channel.id.clone(),
                    channel_name: channel.name.clone(),
                    knowledge_id: pattern.knowledge_id.clone(),
                });
            }

            cursor = response
                .response_metadata
                .map(|m| m.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                break;
            }
        }

        Ok(discovered)
    }

    async fn join_channel(&self, channel: &ChannelInfo, cancel: &CancellationToken) {
        let url = format!("{}/conversations.join", self.api_base);
        let result: AdapterResult<JoinResponse> =
            retry_with_backoff(&self.retry, cancel, "conversations.join", || {
                let builder = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.token)
                    .form(&[("channel", channel.id.as_str())]);
                async move {
                    send_checked("slack", builder, cancel)
                        .await?
                        .json()
                        .await
                        .map_err(AdapterError::Http)
                }
            })
            .await;

        match result {
            Ok(response) if response.ok => {
                info!(channel = %channel.name, "Joined channel");
            }
            Ok(response) => {
                let error = response.error.unwrap_or_default();
                if PERMANENT_JOIN_ERRORS.contains(&error.as_str()) {
                    debug!(channel = %channel.name, error, "Channel cannot be joined");
                } else {
                    warn!(channel = %channel.name, error, "Failed to join channel");
                }
            }
            Err(e) => {
                warn!(channel = %channel.name, error = %e, "Failed to join channel");
            }
        }
    }

    async fn fetch_channel_messages(
        &self,
        channel_id: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<StoredMessage>> {
        let oldest = Utc::now() - Duration::days(i64::from(self.days_to_fetch));
        let oldest_ts = format!("{}.000000", oldest.timestamp());

        let mut raw_messages: Vec<RawMessage> = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut params = vec![
                ("channel", channel_id.to_string()),
                ("oldest", oldest_ts.clone()),
                ("limit", PAGE_SIZE.to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }

            let response: HistoryResponse =
                self.call("conversations.history", &params, cancel).await?;
            check_ok("conversations.history", response.ok, response.error)?;
            raw_messages.extend(response.messages);

            if raw_messages.len() as u32 >= self.message_limit {
                raw_messages.truncate(self.message_limit as usize);
                break;
            }

            cursor = response
                .response_metadata
                .map(|m| m.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                break;
            }
        }

        let mut messages = Vec::with_capacity(raw_messages.len());
        for raw in raw_messages {
            // Joins, leaves, and similar housekeeping carry a subtype.
            if raw.subtype.is_some() || raw.text.is_empty() {
                continue;
            }

            let replies = if self.include_threads
                && raw.reply_count.unwrap_or(0) > 0
                && raw.thread_ts.as_deref() == Some(raw.ts.as_str())
            {
                match self.fetch_thread_replies(channel_id, &raw.ts, cancel).await {
                    Ok(replies) => replies,
                    Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                    Err(e) => {
                        warn!(channel_id, thread_ts = %raw.ts, error = %e, "Failed to fetch thread replies");
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };

            messages.push(StoredMessage {
                ts: raw.ts,
                user: raw.user.unwrap_or_default(),
                text: raw.text,
                replies,
            });
        }

        Ok(messages)
    }

    async fn fetch_thread_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<StoredReply>> {
        let params = [
            ("channel", channel_id.to_string()),
            ("ts", thread_ts.to_string()),
            ("limit", PAGE_SIZE.to_string()),
        ];
        let response: HistoryResponse =
            self.call("conversations.replies", &params, cancel).await?;
        check_ok("conversations.replies", response.ok, response.error)?;

        Ok(response
            .messages
            .into_iter()
            // The parent message leads the reply listing.
            .filter(|m| m.ts != thread_ts && !m.text.is_empty())
            .map(|m| StoredReply {
                ts: m.ts,
                user: m.user.unwrap_or_default(),
                text: m.text,
            })
            .collect())
    }

    fn history_path(&self, channel_id: &str) -> PathBuf {
        self.history_dir.join(format!("{channel_id}.json"))
    }

    fn load_history(&self, channel_id: &str) -> Vec<StoredMessage> {
        let path = self.history_path(channel_id);
        if !path.exists() {
            return Vec::new();
        }
        match std::fs::read(&path)
            .map_err(AdapterError::Io)
            .and_then(|data| serde_json::from_slice(&data).map_err(AdapterError::Serialization))
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(channel_id, error = %e, "Failed to load channel history, starting fresh");
                Vec::new()
            }
        }
    }

    fn save_history(&self, channel_id: &str, messages: &[StoredMessage]) -> AdapterResult<()> {
        std::fs::create_dir_all(&self.history_dir)?;
        let data = serde_json::to_vec_pretty(messages)?;
        std::fs::write(self.history_path(channel_id), data)?;
        Ok(())
    }

    async fn fetch_channel(
        &self,
        mapping: &ChannelMapping,
        cancel: &CancellationToken,
    ) -> AdapterResult<SourceFile> {
        let fetched = self
            .fetch_channel_messages(&mapping.channel_id, cancel)
            .await?;

        let messages = if self.maintain_history {
            let mut merged: BTreeMap<String, StoredMessage> = self
                .load_history(&mapping.channel_id)
                .into_iter()
                .map(|m| (m.ts.clone(), m))
                .collect();
            for message in fetched {
                merged.insert(message.ts.clone(), message);
            }
            let merged: Vec<StoredMessage> = merged.into_values().collect();
            if let Err(e) = self.save_history(&mapping.channel_id, &merged) {
                warn!(channel_id = %mapping.channel_id, error = %e, "Failed to persist channel history");
            }
            merged
        } else {
            let mut sorted = fetched;
            sorted.sort_by(|a, b| a.ts.cmp(&b.ts));
            sorted
        };

        let modified_at = messages
            .last()
            .and_then(|m| parse_slack_ts(&m.ts))
            .unwrap_or_else(Utc::now);

        let name = sanitize_channel_name(&mapping.channel_name);
        let content = render_transcript(&mapping.channel_name, &messages);

        Ok(SourceFile::new(
            format!("slack/{name}.md"),
            content.into_bytes(),
            modified_at,
            "slack",
            &mapping.knowledge_id,
        ))
    }
}

#[async_trait]
impl Adapter for SlackAdapter {
    fn name(&self) -> &str {
        "slack"
    }

    async fn fetch_files(&self, cancel: &CancellationToken) -> AdapterResult<Vec<SourceFile>> {
        let channels = self.resolve_channels(cancel).await?;
        let mut files = Vec::with_capacity(channels.len());

        for mapping in &channels {
            match self.fetch_channel(mapping, cancel).await {
                Ok(file) => {
                    debug!(channel = %mapping.channel_name, "Rendered channel transcript");
                    files.push(file);
                }
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(channel = %mapping.channel_name, error = %e, "Failed to fetch channel, skipping");
                }
            }
        }

        Ok(files)
    }

    fn last_sync(&self) -> DateTime<Utc> {
        self.last_sync.get()
    }

    fn set_last_sync(&self, at: DateTime<Utc>) {
        self.last_sync.set(at);
    }
}

fn check_ok(method_name: &str, ok: bool, error: Option<String>) -> AdapterResult<()> {
    if ok {
        return Ok(());
    }
    let error = error.unwrap_or_else(|| "unknown_error".to_string());
    match error.as_str() {
        "ratelimited" | "rate_limited" => Err(AdapterError::RateLimited {
            retry_after_seconds: 60,
        }),
        "invalid_auth" | "account_inactive" | "token_revoked" | "not_authed" => {
            Err(AdapterError::Authentication {
                adapter: "slack".to_string(),
                message: error,
            })
        }
        _ => Err(AdapterError::Api {
            adapter: "slack".to_string(),
            status: 200,
            message: format!("{method_name}: {error}"),
        }),
    }
}

/// Slack timestamps are `<unix seconds>.<sequence>`.
fn parse_slack_ts(ts: &str) -> Option<DateTime<Utc>> {
    let seconds = ts.split('.').next()?.parse::<i64>().ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

fn sanitize_channel_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-').to_string();
    if cleaned.is_empty() {
        "channel".to_string()
    } else {
        cleaned
    }
}

fn render_transcript(channel_name: &str, messages: &[StoredMessage]) -> String {
    let mut out = format!("# #{channel_name}\n");
    let mut current_day = String::new();

    for message in messages {
        let Some(at) = parse_slack_ts(&message.ts) else {
            continue;
        };

        let day = at.format("%Y-%m-%d").to_string();
        if day != current_day {
            out.push_str(&format!("\n## {day}\n\n"));
            current_day = day;
        }

        out.push_str(&format!(
            "- [{}] {}: {}\n",
            at.format("%H:%M"),
            message.user,
            message.text.replace('\n', " ")
        ));
        for reply in &message.replies {
            if let Some(reply_at) = parse_slack_ts(&reply.ts) {
                out.push_str(&format!(
                    "    - [{}] {}: {}\n",
                    reply_at.format("%H:%M"),
                    reply.user,
                    reply.text.replace('\n', " ")
                ));
            }
        }
    }

    out
}
