//! Confluence adapter: spaces and page subtrees mapped to knowledge bases.
//!
//! Talks to the v2 REST API with cursor pagination. Page bodies arrive in
//! storage-format HTML and are shaped to plain text or Markdown before
//! upload.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::{ConfluenceConfig, RetryConfig, SpaceMapping, SubtreeMapping};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use utils::retry::{retry_with_backoff, RetryPolicy};

use crate::error::{AdapterError, AdapterResult};
use crate::html::{html_to_markdown, html_to_text};
use crate::http::send_checked;
use crate::{Adapter, SourceFile, SyncStamp};

pub struct ConfluenceAdapter {
    http: Client,
    base_url: String,
    username: String,
    api_key: String,
    space_mappings: Vec<SpaceMapping>,
    parent_page_mappings: Vec<SubtreeMapping>,
    page_limit: u32,
    include_attachments: bool,
    use_markdown: bool,
    include_blog_posts: bool,
    retry: RetryPolicy,
    last_sync: SyncStamp,
}

#[derive(Debug, Deserialize)]
struct SpaceList {
    #[serde(default)]
    results: Vec<Space>,
}

#[derive(Debug, Deserialize)]
struct Space {
    id: String,
    key: String,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageList {
    #[serde(default)]
    results: Vec<Page>,
    #[serde(default, rename = "_links")]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct Page {
    id: String,
    title: String,
    #[serde(default)]
    body: Option<PageBody>,
    #[serde(default)]
    version: Option<PageVersion>,
}

#[derive(Debug, Deserialize)]
struct PageBody {
    #[serde(default)]
    storage: Option<BodyValue>,
}

#[derive(Debug, Deserialize)]
struct BodyValue {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct PageVersion {
    #[serde(default, rename = "createdAt")]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChildList {
    #[serde(default)]
    results: Vec<ChildPage>,
    #[serde(default, rename = "_links")]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct ChildPage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AttachmentList {
    #[serde(default)]
    results: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    title: String,
    #[serde(default, rename = "downloadLink")]
    download_link: Option<String>,
}

impl ConfluenceAdapter {
    pub fn new(config: &ConfluenceConfig, retry: &RetryConfig) -> AdapterResult<Self> {
        if config.base_url.is_empty() || config.api_key.is_empty() {
            return Err(AdapterError::Configuration {
                message: "confluence base_url and api_key are required".to_string(),
            });
        }
        if config.space_mappings.is_empty() && config.parent_page_mappings.is_empty() {
            return Err(AdapterError::Configuration {
                message: "at least one confluence mapping must be configured".to_string(),
            });
        }

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_key: config.api_key.clone(),
            space_mappings: config.space_mappings.clone(),
            parent_page_mappings: config.parent_page_mappings.clone(),
            page_limit: config.page_limit.max(1),
            include_attachments: config.include_attachments,
            use_markdown: config.use_markdown,
            include_blog_posts: config.include_blog_posts,
            retry: RetryPolicy::new(
                retry.max_retries,
                retry.initial_backoff_ms,
                retry.max_backoff_ms,
            ),
            last_sync: SyncStamp::new(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<T> {
        retry_with_backoff(&self.retry, cancel, "confluence_get", || {
            let builder = self
                .http
                .get(url)
                .basic_auth(&self.username, Some(&self.api_key))
                .header("Accept", "application/json");
            async move {
                send_checked("confluence", builder, cancel)
                    .await?
                    .json()
                    .await
                    .map_err(AdapterError::Http)
            }
        })
        .await
    }

    async fn get_bytes(&self, url: &str, cancel: &CancellationToken) -> AdapterResult<Vec<u8>> {
        retry_with_backoff(&self.retry, cancel, "confluence_download", || {
            let builder = self
                .http
                .get(url)
                .basic_auth(&self.username, Some(&self.api_key));
            async move {
                let bytes = send_checked("confluence", builder, cancel)
                    .await?
                    .bytes()
                    .await?;
                Ok(bytes.to_vec())
            }
        })
        .await
    }

    async fn space_id(&self, space_key: &str, cancel: &CancellationToken) -> AdapterResult<String> {
        let url = format!(
            "{}/api/v2/spaces?keys={}",
            self.base_url,
            urlencoding::encode(space_key)
        );
        let list: SpaceList = self.get_json(&url, cancel).await?;
        list.results
            .into_iter()
            .find(|s| s.key == space_key)
            .map(|s| s.id)
            .ok_or_else(|| AdapterError::Api {
                adapter: "confluence".to_string(),
                status: 404,
                message: format!("space '{space_key}' not found"),
            })
    }

    /// All pages (or blog posts) of a space, following cursor pagination.
    async fn space_content(
        &self,
        space_id: &str,
        kind: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<Page>> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/api/v2/spaces/{space_id}/{kind}?body-format=storage&limit={}",
                self.base_url, self.page_limit
            );
            if let Some(ref c) = cursor {
                url.push_str(&format!("&cursor={}", urlencoding::encode(c)));
            }

            let list: PageList = self.get_json(&url, cancel).await?;
            pages.extend(list.results);

            cursor = extract_cursor(list.links.next.as_deref());
            if cursor.is_none() {
                break;
            }
        }

        Ok(pages)
    }

    async fn page_by_id(&self, page_id: &str, cancel: &CancellationToken) -> AdapterResult<Page> {
        let url = format!(
            "{}/api/v2/pages/{page_id}?body-format=storage",
            self.base_url
        );
        self.get_json(&url, cancel).await
    }

    async fn child_page_ids(
        &self,
        page_id: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/api/v2/pages/{page_id}/children?limit={}",
                self.base_url, self.page_limit
            );
            if let Some(ref c) = cursor {
                url.push_str(&format!("&cursor={}", urlencoding::encode(c)));
            }

            let list: ChildList = self.get_json(&url, cancel).await?;
            ids.extend(list.results.into_iter().map(|c| c.id));

            cursor = extract_cursor(list.links.next.as_deref());
            if cursor.is_none() {
                break;
            }
        }

        Ok(ids)
    }

    fn shape_page(&self, page: &Page, prefix: &str, knowledge_id: &str) -> SourceFile {
        let body_html = page
            .body
            .as_ref()
            .and_then(|b| b.storage.as_ref())
            .map(|s| s.value.as_str())
            .unwrap_or_default();

        let body = if self.use_markdown {
            html_to_markdown(body_html)
        } else {
            html_to_text(body_html)
        };
        let content = format!("# {}\n\n{}\n", page.title, body).into_bytes();

        let modified_at = page
            .version
            .as_ref()
            .and_then(|v| v.created_at.as_deref())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let filename = format!("{}.md", sanitize_filename(&page.title));
        SourceFile::new(
            format!("{prefix}/{filename}"),
            content,
            modified_at,
            "confluence",
            knowledge_id,
        )
    }

    async fn page_attachments(
        &self,
        page_id: &str,
        prefix: &str,
        knowledge_id: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<SourceFile>> {
        let url = format!("{}/api/v2/pages/{page_id}/attachments", self.base_url);
        let list: AttachmentList = self.get_json(&url, cancel).await?;

        let mut files = Vec::new();
        for attachment in list.results {
            let Some(link) = attachment.download_link.as_deref() else {
                continue;
            };
            let download_url = format!("{}{}", site_root(&self.base_url), link);
            match self.get_bytes(&download_url, cancel).await {
                Ok(content) => {
                    let filename = sanitize_filename(&attachment.title);
                    files.push(SourceFile::new(
                        format!("{prefix}/attachments/{filename}"),
                        content,
                        Utc::now(),
                        "confluence",
                        knowledge_id,
                    ));
                }
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(page_id, attachment = %attachment.title, error = %e, "Failed to download attachment");
                }
            }
        }

        Ok(files)
    }

    async fn fetch_space(
        &self,
        mapping: &SpaceMapping,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<SourceFile>> {
        let space_id = self.space_id(&mapping.space_key, cancel).await?;
        let mut files = Vec::new();

        let mut pages = self.space_content(&space_id, "pages", cancel).await?;
        if self.include_blog_posts {
            match self.space_content(&space_id, "blogposts", cancel).await {
                Ok(posts) => pages.extend(posts),
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(space = %mapping.space_key, error = %e, "Failed to fetch blog posts");
                }
            }
        }

        for page in &pages {
            files.push(self.shape_page(page, &mapping.space_key, &mapping.knowledge_id));
            if self.include_attachments {
                match self
                    .page_attachments(&page.id, &mapping.space_key, &mapping.knowledge_id, cancel)
                    .await
                {
                    Ok(attachments) => files.extend(attachments),
                    Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                    Err(e) => {
                        warn!(page_id = %page.id, error = %e, "Failed to list attachments");
                    }
                }
            }
        }

        Ok(files)
    }

    /// A parent page and every descendant, depth first.
    async fn fetch_subtree(
        &self,
        mapping: &SubtreeMapping,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<SourceFile>> {
        let prefix = format!("pages/{}", mapping.parent_page_id);
        let mut files = Vec::new();
        let mut pending = vec![mapping.parent_page_id.clone()];

        while let Some(page_id) = pending.pop() {
            let page = match self.page_by_id(&page_id, cancel).await {
                Ok(page) => page,
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(page_id, error = %e, "Failed to fetch page, skipping subtree node");
                    continue;
                }
            };

            files.push(self.shape_page(&page, &prefix, &mapping.knowledge_id));
            if self.include_attachments {
                match self
                    .page_attachments(&page.id, &prefix, &mapping.knowledge_id, cancel)
                    .await
                {
                    Ok(attachments) => files.extend(attachments),
                    Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                    Err(e) => {
                        warn!(page_id = %page.id, error = %e, "Failed to list attachments");
                    }
                }
            }

            match self.child_page_ids(&page_id, cancel).await {
                Ok(children) => pending.extend(children),
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(page_id, error = %e, "Failed to list child pages");
                }
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl Adapter for ConfluenceAdapter {
    fn name(&self) -> &str {
        "confluence"
    }

    async fn fetch_files(&self, cancel: &CancellationToken) -> AdapterResult<Vec<SourceFile>> {
        let mut files = Vec::new();

        for mapping in &self.space_mappings {
            match self.fetch_space(mapping, cancel).await {
                Ok(space_files) => {
                    debug!(
                        space = %mapping.space_key,
                        count = space_files.len(),
                        "Fetched space content"
                    );
                    files.extend(space_files);
                }
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(space = %mapping.space_key, error = %e, "Failed to fetch space, skipping");
                }
            }
        }

        for mapping in &self.parent_page_mappings {
            match self.fetch_subtree(mapping, cancel).await {
                Ok(subtree_files) => {
                    debug!(
                        parent_page = %mapping.parent_page_id,
                        count = subtree_files.len(),
                        "Fetched page subtree"
                    );
                    files.extend(subtree_files);
                }
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(parent_page = %mapping.parent_page_id, error = %e, "Failed to fetch subtree, skipping");
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

/// Pull the `cursor` parameter out of a `_links.next` URL.
fn extract_cursor(next: Option<&str>) -> Option<String> {
    let next = next?;
    let (_, after) = next.split_once("cursor=")?;
    let cursor = after.split('&').next().unwrap_or(after);
    urlencoding::decode(cursor).ok().map(|c| c.into_owned())
}

/// The scheme+host portion of the configured base URL, for download links
/// that are site-root relative.
fn site_root(base_url: &str) -> &str {
    match base_url.find("://") {
        Some(scheme_end) => match base_url[scheme_end + 3..].find('/') {
            Some(path_start) => &base_url[..scheme_end + 3 + path_start],
            None => base_url,
        },
        None => base_url,
    }
}

fn sanitize_filename(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_dash = false;
    for ch in title.trim().chars() {
        let mapped = match ch {
            c if c.is_alphanumeric() => Some(c),
            '.' | '_' | '-' => Some(ch),
            ' ' => Some('-'),
            _ => None,
        };
        match mapped {
            Some('-') => {
                if !last_dash {
                    out.push('-');
                }
                last_dash = true;
            }
            Some(c) => {
                out.push(c);
                last_dash = false;
            }
            None => {}
        }
    }
    let out = out.trim_matches('-').to_string();
    if out.is_empty() {
        "untitled".to_string()
    } else {
        out.chars().take(120).collect()
    }
}
