//! GitHub adapter: repository contents mapped to knowledge bases.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::{GithubConfig, RepositoryMapping, RetryConfig};
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use utils::retry::{retry_with_backoff, RetryPolicy};

use crate::error::{AdapterError, AdapterResult};
use crate::http::send_checked;
use crate::{Adapter, SourceFile, SyncStamp};

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Extensions treated as text content worth syncing.
const TEXT_EXTENSIONS: &[&str] = &[
    "md", "txt", "json", "yaml", "yml", "toml", "go", "py", "js", "ts", "java", "cpp", "c", "h",
    "hpp", "cs", "php", "rb", "rs", "swift", "kt", "scala", "sh", "bash", "zsh", "fish", "ps1",
    "sql", "xml", "html", "css", "scss", "sass", "less", "dockerfile", "gitignore",
    "gitattributes", "editorconfig", "env",
];

pub struct GithubAdapter {
    http: Client,
    token: String,
    api_base: String,
    mappings: Vec<RepositoryMapping>,
    retry: RetryPolicy,
    last_sync: SyncStamp,
}

/// One entry of a `/contents` listing.
#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    download_url: Option<String>,
}

impl GithubAdapter {
    pub fn new(config: &GithubConfig, retry: &RetryConfig) -> AdapterResult<Self> {
        if config.token.is_empty() {
            return Err(AdapterError::Configuration {
                message: "github token is required".to_string(),
            });
        }
        if config.mappings.is_empty() {
            return Err(AdapterError::Configuration {
                message: "at least one repository mapping must be configured".to_string(),
            });
        }

        let http = Client::builder()
            .user_agent("openwebui-sync")
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            token: config.token.clone(),
            api_base: DEFAULT_API_BASE.to_string(),
            mappings: config.mappings.clone(),
            retry: RetryPolicy::new(
                retry.max_retries,
                retry.initial_backoff_ms,
                retry.max_backoff_ms,
            ),
            last_sync: SyncStamp::new(),
        })
    }

    async fn list_dir(
        &self,
        owner: &str,
        repo: &str,
        dir: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<ContentEntry>> {
        let url = format!("{}/repos/{owner}/{repo}/contents/{dir}", self.api_base);
        retry_with_backoff(&self.retry, cancel, "github_list_dir", || {
            let builder = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .header("Accept", "application/vnd.github+json");
            async move {
                send_checked("github", builder, cancel)
                    .await?
                    .json()
                    .await
                    .map_err(AdapterError::Http)
            }
        })
        .await
    }

    async fn download(
        &self,
        entry: &ContentEntry,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<u8>> {
        let url = entry
            .download_url
            .clone()
            .ok_or_else(|| AdapterError::Api {
                adapter: "github".to_string(),
                status: 0,
                message: format!("no download URL for {}", entry.path),
            })?;

        retry_with_backoff(&self.retry, cancel, "github_download", || {
            let builder = self.http.get(&url).bearer_auth(&self.token);
            async move {
                let bytes = send_checked("github", builder, cancel).await?.bytes().await?;
                Ok(bytes.to_vec())
            }
        })
        .await
    }

    async fn fetch_repository(
        &self,
        owner: &str,
        repo: &str,
        knowledge_id: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<SourceFile>> {
        let mut files = Vec::new();
        let mut pending_dirs = vec![String::new()];

        while let Some(dir) = pending_dirs.pop() {
            let entries = self.list_dir(owner, repo, &dir, cancel).await?;
            for entry in entries {
                match entry.entry_type.as_str() {
                    "dir" => pending_dirs.push(entry.path),
                    "file" if is_text_file(&entry.name) => {
                        match self.download(&entry, cancel).await {
                            Ok(content) => {
                                files.push(SourceFile::new(
                                    entry.path,
                                    content,
                                    // The contents API does not expose a
                                    // modification time.
                                    Utc::now(),
                                    "github",
                                    knowledge_id,
                                ));
                            }
                            Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                            Err(e) => {
                                warn!(repo, path = %entry.path, error = %e, "Failed to download file");
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl Adapter for GithubAdapter {
    fn name(&self) -> &str {
        "github"
    }

    async fn fetch_files(&self, cancel: &CancellationToken) -> AdapterResult<Vec<SourceFile>> {
        let mut files = Vec::new();

        for mapping in &self.mappings {
            let Some((owner, repo)) = mapping.repository.split_once('/') else {
                warn!(repository = %mapping.repository, "Invalid repository format, expected owner/repo");
                continue;
            };

            match self
                .fetch_repository(owner, repo, &mapping.knowledge_id, cancel)
                .await
            {
                Ok(repo_files) => {
                    debug!(
                        repository = %mapping.repository,
                        count = repo_files.len(),
                        knowledge_id = %mapping.knowledge_id,
                        "Fetched repository files"
                    );
                    files.extend(repo_files);
                }
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(repository = %mapping.repository, error = %e, "Failed to fetch repository, skipping");
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

fn is_text_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        // Extensionless files (LICENSE, Makefile) are assumed textual.
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer, mappings: Vec<RepositoryMapping>) -> GithubAdapter {
        let config = GithubConfig {
            enabled: true,
            token: "tok".to_string(),
            mappings,
        };
        let retry = RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        };
        let mut adapter = GithubAdapter::new(&config, &retry).unwrap();
        adapter.api_base = server.uri();
        adapter
    }

    fn mapping(repository: &str, knowledge_id: &str) -> RepositoryMapping {
        RepositoryMapping {
            repository: repository.to_string(),
            knowledge_id: knowledge_id.to_string(),
        }
    }

    #[test]
    fn text_file_filter() {
        assert!(is_text_file("README.md"));
        assert!(is_text_file("main.rs"));
        assert!(is_text_file("LICENSE"));
        assert!(!is_text_file("logo.png"));
        assert!(!is_text_file("archive.tar.gz"));
    }

    #[tokio::test]
    async fn walks_directories_and_downloads_text_files() {
        let server = MockServer::start().await;
        let raw = format!("{}/raw/docs/guide.md", server.uri());

        Mock::given(method("GET"))
            .and(path("/repos/acme/docs/contents/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "name": "docs", "path": "docs", "type": "dir" },
                { "name": "logo.png", "path": "logo.png", "type": "file",
                  "download_url": "unused" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/docs/contents/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "name": "guide.md", "path": "docs/guide.md", "type": "file",
                  "download_url": raw }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/raw/docs/guide.md"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# Guide\n"))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, vec![mapping("acme/docs", "K1")]);
        let cancel = CancellationToken::new();
        let files = adapter.fetch_files(&cancel).await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "docs/guide.md");
        assert_eq!(files[0].knowledge_id, "K1");
        assert_eq!(files[0].content, b"# Guide\n");
    }

    #[tokio::test]
    async fn one_failing_repository_does_not_fail_the_fetch() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/broken/contents/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/ok/contents/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "name": "a.md", "path": "a.md", "type": "file",
                  "download_url": format!("{}/raw/a.md", server.uri()) }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/raw/a.md"))
            .respond_with(ResponseTemplate::new(200).set_body_string("content"))
            .mount(&server)
            .await;

        let adapter = adapter_for(
            &server,
            vec![mapping("acme/broken", "K1"), mapping("acme/ok", "K2")],
        );
        let cancel = CancellationToken::new();
        let files = adapter.fetch_files(&cancel).await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.md");
        assert_eq!(files[0].knowledge_id, "K2");
    }

    #[test]
    fn constructor_requires_token_and_mappings() {
        let retry = RetryConfig::default();
        let no_token = GithubConfig {
            enabled: true,
            token: String::new(),
            mappings: vec![mapping("a/b", "K1")],
        };
        assert!(GithubAdapter::new(&no_token, &retry).is_err());

        let no_mappings = GithubConfig {
            enabled: true,
            token: "tok".to_string(),
            mappings: vec![],
        };
        assert!(GithubAdapter::new(&no_mappings, &retry).is_err());
    }
}
