//! Jira adapter: one Markdown document per issue, per mapped project.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::{JiraConfig, ProjectMapping, RetryConfig};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use utils::retry::{retry_with_backoff, RetryPolicy};

use crate::error::{AdapterError, AdapterResult};
use crate::html::html_to_text;
use crate::http::send_checked;
use crate::{Adapter, SourceFile, SyncStamp};

const SEARCH_PAGE_SIZE: u32 = 100;

pub struct JiraAdapter {
    http: Client,
    base_url: String,
    username: String,
    api_token: String,
    mappings: Vec<ProjectMapping>,
    issue_limit: u32,
    retry: RetryPolicy,
    last_sync: SyncStamp,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    total: u32,
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    key: String,
    fields: IssueFields,
    #[serde(default, rename = "renderedFields")]
    rendered: Option<RenderedFields>,
}

#[derive(Debug, Deserialize)]
struct IssueFields {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    status: Option<Named>,
    #[serde(default)]
    priority: Option<Named>,
    #[serde(default, rename = "issuetype")]
    issue_type: Option<Named>,
    #[serde(default)]
    assignee: Option<Person>,
    #[serde(default)]
    reporter: Option<Person>,
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Person {
    #[serde(default, rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct RenderedFields {
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentPage {
    #[serde(default)]
    comments: Vec<Comment>,
}

#[derive(Debug, Deserialize)]
struct Comment {
    #[serde(default)]
    author: Option<Person>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default, rename = "renderedBody")]
    rendered_body: Option<String>,
}

impl JiraAdapter {
    pub fn new(config: &JiraConfig, retry: &RetryConfig) -> AdapterResult<Self> {
        if config.base_url.is_empty() || config.api_token.is_empty() {
            return Err(AdapterError::Configuration {
                message: "jira base_url and api_token are required".to_string(),
            });
        }
        if config.mappings.is_empty() {
            return Err(AdapterError::Configuration {
                message: "at least one jira project mapping must be configured".to_string(),
            });
        }

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_token: config.api_token.clone(),
            mappings: config.mappings.clone(),
            issue_limit: config.issue_limit.max(1),
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
        retry_with_backoff(&self.retry, cancel, "jira_get", || {
            let builder = self
                .http
                .get(url)
                .basic_auth(&self.username, Some(&self.api_token))
                .header("Accept", "application/json");
            async move {
                send_checked("jira", builder, cancel)
                    .await?
                    .json()
                    .await
                    .map_err(AdapterError::Http)
            }
        })
        .await
    }

    async fn search_issues(
        &self,
        project_key: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<Issue>> {
        let jql = urlencoding::encode_binary(
            format!("project = {project_key} ORDER BY updated DESC").as_bytes(),
        )
        .into_owned();

        let mut issues = Vec::new();
        let mut start_at: u32 = 0;

        loop {
            let page_size = SEARCH_PAGE_SIZE.min(self.issue_limit - issues.len() as u32);
            let url = format!(
                "{}/rest/api/3/search?jql={jql}&startAt={start_at}&maxResults={page_size}\
                 &expand=renderedFields\
                 &fields=summary,status,priority,issuetype,assignee,reporter,created,updated",
                self.base_url
            );

            let page: SearchPage = self.get_json(&url, cancel).await?;
            let fetched = page.issues.len() as u32;
            issues.extend(page.issues);

            start_at += fetched;
            if fetched == 0 || start_at >= page.total || issues.len() as u32 >= self.issue_limit {
                break;
            }
        }

        Ok(issues)
    }

    async fn issue_comments(
        &self,
        issue_key: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<Comment>> {
        let url = format!(
            "{}/rest/api/3/issue/{issue_key}/comment?expand=renderedBody",
            self.base_url
        );
        let page: CommentPage = self.get_json(&url, cancel).await?;
        Ok(page.comments)
    }

    fn shape_issue(
        &self,
        issue: &Issue,
        comments: &[Comment],
        project_key: &str,
        knowledge_id: &str,
    ) -> SourceFile {
        let fields = &issue.fields;
        let mut doc = format!("# {}: {}\n\n", issue.key, fields.summary);

        if let Some(kind) = &fields.issue_type {
            doc.push_str(&format!("- Type: {}\n", kind.name));
        }
        if let Some(status) = &fields.status {
            doc.push_str(&format!("- Status: {}\n", status.name));
        }
        if let Some(priority) = &fields.priority {
            doc.push_str(&format!("- Priority: {}\n", priority.name));
        }
        if let Some(assignee) = &fields.assignee {
            doc.push_str(&format!("- Assignee: {}\n", assignee.display_name));
        }
        if let Some(reporter) = &fields.reporter {
            doc.push_str(&format!("- Reporter: {}\n", reporter.display_name));
        }
        if let Some(created) = &fields.created {
            doc.push_str(&format!("- Created: {created}\n"));
        }
        if let Some(updated) = &fields.updated {
            doc.push_str(&format!("- Updated: {updated}\n"));
        }

        if let Some(description) = issue.rendered.as_ref().and_then(|r| r.description.as_deref()) {
            let text = html_to_text(description);
            if !text.is_empty() {
                doc.push_str("\n## Description\n\n");
                doc.push_str(&text);
                doc.push('\n');
            }
        }

        if !comments.is_empty() {
            doc.push_str("\n## Comments\n");
            for comment in comments {
                let author = comment
                    .author
                    .as_ref()
                    .map(|a| a.display_name.as_str())
                    .unwrap_or("unknown");
                let created = comment.created.as_deref().unwrap_or("");
                doc.push_str(&format!("\n### {author} {created}\n\n"));
                if let Some(body) = comment.rendered_body.as_deref() {
                    doc.push_str(&html_to_text(body));
                    doc.push('\n');
                }
            }
        }

        let modified_at = fields
            .updated
            .as_deref()
            .and_then(parse_jira_timestamp)
            .unwrap_or_else(Utc::now);

        SourceFile::new(
            format!("{project_key}/{}.md", issue.key),
            doc.into_bytes(),
            modified_at,
            "jira",
            knowledge_id,
        )
    }

    async fn fetch_project(
        &self,
        mapping: &ProjectMapping,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<SourceFile>> {
        let issues = self.search_issues(&mapping.project_key, cancel).await?;
        let mut files = Vec::with_capacity(issues.len());

        for issue in &issues {
            let comments = match self.issue_comments(&issue.key, cancel).await {
                Ok(comments) => comments,
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(issue = %issue.key, error = %e, "Failed to fetch comments");
                    Vec::new()
                }
            };
            files.push(self.shape_issue(
                issue,
                &comments,
                &mapping.project_key,
                &mapping.knowledge_id,
            ));
        }

        Ok(files)
    }
}

#[async_trait]
impl Adapter for JiraAdapter {
    fn name(&self) -> &str {
        "jira"
    }

    async fn fetch_files(&self, cancel: &CancellationToken) -> AdapterResult<Vec<SourceFile>> {
        let mut files = Vec::new();

        for mapping in &self.mappings {
            match self.fetch_project(mapping, cancel).await {
                Ok(project_files) => {
                    debug!(
                        project = %mapping.project_key,
                        count = project_files.len(),
                        "Fetched project issues"
                    );
                    files.extend(project_files);
                }
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(project = %mapping.project_key, error = %e, "Failed to fetch project, skipping");
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

/// Jira reports times like `2024-03-01T10:15:30.000+0000`.
fn parse_jira_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer) -> JiraAdapter {
        let config = JiraConfig {
            enabled: true,
            base_url: server.uri(),
            username: "bot@example.com".to_string(),
            api_token: "tok".to_string(),
            mappings: vec![ProjectMapping {
                project_key: "PROJ".to_string(),
                knowledge_id: "K1".to_string(),
            }],
            issue_limit: 50,
        };
        let retry = RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        };
        JiraAdapter::new(&config, &retry).unwrap()
    }

    #[test]
    fn parses_jira_timestamps() {
        let dt = parse_jira_timestamp("2024-03-01T10:15:30.000+0000").unwrap();
        assert_eq!(dt.timestamp(), 1_709_288_130);
        assert!(parse_jira_timestamp("2024-03-01T10:15:30Z").is_some());
        assert!(parse_jira_timestamp("not a time").is_none());
    }

    #[tokio::test]
    async fn renders_issue_documents_with_comments() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/api/3/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 1,
                "issues": [ {
                    "key": "PROJ-7",
                    "fields": {
                        "summary": "Login broken",
                        "status": { "name": "Open" },
                        "issuetype": { "name": "Bug" },
                        "assignee": { "displayName": "Dana" },
                        "updated": "2024-03-01T10:15:30.000+0000"
                    },
                    "renderedFields": { "description": "<p>Steps to reproduce</p>" }
                } ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PROJ-7/comment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "comments": [ {
                    "author": { "displayName": "Sam" },
                    "created": "2024-03-02T08:00:00.000+0000",
                    "renderedBody": "<p>Fixed in main</p>"
                } ]
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let cancel = CancellationToken::new();
        let files = adapter.fetch_files(&cancel).await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "PROJ/PROJ-7.md");
        let doc = String::from_utf8(files[0].content.clone()).unwrap();
        assert!(doc.contains("# PROJ-7: Login broken"));
        assert!(doc.contains("- Status: Open"));
        assert!(doc.contains("Steps to reproduce"));
        assert!(doc.contains("### Sam"));
        assert!(doc.contains("Fixed in main"));
    }

    #[tokio::test]
    async fn paginates_until_total() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/api/3/search"))
            .and(query_param("startAt", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 2,
                "issues": [ { "key": "PROJ-1", "fields": { "summary": "one" } } ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/search"))
            .and(query_param("startAt", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 2,
                "issues": [ { "key": "PROJ-2", "fields": { "summary": "two" } } ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PROJ-1/comment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "comments": [] })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/PROJ-2/comment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "comments": [] })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let cancel = CancellationToken::new();
        let files = adapter.fetch_files(&cancel).await.unwrap();
        assert_eq!(files.len(), 2);
    }
}
