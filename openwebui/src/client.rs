//! The `KnowledgeClient` seam and its reqwest implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config::{OpenWebUiConfig, RetryConfig};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use utils::retry::{retry_with_backoff, RetryPolicy};

use crate::error::{ClientError, ClientResult};
use crate::types::{IngestionState, Knowledge, RemoteFile};

/// Ingestion polling buckets: (probes, seconds between probes).
///
/// Ingestion times are bimodal (seconds for small text files, minutes for
/// large ones), so probing starts tight and backs off to 20s, bounding the
/// whole wait at roughly eleven minutes.
const POLL_SCHEDULE: [(u32, u64); 5] = [(5, 2), (5, 5), (10, 10), (15, 15), (16, 20)];

const HTTP_TIMEOUT: Duration = Duration::from_secs(180);

/// Operations the reconciler needs from the knowledge-base service.
#[async_trait]
pub trait KnowledgeClient: Send + Sync {
    /// Upload raw bytes; returns the server-assigned artifact.
    async fn upload_file(
        &self,
        filename: &str,
        content: &[u8],
        cancel: &CancellationToken,
    ) -> ClientResult<RemoteFile>;

    async fn get_file(&self, file_id: &str, cancel: &CancellationToken)
        -> ClientResult<RemoteFile>;

    async fn list_knowledge(&self, cancel: &CancellationToken) -> ClientResult<Vec<Knowledge>>;

    /// Files attached to one knowledge base; an unknown id yields an empty
    /// list rather than an error.
    async fn knowledge_files(
        &self,
        knowledge_id: &str,
        cancel: &CancellationToken,
    ) -> ClientResult<Vec<RemoteFile>>;

    async fn add_file_to_knowledge(
        &self,
        knowledge_id: &str,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> ClientResult<()>;

    /// Idempotent: removing a file the knowledge base no longer holds
    /// succeeds.
    async fn remove_file_from_knowledge(
        &self,
        knowledge_id: &str,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> ClientResult<()>;

    /// Poll until ingestion reaches a terminal state or the schedule runs
    /// out. Every sleep and probe honors the cancellation token.
    async fn wait_for_ingestion(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> ClientResult<()>;
}

pub struct HttpKnowledgeClient {
    http: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    poll_schedule: Vec<(u32, Duration)>,
}

impl HttpKnowledgeClient {
    pub fn new(config: &OpenWebUiConfig, retry: &RetryConfig) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry: RetryPolicy::new(
                retry.max_retries,
                retry.initial_backoff_ms,
                retry.max_backoff_ms,
            ),
            poll_schedule: POLL_SCHEDULE
                .iter()
                .map(|&(count, secs)| (count, Duration::from_secs(secs)))
                .collect(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    /// Send a request, racing the cancellation token, and map the response
    /// status onto the error taxonomy.
    async fn execute(
        &self,
        builder: RequestBuilder,
        cancel: &CancellationToken,
    ) -> ClientResult<Response> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            result = builder.send() => result?,
        };

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_seconds = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60);
                Err(ClientError::RateLimited {
                    retry_after_seconds,
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::Authentication(
                "API key was rejected".to_string(),
            )),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(ClientError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

#[async_trait]
impl KnowledgeClient for HttpKnowledgeClient {
    async fn upload_file(
        &self,
        filename: &str,
        content: &[u8],
        cancel: &CancellationToken,
    ) -> ClientResult<RemoteFile> {
        let url = self.url("/api/v1/files/");
        debug!(filename, size = content.len(), "Uploading file");

        let file: RemoteFile = retry_with_backoff(&self.retry, cancel, "upload_file", || {
            // Multipart bodies are consumed by send, so rebuild per attempt.
            let form = Form::new().part(
                "file",
                Part::bytes(content.to_vec()).file_name(filename.to_string()),
            );
            let builder = self.authorize(self.http.post(&url)).multipart(form);
            async move { self.execute(builder, cancel).await?.json().await.map_err(ClientError::Http) }
        })
        .await?;

        debug!(filename, file_id = %file.id, status = ?file.data.status, "Upload accepted");
        Ok(file)
    }

    async fn get_file(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> ClientResult<RemoteFile> {
        let url = self.url(&format!("/api/v1/files/{file_id}"));
        retry_with_backoff(&self.retry, cancel, "get_file", || {
            let builder = self.authorize(self.http.get(&url));
            async move { self.execute(builder, cancel).await?.json().await.map_err(ClientError::Http) }
        })
        .await
    }

    async fn list_knowledge(&self, cancel: &CancellationToken) -> ClientResult<Vec<Knowledge>> {
        let url = self.url("/api/v1/knowledge/");
        retry_with_backoff(&self.retry, cancel, "list_knowledge", || {
            let builder = self.authorize(self.http.get(&url));
            async move { self.execute(builder, cancel).await?.json().await.map_err(ClientError::Http) }
        })
        .await
    }

    async fn knowledge_files(
        &self,
        knowledge_id: &str,
        cancel: &CancellationToken,
    ) -> ClientResult<Vec<RemoteFile>> {
        let listing = self.list_knowledge(cancel).await?;
        let files = listing
            .into_iter()
            .find(|k| k.id == knowledge_id)
            .map(|k| k.files)
            .unwrap_or_default();
        debug!(knowledge_id, count = files.len(), "Listed knowledge files");
        Ok(files)
    }

    async fn add_file_to_knowledge(
        &self,
        knowledge_id: &str,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> ClientResult<()> {
        let url = self.url(&format!("/api/v1/knowledge/{knowledge_id}/file/add"));
        retry_with_backoff(&self.retry, cancel, "add_file_to_knowledge", || {
            let builder = self
                .authorize(self.http.post(&url))
                .json(&serde_json::json!({ "file_id": file_id }));
            async move {
                self.execute(builder, cancel).await?;
                Ok::<(), ClientError>(())
            }
        })
        .await?;
        debug!(knowledge_id, file_id, "Attached file to knowledge base");
        Ok(())
    }

    async fn remove_file_from_knowledge(
        &self,
        knowledge_id: &str,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> ClientResult<()> {
        let url = self.url(&format!("/api/v1/knowledge/{knowledge_id}/file/remove"));
        let result = retry_with_backoff(&self.retry, cancel, "remove_file_from_knowledge", || {
            let builder = self
                .authorize(self.http.post(&url))
                .json(&serde_json::json!({ "file_id": file_id }));
            async move {
                self.execute(builder, cancel).await?;
                Ok(())
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            // Removal of an already-removed file is success. Open WebUI
            // reports this as 404, or as 400 with a "not found" body.
            Err(ClientError::Api { status: 404, .. }) => {
                debug!(knowledge_id, file_id, "File already absent from knowledge base");
                Ok(())
            }
            Err(ClientError::Api {
                status: 400,
                ref message,
            }) if message.to_lowercase().contains("not found") => {
                debug!(knowledge_id, file_id, "File already absent from knowledge base");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_for_ingestion(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> ClientResult<()> {
        let mut probes = 0u32;
        for &(count, delay) in &self.poll_schedule {
            for _ in 0..count {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                probes += 1;

                let file = match self.get_file(file_id, cancel).await {
                    Ok(file) => file,
                    Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                    Err(e) => {
                        warn!(file_id, probes, error = %e, "Ingestion probe failed, continuing");
                        continue;
                    }
                };

                match file.ingestion_state() {
                    IngestionState::Ready => {
                        debug!(file_id, probes, "Ingestion completed");
                        return Ok(());
                    }
                    IngestionState::Failed => {
                        return Err(ClientError::IngestionFailed {
                            file_id: file_id.to_string(),
                            status: file.data.status.unwrap_or_default(),
                        });
                    }
                    IngestionState::InProgress => {
                        debug!(file_id, probes, status = ?file.data.status, "Ingestion in progress");
                    }
                }
            }
        }

        Err(ClientError::IngestionTimeout {
            file_id: file_id.to_string(),
        })
    }
}

/// Construct the production client behind the trait object the reconciler
/// consumes.
pub fn create_http_client(
    config: &OpenWebUiConfig,
    retry: &RetryConfig,
) -> ClientResult<Arc<dyn KnowledgeClient>> {
    Ok(Arc::new(HttpKnowledgeClient::new(config, retry)?))
}
