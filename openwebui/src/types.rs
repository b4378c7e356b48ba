//! Wire types for the Open WebUI REST API.

use serde::{Deserialize, Serialize};

/// An uploaded artifact as the service reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    /// Content hash when the service exposes one; not authoritative.
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub data: FileData,
    #[serde(default)]
    pub meta: FileMeta,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileData {
    /// Server-side ingestion status: `pending`, `processed`, `completed`,
    /// `error`, `failed`, or absent.
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

/// A knowledge base and its attached files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Knowledge {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub files: Vec<RemoteFile>,
}

/// Coarse classification of the ingestion status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionState {
    /// Processed, completed, or no status reported.
    Ready,
    /// The service marked ingestion as failed.
    Failed,
    /// Pending or an unrecognized in-flight status.
    InProgress,
}

impl RemoteFile {
    pub fn ingestion_state(&self) -> IngestionState {
        match self.data.status.as_deref() {
            None | Some("") | Some("processed") | Some("completed") => IngestionState::Ready,
            Some("error") | Some("failed") => IngestionState::Failed,
            Some(_) => IngestionState::InProgress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with_status(status: Option<&str>) -> RemoteFile {
        RemoteFile {
            id: "f1".to_string(),
            data: FileData {
                status: status.map(str::to_string),
            },
            ..Default::default()
        }
    }

    #[test]
    fn absent_and_terminal_statuses_are_ready() {
        assert_eq!(
            file_with_status(None).ingestion_state(),
            IngestionState::Ready
        );
        assert_eq!(
            file_with_status(Some("")).ingestion_state(),
            IngestionState::Ready
        );
        assert_eq!(
            file_with_status(Some("processed")).ingestion_state(),
            IngestionState::Ready
        );
        assert_eq!(
            file_with_status(Some("completed")).ingestion_state(),
            IngestionState::Ready
        );
    }

    #[test]
    fn failure_statuses_classify_as_failed() {
        assert_eq!(
            file_with_status(Some("error")).ingestion_state(),
            IngestionState::Failed
        );
        assert_eq!(
            file_with_status(Some("failed")).ingestion_state(),
            IngestionState::Failed
        );
    }

    #[test]
    fn unknown_statuses_stay_in_progress() {
        assert_eq!(
            file_with_status(Some("pending")).ingestion_state(),
            IngestionState::InProgress
        );
        assert_eq!(
            file_with_status(Some("embedding")).ingestion_state(),
            IngestionState::InProgress
        );
    }

    #[test]
    fn upload_response_deserializes() {
        let json = r#"{
            "id": "file-123",
            "filename": "README.md",
            "data": { "status": "pending" },
            "meta": { "name": "README.md", "content_type": "text/markdown", "size": 42 },
            "created_at": 1700000000,
            "updated_at": 1700000001
        }"#;
        let file: RemoteFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.id, "file-123");
        assert_eq!(file.meta.size, Some(42));
        assert_eq!(file.ingestion_state(), IngestionState::InProgress);
    }

    #[test]
    fn knowledge_listing_deserializes_without_files() {
        let json = r#"[{ "id": "k1", "name": "Docs" }]"#;
        let list: Vec<Knowledge> = serde_json::from_str(json).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list[0].files.is_empty());
    }
}
