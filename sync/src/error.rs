use adapters::AdapterError;
use openwebui::ClientError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Downstream client error: {0}")]
    Client(ClientError),

    #[error("Adapter error: {0}")]
    Adapter(AdapterError),

    #[error("Index IO failed at {path}: {source}")]
    IndexIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Index document at {path} is corrupt: {source}")]
    IndexCorrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write local snapshot {path}: {source}")]
    Snapshot {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cycle cancelled")]
    Cancelled,
}

impl From<ClientError> for SyncError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Cancelled => Self::Cancelled,
            other => Self::Client(other),
        }
    }
}

impl From<AdapterError> for SyncError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Cancelled => Self::Cancelled,
            other => Self::Adapter(other),
        }
    }
}
