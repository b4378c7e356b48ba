//! Open WebUI downstream client.
//!
//! The sync engine talks to the knowledge-base service exclusively through
//! the [`KnowledgeClient`] trait so tests can substitute an in-memory
//! double. [`HttpKnowledgeClient`] is the production implementation.

pub mod client;
pub mod error;
pub mod types;

pub use client::{create_http_client, HttpKnowledgeClient, KnowledgeClient};
pub use error::{ClientError, ClientResult};
pub use types::{IngestionState, Knowledge, RemoteFile};
