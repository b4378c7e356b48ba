use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use adapters::{Adapter, AdapterError, AdapterResult, SourceFile, SyncStamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openwebui::{ClientError, ClientResult, Knowledge, KnowledgeClient, RemoteFile};
use tokio_util::sync::CancellationToken;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn unique_id(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}", prefix, id)
}

/// Convenience constructor for snapshot files in tests.
pub fn source_file(path: &str, content: &[u8], knowledge_id: &str) -> SourceFile {
    SourceFile::new(path, content.to_vec(), Utc::now(), "test", knowledge_id)
}

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub file_id: String,
    pub filename: String,
    pub content: Vec<u8>,
}

/// In-memory stand-in for the downstream service.
///
/// Issues sequential artifact ids and records every call so tests can
/// assert exactly which operations a cycle performed.
#[derive(Default)]
pub struct MockKnowledgeClient {
    next_id: AtomicU32,
    pub uploads: Mutex<Vec<UploadRecord>>,
    pub attached: Mutex<Vec<(String, String)>>,
    pub detached: Mutex<Vec<(String, String)>>,
    /// Knowledge listing served to `list_knowledge` / `knowledge_files`.
    pub knowledge: Mutex<HashMap<String, Vec<RemoteFile>>>,
    pub fail_uploads: AtomicBool,
    pub fail_listing: AtomicBool,
    pub ingestion_waits: AtomicU32,
}

impl MockKnowledgeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn attach_count(&self) -> usize {
        self.attached.lock().unwrap().len()
    }

    pub fn detach_count(&self) -> usize {
        self.detached.lock().unwrap().len()
    }

    pub fn last_upload(&self) -> Option<UploadRecord> {
        self.uploads.lock().unwrap().last().cloned()
    }

    /// Seed the downstream view used by the startup re-import.
    pub fn seed_knowledge_file(&self, knowledge_id: &str, file_id: &str, filename: &str) {
        let file = RemoteFile {
            id: file_id.to_string(),
            filename: filename.to_string(),
            ..Default::default()
        };
        self.knowledge
            .lock()
            .unwrap()
            .entry(knowledge_id.to_string())
            .or_default()
            .push(file);
    }
}

#[async_trait]
impl KnowledgeClient for MockKnowledgeClient {
    async fn upload_file(
        &self,
        filename: &str,
        content: &[u8],
        _cancel: &CancellationToken,
    ) -> ClientResult<RemoteFile> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ClientError::Api {
                status: 500,
                message: "upload disabled".to_string(),
            });
        }
        let file_id = format!("file-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.uploads.lock().unwrap().push(UploadRecord {
            file_id: file_id.clone(),
            filename: filename.to_string(),
            content: content.to_vec(),
        });
        Ok(RemoteFile {
            id: file_id,
            filename: filename.to_string(),
            ..Default::default()
        })
    }

    async fn get_file(
        &self,
        file_id: &str,
        _cancel: &CancellationToken,
    ) -> ClientResult<RemoteFile> {
        Ok(RemoteFile {
            id: file_id.to_string(),
            ..Default::default()
        })
    }

    async fn list_knowledge(&self, _cancel: &CancellationToken) -> ClientResult<Vec<Knowledge>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ClientError::Api {
                status: 500,
                message: "listing disabled".to_string(),
            });
        }
        let knowledge = self.knowledge.lock().unwrap();
        Ok(knowledge
            .iter()
            .map(|(id, files)| Knowledge {
                id: id.clone(),
                name: id.clone(),
                description: None,
                files: files.clone(),
            })
            .collect())
    }

    async fn knowledge_files(
        &self,
        knowledge_id: &str,
        cancel: &CancellationToken,
    ) -> ClientResult<Vec<RemoteFile>> {
        let listing = self.list_knowledge(cancel).await?;
        Ok(listing
            .into_iter()
            .find(|k| k.id == knowledge_id)
            .map(|k| k.files)
            .unwrap_or_default())
    }

    async fn add_file_to_knowledge(
        &self,
        knowledge_id: &str,
        file_id: &str,
        _cancel: &CancellationToken,
    ) -> ClientResult<()> {
        self.attached
            .lock()
            .unwrap()
            .push((knowledge_id.to_string(), file_id.to_string()));
        Ok(())
    }

    async fn remove_file_from_knowledge(
        &self,
        knowledge_id: &str,
        file_id: &str,
        _cancel: &CancellationToken,
    ) -> ClientResult<()> {
        self.detached
            .lock()
            .unwrap()
            .push((knowledge_id.to_string(), file_id.to_string()));
        Ok(())
    }

    async fn wait_for_ingestion(
        &self,
        _file_id: &str,
        _cancel: &CancellationToken,
    ) -> ClientResult<()> {
        self.ingestion_waits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An adapter that serves a canned snapshot, or fails on demand.
pub struct StaticAdapter {
    name: String,
    files: Mutex<Vec<SourceFile>>,
    fail: AtomicBool,
    last_sync: SyncStamp,
}

impl StaticAdapter {
    pub fn new(name: &str, files: Vec<SourceFile>) -> Self {
        Self {
            name: name.to_string(),
            files: Mutex::new(files),
            fail: AtomicBool::new(false),
            last_sync: SyncStamp::new(),
        }
    }

    pub fn failing(name: &str) -> Self {
        let adapter = Self::new(name, Vec::new());
        adapter.fail.store(true, Ordering::SeqCst);
        adapter
    }

    pub fn set_files(&self, files: Vec<SourceFile>) {
        *self.files.lock().unwrap() = files;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Adapter for StaticAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_files(&self, _cancel: &CancellationToken) -> AdapterResult<Vec<SourceFile>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AdapterError::Api {
                adapter: self.name.clone(),
                status: 500,
                message: "upstream unavailable".to_string(),
            });
        }
        Ok(self.files.lock().unwrap().clone())
    }

    fn last_sync(&self) -> DateTime<Utc> {
        self.last_sync.get()
    }

    fn set_last_sync(&self, at: DateTime<Utc>) {
        self.last_sync.set(at);
    }
}
