//! The reconciliation engine.
//!
//! One cycle walks every enabled adapter in declared order, joins each
//! returned snapshot against the persistent index, and decides per file
//! whether to upload, skip, rekey, update in place, or migrate between
//! knowledge bases. After all adapters are processed, index entries that
//! originated from the downstream re-import and were claimed by no adapter
//! are detached and dropped. An adapter whose fetch fails is skipped for
//! the cycle; its indexed files are never treated as orphans.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use adapters::{Adapter, AdapterError, SourceFile};
use chrono::{DateTime, TimeZone, Utc};
use openwebui::{ClientError, IngestionState, KnowledgeClient};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::index::{FileIndex, IndexEntry, DOWNSTREAM_SOURCE};

pub struct SyncManager {
    client: Arc<dyn KnowledgeClient>,
    storage_root: PathBuf,
    fallback_knowledge_id: Option<String>,
    index: FileIndex,
}

/// Accounting for one reconciliation cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub uploaded: u32,
    pub skipped: u32,
    pub renamed: u32,
    pub migrated: u32,
    pub attach_skipped: u32,
    pub orphans_removed: u32,
    pub adapter_failures: u32,
    pub errors: Vec<CycleError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleError {
    pub entity: String,
    pub operation: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl CycleReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn add_error(&mut self, entity: &str, operation: &str, error: impl ToString) {
        self.errors.push(CycleError {
            entity: entity.to_string(),
            operation: operation.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Uploaded => self.uploaded += 1,
            FileOutcome::UploadedUnattached => {
                self.uploaded += 1;
                self.attach_skipped += 1;
            }
            FileOutcome::Migrated => {
                self.uploaded += 1;
                self.migrated += 1;
            }
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Renamed => {
                self.skipped += 1;
                self.renamed += 1;
            }
        }
    }
}

enum FileOutcome {
    Uploaded,
    UploadedUnattached,
    Skipped,
    Renamed,
    Migrated,
}

impl SyncManager {
    pub fn new(
        client: Arc<dyn KnowledgeClient>,
        storage_root: impl Into<PathBuf>,
        fallback_knowledge_id: Option<String>,
    ) -> SyncResult<Self> {
        let storage_root = storage_root.into();
        std::fs::create_dir_all(&storage_root).map_err(|source| SyncError::IndexIo {
            path: storage_root.display().to_string(),
            source,
        })?;
        let index = FileIndex::load(&storage_root)?;

        Ok(Self {
            client,
            storage_root,
            fallback_knowledge_id: fallback_knowledge_id.filter(|id| !id.is_empty()),
            index,
        })
    }

    pub fn index(&self) -> &FileIndex {
        &self.index
    }

    /// Rebuild the index from the downstream view of the given knowledge
    /// bases. Entries created here carry the re-import marker so the next
    /// cycle knows their fingerprints cannot be trusted.
    pub async fn initialize_index(
        &mut self,
        knowledge_ids: &BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> SyncResult<usize> {
        if knowledge_ids.is_empty() {
            debug!("No knowledge bases referenced, skipping index re-import");
            return Ok(0);
        }

        info!(
            knowledge_bases = knowledge_ids.len(),
            "Initializing file index from downstream"
        );
        let listing = self.client.list_knowledge(cancel).await?;

        let mut entries = HashMap::new();
        for knowledge in listing {
            if !knowledge_ids.contains(&knowledge.id) {
                continue;
            }
            for file in knowledge.files {
                let path = file
                    .path
                    .clone()
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| {
                        if file.filename.is_empty() {
                            file.meta.name.clone()
                        } else {
                            file.filename.clone()
                        }
                    });
                if path.is_empty() {
                    warn!(file_id = %file.id, "Downstream file has no name, skipping");
                    continue;
                }

                let key = utils::basename(&path).to_string();
                // The downstream does not expose a content hash; fall back
                // to the artifact id so the entry is never mistaken for a
                // content match.
                let fingerprint = file
                    .hash
                    .clone()
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| file.id.clone());

                entries.insert(
                    key,
                    IndexEntry {
                        path,
                        fingerprint,
                        file_id: file.id,
                        source: DOWNSTREAM_SOURCE.to_string(),
                        knowledge_id: knowledge.id.clone(),
                        synced_at: Utc.timestamp_opt(file.created_at, 0)
                            .single()
                            .unwrap_or_else(Utc::now),
                        modified_at: Utc.timestamp_opt(file.updated_at, 0)
                            .single()
                            .unwrap_or_else(Utc::now),
                    },
                );
            }
        }

        let count = entries.len();
        self.index.replace_all(entries);
        self.index.save()?;
        info!(entries = count, "File index initialized from downstream");
        Ok(count)
    }

    /// One full reconciliation pass over the given adapters.
    pub async fn run_cycle(
        &mut self,
        adapters: &[Arc<dyn Adapter>],
        cancel: &CancellationToken,
    ) -> SyncResult<CycleReport> {
        let mut report = CycleReport::new();
        info!("Starting file synchronization");

        // Downstream snapshot for debug visibility only.
        match self.client.list_knowledge(cancel).await {
            Ok(listing) => {
                debug!(knowledge_bases = listing.len(), "Downstream knowledge snapshot");
            }
            Err(ClientError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => warn!(error = %e, "Failed to snapshot knowledge listing"),
        }

        let mut present: HashSet<String> = HashSet::new();

        for adapter in adapters {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let name = adapter.name().to_string();
            info!(adapter = %name, "Syncing adapter");

            let files = match adapter.fetch_files(cancel).await {
                Ok(files) => files,
                Err(AdapterError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    // Skipping the adapter retains its indexed files; an
                    // outage must not cascade into deletion.
                    warn!(adapter = %name, error = %e, "Adapter fetch failed, skipping this cycle");
                    report.adapter_failures += 1;
                    report.add_error(&name, "fetch", &e);
                    continue;
                }
            };
            debug!(adapter = %name, count = files.len(), "Fetched adapter snapshot");

            for file in &files {
                let key = file.basename().to_string();
                if !present.insert(key.clone()) {
                    warn!(
                        adapter = %name,
                        path = %file.path,
                        basename = %key,
                        "Basename collision within cycle, last writer wins"
                    );
                }

                match self.sync_file(file, &name, cancel).await {
                    Ok(outcome) => report.record(outcome),
                    Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(e) => {
                        warn!(adapter = %name, path = %file.path, error = %e, "Failed to sync file");
                        report.add_error(&file.path, "sync", &e);
                    }
                }
            }

            adapter.set_last_sync(Utc::now());
        }

        self.cleanup_orphans(&present, cancel, &mut report).await?;
        self.index.save()?;

        report.complete();
        info!(
            uploaded = report.uploaded,
            skipped = report.skipped,
            renamed = report.renamed,
            migrated = report.migrated,
            attach_skipped = report.attach_skipped,
            orphans_removed = report.orphans_removed,
            adapter_failures = report.adapter_failures,
            errors = report.errors.len(),
            "File synchronization completed"
        );
        Ok(report)
    }

    async fn sync_file(
        &mut self,
        file: &SourceFile,
        source: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<FileOutcome> {
        let key = file.basename().to_string();

        // Basename match first, content match second (move detection).
        let matched = match self.index.get(&key) {
            Some(entry) => Some((key.clone(), entry.clone())),
            None => self
                .index
                .find_by_fingerprint(&file.fingerprint)
                .map(|(k, e)| (k.to_string(), e.clone())),
        };

        let target = self.effective_knowledge(&file.knowledge_id);

        let mut migrating = false;
        if let Some((existing_key, existing)) = &matched {
            let existing_target = self.effective_knowledge(&existing.knowledge_id);
            if existing_target == target {
                if !existing.is_reimported() && existing.fingerprint == file.fingerprint {
                    if *existing_key != key {
                        // Same content under a new name: rekey, no upload.
                        let mut renamed = existing.clone();
                        renamed.path = file.path.clone();
                        renamed.modified_at = file.modified_at;
                        renamed.synced_at = Utc::now();
                        self.index.remove(existing_key);
                        self.index.insert(key, renamed);
                        info!(path = %file.path, from = %existing_key, "Rekeyed index entry, content unchanged");
                        return Ok(FileOutcome::Renamed);
                    }
                    debug!(path = %file.path, "File unchanged, skipping");
                    return Ok(FileOutcome::Skipped);
                }

                if existing.is_reimported() {
                    debug!(
                        path = %file.path,
                        "Entry originated from the downstream listing; re-uploading to guarantee current content"
                    );
                } else {
                    info!(path = %file.path, "File changed, updating");
                }

                // Update in place: detach the superseded artifact first.
                // Absence downstream already counts as success; any other
                // detach failure must not block the re-upload.
                if let Some(kb) = &target {
                    if !existing.file_id.is_empty() {
                        match self
                            .client
                            .remove_file_from_knowledge(kb, &existing.file_id, cancel)
                            .await
                        {
                            Ok(()) => {
                                debug!(file_id = %existing.file_id, knowledge_id = %kb, "Detached superseded artifact");
                            }
                            Err(ClientError::Cancelled) => return Err(SyncError::Cancelled),
                            Err(e) => {
                                warn!(file_id = %existing.file_id, error = %e, "Failed to detach superseded artifact, continuing");
                            }
                        }
                    }
                }
            } else {
                // The downstream associates artifact ids with knowledge
                // bases, so migration re-uploads. The old artifact stays
                // attached to the previous knowledge base.
                info!(
                    path = %file.path,
                    from = existing_target.as_deref().unwrap_or(""),
                    to = target.as_deref().unwrap_or(""),
                    "Knowledge binding changed, migrating"
                );
                migrating = true;
            }
        }

        self.snapshot_locally(source, file)?;

        let uploaded = self
            .client
            .upload_file(file.basename(), &file.content, cancel)
            .await?;

        if uploaded.ingestion_state() == IngestionState::InProgress {
            match self.client.wait_for_ingestion(&uploaded.id, cancel).await {
                Ok(()) => {}
                Err(ClientError::Cancelled) => return Err(SyncError::Cancelled),
                Err(ClientError::IngestionTimeout { .. }) => {
                    // The artifact id stays valid, so attach proceeds.
                    warn!(path = %file.path, file_id = %uploaded.id, "Ingestion did not confirm in time, attaching anyway");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut attach_skipped = false;
        match &target {
            Some(kb) => {
                self.client
                    .add_file_to_knowledge(kb, &uploaded.id, cancel)
                    .await?;
            }
            None => {
                warn!(path = %file.path, "No knowledge base for file, uploaded but not attached");
                attach_skipped = true;
            }
        }

        if let Some((existing_key, _)) = &matched {
            if *existing_key != key {
                self.index.remove(existing_key);
            }
        }
        self.index.insert(
            key,
            IndexEntry {
                path: file.path.clone(),
                fingerprint: file.fingerprint.clone(),
                file_id: uploaded.id.clone(),
                source: source.to_string(),
                knowledge_id: target.clone().unwrap_or_default(),
                synced_at: Utc::now(),
                modified_at: file.modified_at,
            },
        );

        info!(path = %file.path, file_id = %uploaded.id, "Synced file");
        Ok(if attach_skipped {
            FileOutcome::UploadedUnattached
        } else if migrating {
            FileOutcome::Migrated
        } else {
            FileOutcome::Uploaded
        })
    }

    /// An entry is orphaned only when no adapter claimed its basename this
    /// cycle AND it originated from the downstream re-import. Adapter-owned
    /// entries are retained (the adapter may simply have failed).
    async fn cleanup_orphans(
        &mut self,
        present: &HashSet<String>,
        cancel: &CancellationToken,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        let orphans: Vec<String> = self
            .index
            .iter()
            .filter_map(|(key, entry)| {
                let mut filename = utils::basename(&entry.path);
                if filename.is_empty() {
                    filename = utils::basename(key);
                }
                let orphaned = !present.contains(filename)
                    && entry.is_reimported()
                    && !entry.file_id.is_empty();
                if orphaned {
                    Some(key.clone())
                } else {
                    None
                }
            })
            .collect();

        if orphans.is_empty() {
            debug!("No orphaned entries");
            return Ok(());
        }
        info!(count = orphans.len(), "Removing orphaned entries");

        for orphan_key in orphans {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let Some(entry) = self.index.get(&orphan_key).cloned() else {
                continue;
            };

            match self.effective_knowledge(&entry.knowledge_id) {
                Some(kb) => {
                    match self
                        .client
                        .remove_file_from_knowledge(&kb, &entry.file_id, cancel)
                        .await
                    {
                        Ok(()) => {
                            debug!(file_id = %entry.file_id, knowledge_id = %kb, "Detached orphaned artifact");
                        }
                        Err(ClientError::Cancelled) => return Err(SyncError::Cancelled),
                        Err(e) => {
                            warn!(path = %entry.path, error = %e, "Failed to detach orphaned artifact");
                            report.add_error(&entry.path, "detach", &e);
                        }
                    }
                }
                None => {
                    debug!(path = %entry.path, "Orphan has no knowledge binding, dropping from index only");
                }
            }

            self.index.remove(&orphan_key);
            report.orphans_removed += 1;
            info!(path = %entry.path, "Removed orphaned entry");
        }

        Ok(())
    }

    fn effective_knowledge(&self, knowledge_id: &str) -> Option<String> {
        if knowledge_id.is_empty() {
            self.fallback_knowledge_id.clone()
        } else {
            Some(knowledge_id.to_string())
        }
    }

    /// Per-file snapshot under `<storage>/files/<source>/<path>`, for
    /// operator debugging. Failure fails this file only.
    fn snapshot_locally(&self, source: &str, file: &SourceFile) -> SyncResult<()> {
        let mut path = self.storage_root.join("files").join(source);
        for component in Path::new(&file.path).components() {
            if let Component::Normal(part) = component {
                path.push(part);
            }
        }
        let display = path.display().to_string();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SyncError::Snapshot {
                path: display.clone(),
                source,
            })?;
        }
        std::fs::write(&path, &file.content).map_err(|source| SyncError::Snapshot {
            path: display,
            source,
        })
    }
}
