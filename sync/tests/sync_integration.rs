//! End-to-end reconciliation scenarios over in-memory doubles.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use adapters::Adapter;
use sync::{SyncError, SyncManager, DOWNSTREAM_SOURCE};
use testing::{source_file, MockKnowledgeClient, StaticAdapter};
use tokio_util::sync::CancellationToken;

fn manager_with(
    client: &Arc<MockKnowledgeClient>,
    storage: &Path,
    fallback: Option<&str>,
) -> SyncManager {
    SyncManager::new(
        client.clone() as Arc<dyn openwebui::KnowledgeClient>,
        storage,
        fallback.map(str::to_string),
    )
    .unwrap()
}

fn adapter(name: &str, files: Vec<adapters::SourceFile>) -> Arc<dyn Adapter> {
    Arc::new(StaticAdapter::new(name, files))
}

#[tokio::test]
async fn first_run_uploads_and_attaches() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let docs = adapter(
        "docs",
        vec![source_file("a/README.md", b"hello\n", "K1")],
    );
    let report = manager.run_cycle(&[docs], &cancel).await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(client.upload_count(), 1);
    assert_eq!(client.attach_count(), 1);
    assert_eq!(
        client.attached.lock().unwrap()[0],
        ("K1".to_string(), "file-0".to_string())
    );

    let entry = manager.index().get("README.md").unwrap();
    assert_eq!(entry.path, "a/README.md");
    assert_eq!(entry.fingerprint, utils::fingerprint_bytes(b"hello\n"));
    assert_eq!(entry.file_id, "file-0");
    assert_eq!(entry.knowledge_id, "K1");
    assert_eq!(entry.source, "docs");

    // The per-file snapshot lands under the storage root.
    assert!(dir.path().join("files/docs/a/README.md").exists());
}

#[tokio::test]
async fn unchanged_rerun_performs_no_work() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let docs = adapter("docs", vec![source_file("a/README.md", b"hello\n", "K1")]);
    manager.run_cycle(&[docs.clone()], &cancel).await.unwrap();
    let report = manager.run_cycle(&[docs], &cancel).await.unwrap();

    assert_eq!(report.uploaded, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(client.upload_count(), 1);
    assert_eq!(client.attach_count(), 1);
    assert_eq!(client.detach_count(), 0);
}

#[tokio::test]
async fn content_change_detaches_reuploads_reattaches() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let docs = adapter("docs", vec![source_file("a/README.md", b"hello\n", "K1")]);
    manager.run_cycle(&[docs], &cancel).await.unwrap();

    let changed = adapter("docs", vec![source_file("a/README.md", b"hello2\n", "K1")]);
    let report = manager.run_cycle(&[changed], &cancel).await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(client.detach_count(), 1);
    assert_eq!(
        client.detached.lock().unwrap()[0],
        ("K1".to_string(), "file-0".to_string())
    );
    assert_eq!(client.upload_count(), 2);
    assert_eq!(client.attach_count(), 2);

    let entry = manager.index().get("README.md").unwrap();
    assert_eq!(entry.fingerprint, utils::fingerprint_bytes(b"hello2\n"));
    assert_eq!(entry.file_id, "file-1");
}

#[tokio::test]
async fn knowledge_migration_rebinds_without_detach() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let docs = adapter("docs", vec![source_file("a/README.md", b"hello\n", "K1")]);
    manager.run_cycle(&[docs], &cancel).await.unwrap();

    let moved = adapter("docs", vec![source_file("a/README.md", b"hello\n", "K2")]);
    let report = manager.run_cycle(&[moved], &cancel).await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(report.migrated, 1);
    assert_eq!(client.detach_count(), 0);
    assert_eq!(client.upload_count(), 2);
    assert_eq!(
        client.attached.lock().unwrap()[1],
        ("K2".to_string(), "file-1".to_string())
    );

    let entry = manager.index().get("README.md").unwrap();
    assert_eq!(entry.knowledge_id, "K2");
    assert_eq!(entry.file_id, "file-1");
}

#[tokio::test]
async fn same_basename_same_content_skips() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let docs = adapter("docs", vec![source_file("README.md", b"same\n", "K1")]);
    manager.run_cycle(&[docs], &cancel).await.unwrap();

    // Same basename under a new directory, identical content.
    let moved = adapter("docs", vec![source_file("docs/README.md", b"same\n", "K1")]);
    let report = manager.run_cycle(&[moved], &cancel).await.unwrap();

    assert_eq!(report.uploaded, 0);
    assert_eq!(client.upload_count(), 1);
}

#[tokio::test]
async fn rename_with_same_content_rekeys_without_upload() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let docs = adapter("docs", vec![source_file("README.md", b"guide text\n", "K1")]);
    manager.run_cycle(&[docs], &cancel).await.unwrap();
    let old_id = manager.index().get("README.md").unwrap().file_id.clone();

    let renamed = adapter("docs", vec![source_file("GUIDE.md", b"guide text\n", "K1")]);
    let report = manager.run_cycle(&[renamed], &cancel).await.unwrap();

    assert_eq!(report.uploaded, 0);
    assert_eq!(report.renamed, 1);
    assert_eq!(client.upload_count(), 1);

    assert!(manager.index().get("README.md").is_none());
    let entry = manager.index().get("GUIDE.md").unwrap();
    assert_eq!(entry.path, "GUIDE.md");
    assert_eq!(entry.file_id, old_id);
}

#[tokio::test]
async fn reimport_rebuilds_index_from_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    client.seed_knowledge_file("K1", "remote-1", "existing.md");
    client.seed_knowledge_file("K2", "remote-2", "other.md");

    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let mut ids = BTreeSet::new();
    ids.insert("K1".to_string());
    let imported = manager.initialize_index(&ids, &cancel).await.unwrap();

    // Only the referenced knowledge base is imported.
    assert_eq!(imported, 1);
    let entry = manager.index().get("existing.md").unwrap();
    assert_eq!(entry.file_id, "remote-1");
    assert_eq!(entry.source, DOWNSTREAM_SOURCE);
    assert_eq!(entry.knowledge_id, "K1");
}

#[tokio::test]
async fn reimported_entries_are_reuploaded_even_when_content_matches() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    client.seed_knowledge_file("K1", "remote-1", "existing.md");

    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();
    let mut ids = BTreeSet::new();
    ids.insert("K1".to_string());
    manager.initialize_index(&ids, &cancel).await.unwrap();

    // The adapter claims the same basename; the stored fingerprint is not
    // trustworthy, so the file is uploaded unconditionally.
    let docs = adapter("docs", vec![source_file("existing.md", b"fresh\n", "K1")]);
    let report = manager.run_cycle(&[docs], &cancel).await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(client.upload_count(), 1);
    // The stale downstream artifact was detached before the re-upload.
    assert_eq!(client.detach_count(), 1);

    let entry = manager.index().get("existing.md").unwrap();
    assert_eq!(entry.source, "docs");
    assert_eq!(entry.fingerprint, utils::fingerprint_bytes(b"fresh\n"));
}

#[tokio::test]
async fn orphaned_reimported_entries_are_detached_and_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    client.seed_knowledge_file("K1", "remote-gone", "gone.md");

    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();
    let mut ids = BTreeSet::new();
    ids.insert("K1".to_string());
    manager.initialize_index(&ids, &cancel).await.unwrap();

    // No adapter claims gone.md.
    let docs = adapter("docs", vec![]);
    let report = manager.run_cycle(&[docs], &cancel).await.unwrap();

    assert_eq!(report.orphans_removed, 1);
    assert_eq!(client.detach_count(), 1);
    assert_eq!(
        client.detached.lock().unwrap()[0],
        ("K1".to_string(), "remote-gone".to_string())
    );
    assert!(manager.index().get("gone.md").is_none());
}

#[tokio::test]
async fn adapter_sourced_entries_survive_empty_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let docs = adapter("docs", vec![source_file("kept.md", b"data\n", "K1")]);
    manager.run_cycle(&[docs], &cancel).await.unwrap();

    // The file disappears from the snapshot, but the entry is
    // adapter-sourced, so it is retained.
    let empty = adapter("docs", vec![]);
    let report = manager.run_cycle(&[empty], &cancel).await.unwrap();

    assert_eq!(report.orphans_removed, 0);
    assert_eq!(client.detach_count(), 0);
    assert!(manager.index().get("kept.md").is_some());
}

#[tokio::test]
async fn failed_adapter_fetch_never_orphans_its_entries() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let docs = Arc::new(StaticAdapter::new(
        "docs",
        vec![source_file("kept.md", b"data\n", "K1")],
    ));
    manager
        .run_cycle(&[docs.clone() as Arc<dyn Adapter>], &cancel)
        .await
        .unwrap();

    docs.set_fail(true);
    let report = manager
        .run_cycle(&[docs as Arc<dyn Adapter>], &cancel)
        .await
        .unwrap();

    assert_eq!(report.adapter_failures, 1);
    assert!(report.has_errors());
    assert_eq!(report.orphans_removed, 0);
    assert!(manager.index().get("kept.md").is_some());
}

#[tokio::test]
async fn basename_collision_last_writer_wins_with_two_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let first = adapter("alpha", vec![source_file("notes.md", b"alpha notes\n", "K1")]);
    let second = adapter("beta", vec![source_file("team/notes.md", b"beta notes\n", "K2")]);
    let report = manager.run_cycle(&[first, second], &cancel).await.unwrap();

    // Different targets: both upload; the later writer owns the entry.
    assert_eq!(report.uploaded, 2);
    assert_eq!(client.upload_count(), 2);

    let entry = manager.index().get("notes.md").unwrap();
    assert_eq!(entry.source, "beta");
    assert_eq!(entry.knowledge_id, "K2");
    assert_eq!(entry.path, "team/notes.md");
}

#[tokio::test]
async fn fallback_knowledge_id_applies_to_unbound_files() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), Some("K-default"));
    let cancel = CancellationToken::new();

    let docs = adapter("docs", vec![source_file("loose.md", b"x\n", "")]);
    manager.run_cycle(&[docs], &cancel).await.unwrap();

    assert_eq!(
        client.attached.lock().unwrap()[0].0,
        "K-default".to_string()
    );
    assert_eq!(
        manager.index().get("loose.md").unwrap().knowledge_id,
        "K-default"
    );
}

#[tokio::test]
async fn unbound_file_without_fallback_uploads_but_skips_attach() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let docs = adapter("docs", vec![source_file("loose.md", b"x\n", "")]);
    let report = manager.run_cycle(&[docs], &cancel).await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(report.attach_skipped, 1);
    assert_eq!(client.upload_count(), 1);
    assert_eq!(client.attach_count(), 0);
    // The file is still tracked as uploaded.
    assert!(manager.index().get("loose.md").is_some());
}

#[tokio::test]
async fn per_file_upload_failure_is_confined() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    client
        .fail_uploads
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let docs = adapter("docs", vec![source_file("a.md", b"x\n", "K1")]);
    let report = manager.run_cycle(&[docs], &cancel).await.unwrap();

    assert_eq!(report.uploaded, 0);
    assert!(report.has_errors());
    assert!(manager.index().get("a.md").is_none());
}

#[tokio::test]
async fn index_survives_restart_and_prevents_reupload() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let cancel = CancellationToken::new();
    let snapshot = vec![source_file("a/README.md", b"hello\n", "K1")];

    {
        let mut manager = manager_with(&client, dir.path(), None);
        let docs = adapter("docs", snapshot.clone());
        manager.run_cycle(&[docs], &cancel).await.unwrap();
    }

    // A fresh manager over the same storage root loads the saved index.
    let mut manager = manager_with(&client, dir.path(), None);
    let docs = adapter("docs", snapshot);
    let report = manager.run_cycle(&[docs], &cancel).await.unwrap();

    assert_eq!(report.uploaded, 0);
    assert_eq!(client.upload_count(), 1);
}

#[tokio::test]
async fn cancelled_cycle_aborts_without_uploading() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let docs = adapter("docs", vec![source_file("a.md", b"x\n", "K1")]);
    let result = manager.run_cycle(&[docs], &cancel).await;
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert_eq!(client.upload_count(), 0);
}

#[tokio::test]
async fn last_sync_advances_only_for_successful_adapters() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockKnowledgeClient::new());
    let mut manager = manager_with(&client, dir.path(), None);
    let cancel = CancellationToken::new();

    let ok = Arc::new(StaticAdapter::new("ok", vec![]));
    let broken = Arc::new(StaticAdapter::failing("broken"));
    let ok_before = ok.last_sync();
    let broken_before = broken.last_sync();

    manager
        .run_cycle(
            &[ok.clone() as Arc<dyn Adapter>, broken.clone() as Arc<dyn Adapter>],
            &cancel,
        )
        .await
        .unwrap();

    assert!(ok.last_sync() > ok_before);
    assert_eq!(broken.last_sync(), broken_before);
}
