//! Local folder adapter: mapped directories on the host filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::LocalFolderConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{AdapterError, AdapterResult};
use crate::{Adapter, SourceFile, SyncStamp};

const IGNORED_DIR_FRAGMENTS: &[&str] = &[
    "node_modules",
    "vendor",
    ".git",
    ".svn",
    ".hg",
    "__pycache__",
    ".pytest_cache",
    ".coverage",
];

const IGNORED_FILENAMES: &[&str] = &["thumbs.db", ".ds_store", "desktop.ini"];

const IGNORED_EXTENSIONS: &[&str] = &[".log", ".tmp", ".temp", ".swp", ".swo"];

pub struct LocalFolderAdapter {
    mappings: Vec<(PathBuf, String)>,
    last_sync: SyncStamp,
}

impl LocalFolderAdapter {
    pub fn new(config: &LocalFolderConfig) -> AdapterResult<Self> {
        let mut mappings = Vec::new();
        for mapping in &config.mappings {
            if !mapping.folder_path.is_dir() {
                return Err(AdapterError::Configuration {
                    message: format!(
                        "local folder does not exist: {}",
                        mapping.folder_path.display()
                    ),
                });
            }
            mappings.push((mapping.folder_path.clone(), mapping.knowledge_id.clone()));
        }

        if mappings.is_empty() {
            return Err(AdapterError::Configuration {
                message: "at least one local folder mapping must be configured".to_string(),
            });
        }

        Ok(Self {
            mappings,
            last_sync: SyncStamp::new(),
        })
    }

    fn scan_folder(
        &self,
        root: &Path,
        knowledge_id: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<SourceFile>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(root).follow_links(false) {
            if cancel.is_cancelled() {
                return Err(AdapterError::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(folder = %root.display(), error = %e, "Skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let filename = entry.file_name().to_string_lossy().to_string();
            if should_ignore(&filename) {
                continue;
            }

            let content = match std::fs::read(entry.path()) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Failed to read file");
                    continue;
                }
            };
            if looks_binary(&content) {
                debug!(path = %entry.path().display(), "Skipping binary file");
                continue;
            }

            let modified_at = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);

            let rel_path = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");

            files.push(SourceFile::new(
                rel_path,
                content,
                modified_at,
                "local",
                knowledge_id,
            ));
        }

        Ok(files)
    }
}

#[async_trait]
impl Adapter for LocalFolderAdapter {
    fn name(&self) -> &str {
        "local"
    }

    async fn fetch_files(&self, cancel: &CancellationToken) -> AdapterResult<Vec<SourceFile>> {
        let mut files = Vec::new();
        for (root, knowledge_id) in &self.mappings {
            match self.scan_folder(root, knowledge_id, cancel) {
                Ok(folder_files) => {
                    debug!(
                        folder = %root.display(),
                        count = folder_files.len(),
                        knowledge_id,
                        "Scanned local folder"
                    );
                    files.extend(folder_files);
                }
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) => {
                    warn!(folder = %root.display(), error = %e, "Failed to scan folder");
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

fn should_ignore(filename: &str) -> bool {
    if filename.starts_with('.') {
        return true;
    }
    let lower = filename.to_lowercase();
    if IGNORED_FILENAMES.contains(&lower.as_str()) {
        return true;
    }
    if IGNORED_DIR_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
    {
        return true;
    }
    IGNORED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Null bytes or a high ratio of non-printable bytes in the first KiB.
fn looks_binary(content: &[u8]) -> bool {
    if content.is_empty() {
        return false;
    }
    let sample = &content[..content.len().min(1024)];
    if sample.contains(&0) {
        return true;
    }
    let non_printable = sample
        .iter()
        .filter(|&&b| b < 32 && b != b'\t' && b != b'\n' && b != b'\r')
        .count();
    non_printable as f64 / sample.len() as f64 > 0.3
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FolderMapping;

    fn config_for(root: &Path) -> LocalFolderConfig {
        LocalFolderConfig {
            enabled: true,
            mappings: vec![FolderMapping {
                folder_path: root.to_path_buf(),
                knowledge_id: "K1".to_string(),
            }],
        }
    }

    #[test]
    fn rejects_missing_folder() {
        let config = config_for(Path::new("/nonexistent/folder"));
        assert!(matches!(
            LocalFolderAdapter::new(&config),
            Err(AdapterError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn scans_nested_files_with_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("README.md"), "# top\n").unwrap();
        std::fs::write(dir.path().join("docs/guide.md"), "# nested\n").unwrap();

        let adapter = LocalFolderAdapter::new(&config_for(dir.path())).unwrap();
        let cancel = CancellationToken::new();
        let mut files = adapter.fetch_files(&cancel).await.unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "README.md");
        assert_eq!(files[1].path, "docs/guide.md");
        assert_eq!(files[0].knowledge_id, "K1");
        assert_eq!(files[0].source, "local");
        assert_eq!(
            files[0].fingerprint,
            utils::fingerprint_bytes(b"# top\n")
        );
    }

    #[tokio::test]
    async fn filters_hidden_binary_and_ignored_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.md"), "text").unwrap();
        std::fs::write(dir.path().join(".hidden"), "secret").unwrap();
        std::fs::write(dir.path().join("trace.log"), "noise").unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0u8, 159, 146, 150]).unwrap();

        let adapter = LocalFolderAdapter::new(&config_for(dir.path())).unwrap();
        let cancel = CancellationToken::new();
        let files = adapter.fetch_files(&cancel).await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "keep.md");
    }

    #[tokio::test]
    async fn cancellation_aborts_scan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "x").unwrap();

        let adapter = LocalFolderAdapter::new(&config_for(dir.path())).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            adapter.fetch_files(&cancel).await,
            Err(AdapterError::Cancelled)
        ));
    }

    #[test]
    fn binary_detection() {
        assert!(looks_binary(b"\x00\x01\x02"));
        assert!(!looks_binary(b"plain text\nwith lines\n"));
        assert!(!looks_binary(b""));
    }
}
