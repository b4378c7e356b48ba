//! Shared helpers: content fingerprinting and cancellation-aware retry.

pub mod retry;

use sha2::{Digest, Sha256};

/// Compute the lowercase SHA-256 hex fingerprint of a byte slice.
///
/// The fingerprint is the sole content-change signal used by the sync
/// engine: identical bytes always produce identical fingerprints.
///
/// # Examples
///
/// ```
/// use utils::fingerprint_bytes;
///
/// let fp = fingerprint_bytes(b"hello\n");
/// assert_eq!(fp.len(), 64);
/// assert_eq!(fp, fingerprint_bytes(b"hello\n"));
/// ```
#[must_use]
pub fn fingerprint_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// The filename portion of a logical path, directories stripped.
///
/// Logical paths use `/` separators; `\` is also treated as a separator for
/// Windows-originated sources.
#[must_use]
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint_bytes(b"test content");
        let b = fingerprint_bytes(b"test content");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_differs_on_content() {
        assert_ne!(fingerprint_bytes(b"a"), fingerprint_bytes(b"b"));
    }

    #[test]
    fn fingerprint_known_vector() {
        assert_eq!(
            fingerprint_bytes(b"test content"),
            "6ae8a75555209fd6c44157c0aed8016e763ff435a19cf186f76863140143ff72"
        );
    }

    #[test]
    fn basename_strips_directories() {
        assert_eq!(basename("a/b/README.md"), "README.md");
        assert_eq!(basename("README.md"), "README.md");
        assert_eq!(basename("docs\\guide.md"), "guide.md");
        assert_eq!(basename("trailing/"), "");
    }
}
