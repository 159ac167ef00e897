//! Upload registry and image store.
//!
//! Both are explicit handles owned by the caller (a server, a CLI run, a
//! test). Nothing here is global; an expiry sweep runs only when the owner
//! calls it.

use crate::error::Paper2EpubError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Registry key: a slug of the uploaded file's stem.
pub type UploadId = String;

/// A registered upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    pub registered_at: Instant,
}

/// What a client is told after uploading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub file_id: UploadId,
    pub filename: String,
    pub size: u64,
}

/// Uploaded PDFs waiting for conversion. Cheap to clone; clones share state.
///
/// Registering a filename whose slug is already present replaces the old
/// entry (last writer wins).
#[derive(Debug, Clone, Default)]
pub struct UploadRegistry {
    inner: Arc<Mutex<HashMap<UploadId, Upload>>>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UploadId, Upload>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a file already on disk.
    pub fn register(&self, path: impl Into<PathBuf>, filename: &str, size: u64) -> UploadId {
        let id = slug(filename);
        let upload = Upload {
            path: path.into(),
            filename: filename.to_string(),
            size,
            registered_at: Instant::now(),
        };
        if let Some(old) = self.lock().insert(id.clone(), upload) {
            debug!("Upload '{}' replaced {}", id, old.path.display());
        }
        info!("Registered upload '{}' ({} bytes)", id, size);
        id
    }

    /// Write `bytes` into `dir` as `<id>.pdf` and register it.
    pub async fn store(
        &self,
        dir: &Path,
        filename: &str,
        bytes: &[u8],
    ) -> Result<UploadReceipt, Paper2EpubError> {
        let id = slug(filename);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Paper2EpubError::OutputWriteFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;
        let path = dir.join(format!("{id}.pdf"));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Paper2EpubError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;
        let file_id = self.register(path, filename, bytes.len() as u64);
        Ok(UploadReceipt {
            file_id,
            filename: filename.to_string(),
            size: bytes.len() as u64,
        })
    }

    pub fn get(&self, id: &str) -> Option<Upload> {
        self.lock().get(id).cloned()
    }

    /// Remove the entry and hand it to the caller. The file is left on disk.
    pub fn take(&self, id: &str) -> Result<Upload, Paper2EpubError> {
        self.lock()
            .remove(id)
            .ok_or_else(|| Paper2EpubError::UnknownUpload { id: id.to_string() })
    }

    /// Remove the entry and delete its file. Returns `false` for unknown ids.
    pub fn remove(&self, id: &str) -> bool {
        match self.lock().remove(id) {
            Some(upload) => {
                discard_file(&upload.path);
                true
            }
            None => false,
        }
    }

    /// Drop (and delete) every upload registered longer than `age` ago.
    pub fn sweep_older_than(&self, age: Duration) -> usize {
        let mut expired = Vec::new();
        self.lock().retain(|_, u| {
            let keep = u.registered_at.elapsed() < age;
            if !keep {
                expired.push(u.path.clone());
            }
            keep
        });
        for path in &expired {
            discard_file(path);
        }
        if !expired.is_empty() {
            info!("Swept {} expired uploads", expired.len());
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

pub(crate) fn discard_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not delete {}: {}", path.display(), e);
        }
    }
}

/// Lower-case the file stem and keep `[a-z0-9_-]`, mapping anything else to
/// `-`. Never empty.
pub fn slug(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let out = out.trim_matches('-').to_string();
    if out.is_empty() {
        "upload".to_string()
    } else {
        out
    }
}

// ── Image store ──────────────────────────────────────────────────────────

/// Extracted figure images, staged per conversion session so an EPUB
/// renderer or a static file server can reach them.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
    url_prefix: Option<String>,
    retention: Duration,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: Option<String>, retention: Duration) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.map(|p| p.trim_end_matches('/').to_string()),
            retention,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session: &str) -> PathBuf {
        self.root.join(session)
    }

    /// Copy `images` into `<root>/<session>/`, keeping order and file names,
    /// and return one URL per image.
    ///
    /// URLs are `<prefix>/<session>/<file>`, or the staged file's absolute
    /// path when no prefix is configured.
    pub async fn stage(&self, session: &str, images: &[PathBuf]) -> Result<Vec<String>, Paper2EpubError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.session_dir(session);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Paper2EpubError::OutputWriteFailed {
                path: dir.clone(),
                source: e,
            })?;

        let mut urls = Vec::with_capacity(images.len());
        for (i, src) in images.iter().enumerate() {
            let name = src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("image_{}", i + 1));
            let dest = dir.join(&name);
            tokio::fs::copy(src, &dest)
                .await
                .map_err(|e| Paper2EpubError::OutputWriteFailed {
                    path: dest.clone(),
                    source: e,
                })?;
            urls.push(self.url_for(session, &name, &dest));
        }
        debug!("Staged {} images for session '{}'", urls.len(), session);
        Ok(urls)
    }

    fn url_for(&self, session: &str, name: &str, dest: &Path) -> String {
        match &self.url_prefix {
            Some(prefix) => format!("{prefix}/{session}/{name}"),
            None => std::path::absolute(dest)
                .unwrap_or_else(|_| dest.to_path_buf())
                .to_string_lossy()
                .into_owned(),
        }
    }

    /// Delete one session's images.
    pub fn remove_session(&self, session: &str) -> bool {
        let dir = self.session_dir(session);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Could not delete {}: {}", dir.display(), e);
                false
            }
        }
    }

    /// Delete every session directory older than the retention window.
    pub fn sweep_expired(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return 0;
        };
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| now.duration_since(t).ok());
            if age.is_some_and(|a| a >= self.retention) && std::fs::remove_dir_all(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Swept {} expired image sessions", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_from_filename() {
        assert_eq!(slug("My Paper (v2).pdf"), "my-paper-v2");
        assert_eq!(slug("attention_is_all.PDF"), "attention_is_all");
        assert_eq!(slug("???.pdf"), "upload");
        assert_eq!(slug(""), "upload");
    }

    #[test]
    fn register_get_take() {
        let reg = UploadRegistry::new();
        let id = reg.register("/tmp/a.pdf", "Paper.pdf", 10);
        assert_eq!(id, "paper");
        assert_eq!(reg.get("paper").unwrap().size, 10);

        let clone = reg.clone();
        let up = clone.take("paper").unwrap();
        assert_eq!(up.filename, "Paper.pdf");
        assert!(reg.is_empty());
        assert!(matches!(
            reg.take("paper").unwrap_err(),
            Paper2EpubError::UnknownUpload { .. }
        ));
    }

    #[test]
    fn last_writer_wins() {
        let reg = UploadRegistry::new();
        reg.register("/tmp/one.pdf", "paper.pdf", 1);
        reg.register("/tmp/two.pdf", "paper.pdf", 2);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("paper").unwrap().path, PathBuf::from("/tmp/two.pdf"));
    }

    #[test]
    fn remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        let reg = UploadRegistry::new();
        let id = reg.register(&path, "x.pdf", 4);
        assert!(reg.remove(&id));
        assert!(!path.exists());
        assert!(!reg.remove(&id));
    }

    #[test]
    fn sweep_removes_old_uploads() {
        let reg = UploadRegistry::new();
        reg.register("/nonexistent/a.pdf", "a.pdf", 1);
        assert_eq!(reg.sweep_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(reg.sweep_older_than(Duration::ZERO), 1);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn store_writes_and_registers() {
        let dir = tempfile::tempdir().unwrap();
        let reg = UploadRegistry::new();
        let receipt = reg.store(dir.path(), "Deep Nets.pdf", b"%PDF-1.4").await.unwrap();
        assert_eq!(receipt.file_id, "deep-nets");
        assert_eq!(receipt.size, 8);
        let up = reg.get("deep-nets").unwrap();
        assert_eq!(std::fs::read(up.path).unwrap(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn stage_preserves_order_and_builds_urls() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("_page_1_Figure_1.png");
        let b = src.path().join("_page_3_Figure_2.png");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let root = tempfile::tempdir().unwrap();
        let store = ImageStore::new(root.path(), Some("/temp_images/".into()), Duration::from_secs(3600));
        let urls = store.stage("paper", &[a, b]).await.unwrap();
        assert_eq!(
            urls,
            [
                "/temp_images/paper/_page_1_Figure_1.png",
                "/temp_images/paper/_page_3_Figure_2.png"
            ]
        );
        assert!(root.path().join("paper/_page_3_Figure_2.png").exists());

        assert!(store.remove_session("paper"));
        assert!(!store.remove_session("paper"));
    }

    #[tokio::test]
    async fn stage_without_prefix_uses_paths() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("fig.png");
        std::fs::write(&a, b"a").unwrap();
        let root = tempfile::tempdir().unwrap();
        let store = ImageStore::new(root.path(), None, Duration::from_secs(60));
        let urls = store.stage("s", &[a]).await.unwrap();
        assert!(Path::new(&urls[0]).is_absolute());
        assert!(Path::new(&urls[0]).exists());
    }

    #[test]
    fn sweep_expired_respects_retention() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("old")).unwrap();
        let keep = ImageStore::new(root.path(), None, Duration::from_secs(3600));
        assert_eq!(keep.sweep_expired(), 0);
        let purge = ImageStore::new(root.path(), None, Duration::ZERO);
        assert_eq!(purge.sweep_expired(), 1);
        assert!(!root.path().join("old").exists());
    }
}
