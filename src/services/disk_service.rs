//! src/services/disk_service.rs
//!
//! DiskService — local-filesystem backend. Object payloads live directly
//! beneath a root directory, with the `/`-separated key mapped onto the
//! directory tree. Writes are atomic (temp file + rename) so a crashed upload
//! never leaves a partial object at the final key.

use async_trait::async_trait;
use axum::http::HeaderMap;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use crate::models::UploadOptions;
use crate::services::storage_service::{
    ByteStream, SignMethod, StorageError, StorageResult, StorageService, join_url,
};

use futures::StreamExt;

const MAX_KEY_LEN: usize = 1024;

/// Local-disk driver.
///
/// ACL and content-type upload options have no filesystem equivalent and are
/// ignored silently. `sign_url` always reports Unsupported.
pub struct DiskService {
    root: PathBuf,
    endpoint: String,
}

impl DiskService {
    /// `root` is the payload directory, `endpoint` the public URL prefix the
    /// static route serves that directory under.
    pub fn new(root: impl Into<PathBuf>, endpoint: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that are empty, begin with `/`, or contain `..`, plus
    /// control characters and backslashes that have no place in a key.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        self.ensure_key_safe(key)?;
        Ok(self.root.join(key))
    }

    /// Recursively remove empty directories up to the storage root.
    ///
    /// Stops on the first non-empty or missing directory, or at the root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageService for DiskService {
    /// Stream the body to a temporary file, fsync, then atomically rename
    /// into place. Intermediate directories are created as needed.
    async fn upload(
        &self,
        key: &str,
        mut body: ByteStream,
        _options: &UploadOptions,
    ) -> StorageResult<()> {
        let file_path = self.object_path(key)?;
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        Ok(())
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        let file_path = self.object_path(key)?;
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn copy(&self, src: &str, dst: &str, _options: &UploadOptions) -> StorageResult<()> {
        let src_path = self.object_path(src)?;
        let dst_path = self.object_path(dst)?;
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src_path, &dst_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(src.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let file_path = self.object_path(key)?;
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("{} already missing", file_path.display());
                return Ok(());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Walk the subtree the prefix points into and remove every file whose
    /// key starts with the literal prefix. Zero matches is success.
    async fn delete_prefixed(&self, prefix: &str) -> StorageResult<()> {
        self.ensure_key_safe(prefix)?;

        // Only descend into the deepest directory the prefix fully names.
        let base_dir = match prefix.rsplit_once('/') {
            Some((dir, _)) => self.root.join(dir),
            None => self.root.clone(),
        };

        let mut removed_parents: Vec<PathBuf> = Vec::new();
        let mut stack = vec![base_dir];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let Some(rel_key) = rel.to_str() else {
                    continue;
                };
                if rel_key.starts_with(prefix) {
                    fs::remove_file(&path).await?;
                    debug!("removed {}", path.display());
                    if let Some(parent) = path.parent() {
                        removed_parents.push(parent.to_path_buf());
                    }
                }
            }
        }

        removed_parents.sort();
        removed_parents.dedup();
        for parent in removed_parents {
            self.prune_empty_dirs(&parent).await;
        }
        Ok(())
    }

    async fn exist(&self, key: &str) -> StorageResult<bool> {
        let file_path = self.object_path(key)?;
        match fs::metadata(&file_path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    fn url(&self, key: &str) -> String {
        join_url(&self.endpoint, key)
    }

    async fn sign_url(
        &self,
        _key: &str,
        _method: SignMethod,
        _expires_in: Duration,
    ) -> StorageResult<(String, HeaderMap)> {
        Err(StorageError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage_service::{collect_stream, stream_from_bytes};
    use bytes::Bytes;
    use tempfile::tempdir;

    fn service(dir: &tempfile::TempDir) -> DiskService {
        DiskService::new(dir.path(), "http://localhost:8080/disk")
    }

    async fn put(svc: &DiskService, key: &str, body: &'static [u8]) {
        svc.upload(
            key,
            stream_from_bytes(Bytes::from_static(body)),
            &UploadOptions::default(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn upload_download_round_trip() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        put(&svc, "images/nested/test.png", b"payload").await;
        let body = svc.download("images/nested/test.png").await.unwrap();
        assert_eq!(&collect_stream(body).await.unwrap()[..], b"payload");
    }

    #[tokio::test]
    async fn upload_overwrites_existing_object() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        put(&svc, "a.txt", b"one").await;
        put(&svc, "a.txt", b"two").await;
        let body = svc.download("a.txt").await.unwrap();
        assert_eq!(&collect_stream(body).await.unwrap()[..], b"two");
    }

    #[tokio::test]
    async fn download_missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        match svc.download("missing.png").await {
            Err(StorageError::NotFound(key)) => assert_eq!(key, "missing.png"),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        put(&svc, "gone.txt", b"x").await;
        svc.delete("gone.txt").await.unwrap();
        svc.delete("gone.txt").await.unwrap();
        assert!(!svc.exist("gone.txt").await.unwrap());
    }

    #[tokio::test]
    async fn delete_batch_removes_all_keys_and_tolerates_absent_ones() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        put(&svc, "a.txt", b"x").await;
        put(&svc, "nested/b.txt", b"x").await;

        svc.delete_batch(&[
            "a.txt".to_string(),
            "nested/b.txt".to_string(),
            "never-existed.txt".to_string(),
        ])
        .await
        .unwrap();

        assert!(!svc.exist("a.txt").await.unwrap());
        assert!(!svc.exist("nested/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn exist_reports_confirmed_absence() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        assert!(!svc.exist("nope.jpg").await.unwrap());
        put(&svc, "yes.jpg", b"x").await;
        assert!(svc.exist("yes.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn copy_duplicates_object() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        put(&svc, "src.txt", b"data").await;
        svc.copy("src.txt", "copies/dst.txt", &UploadOptions::default())
            .await
            .unwrap();
        let body = svc.download("copies/dst.txt").await.unwrap();
        assert_eq!(&collect_stream(body).await.unwrap()[..], b"data");
        assert!(svc.exist("src.txt").await.unwrap());
    }

    #[tokio::test]
    async fn delete_prefixed_matches_literal_prefix() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        put(&svc, "variants/images/a-1.jpeg", b"x").await;
        put(&svc, "variants/images/ab.jpeg", b"x").await;
        put(&svc, "variants/other/c.jpeg", b"x").await;

        svc.delete_prefixed("variants/images/a").await.unwrap();

        assert!(!svc.exist("variants/images/a-1.jpeg").await.unwrap());
        assert!(!svc.exist("variants/images/ab.jpeg").await.unwrap());
        assert!(svc.exist("variants/other/c.jpeg").await.unwrap());
    }

    #[tokio::test]
    async fn delete_prefixed_with_no_matches_succeeds() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);
        svc.delete_prefixed("variants/never-seen/").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_unsafe_keys() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);

        for key in ["", "/absolute", "../escape", "a/../../b"] {
            match svc.exist(key).await {
                Err(StorageError::InvalidKey(_)) => {}
                other => panic!("key {key:?} should be rejected, got {:?}", other.ok()),
            }
        }
    }

    #[tokio::test]
    async fn sign_url_is_unsupported() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);
        assert!(matches!(
            svc.sign_url("k", SignMethod::Get, Duration::from_secs(60)).await,
            Err(StorageError::Unsupported)
        ));
    }

    #[test]
    fn url_joins_endpoint_and_key() {
        let dir = tempdir().unwrap();
        let svc = service(&dir);
        assert_eq!(
            svc.url("images/test.png"),
            "http://localhost:8080/disk/images/test.png"
        );
    }
}
