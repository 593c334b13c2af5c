//! src/services/storage_service.rs
//!
//! StorageService — the capability contract every storage backend implements.
//! The four drivers in this crate (disk, S3, GCS, null) each normalize their
//! native error vocabulary into [`StorageError`] at this boundary, so callers
//! above (variant engine, serving server) never see backend-specific codes.

use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, future, stream, stream::BoxStream};
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::models::UploadOptions;
use crate::services::transform_service::TransformError;

/// Body type shared by uploads and downloads. The consumer owns the stream;
/// dropping it releases whatever backend resource feeds it.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// HTTP verb a presigned URL is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMethod {
    Get,
    Put,
    Head,
    Delete,
}

impl SignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignMethod::Get => "GET",
            SignMethod::Put => "PUT",
            SignMethod::Head => "HEAD",
            SignMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("operation not supported by this backend")]
    Unsupported,
    #[error(transparent)]
    Transform(#[from] TransformError),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Uniform contract over heterogeneous object-storage backends.
///
/// Semantics every implementation must honor:
/// - `upload` has overwrite-or-create semantics and creates any intermediate
///   structure (directories, prefixes) transparently.
/// - `delete` of an absent key is success, not an error.
/// - `delete_prefixed` matches the literal prefix, paginates internally where
///   the backend bounds listing pages, and treats zero matches as success.
/// - `exist` returns `Ok(false)` only for confirmed absence; an indeterminate
///   check (network or IO fault) is an `Err`.
/// - `url` is pure and non-failing; it joins the configured endpoint with the
///   key path.
/// - `sign_url` issues a backend-native presigned URL, or
///   [`StorageError::Unsupported`] where the backend has no such concept.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Store `body` under `key`, replacing any existing object.
    async fn upload(
        &self,
        key: &str,
        body: ByteStream,
        options: &UploadOptions,
    ) -> StorageResult<()>;

    /// Open the object at `key` for reading. The caller owns the stream.
    async fn download(&self, key: &str) -> StorageResult<ByteStream>;

    /// Copy the object at `src` to `dst` within the same backend.
    async fn copy(&self, src: &str, dst: &str, options: &UploadOptions) -> StorageResult<()>;

    /// Remove the object at `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Remove several objects, surfacing the first error encountered.
    async fn delete_batch(&self, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// Remove every object whose key starts with `prefix`.
    async fn delete_prefixed(&self, prefix: &str) -> StorageResult<()>;

    /// Check whether an object exists at `key`.
    async fn exist(&self, key: &str) -> StorageResult<bool>;

    /// Deliverable absolute URL for the object at `key`.
    fn url(&self, key: &str) -> String;

    /// Backend-native presigned URL for `method` on `key`, valid for
    /// `expires_in`, plus any headers the request must carry.
    async fn sign_url(
        &self,
        key: &str,
        method: SignMethod,
        expires_in: Duration,
    ) -> StorageResult<(String, HeaderMap)>;
}

/// Join a configured endpoint and a key into a single URL path, tolerating
/// stray slashes on either side.
pub fn join_url(endpoint: &str, key: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}

/// Content type inferred from a key's extension.
///
/// Covers the formats this crate produces plus the handful of types the
/// static route commonly serves. `image/heic` is special-cased since it is
/// missing from most platform mime databases.
pub fn mime_type_for_key(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "heic" | "heif" => "image/heic",
        "avif" => "image/avif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Wrap an in-memory buffer as a one-chunk [`ByteStream`].
pub fn stream_from_bytes(bytes: Bytes) -> ByteStream {
    Box::pin(stream::once(future::ready(Ok(bytes))))
}

/// A [`ByteStream`] that yields nothing.
pub fn empty_stream() -> ByteStream {
    Box::pin(stream::empty())
}

/// Drain a [`ByteStream`] into a single contiguous buffer.
pub async fn collect_stream(mut body: ByteStream) -> io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}
