//! In-memory test doubles shared by the engine and serving unit tests.

use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::models::{UploadOptions, VariantFormat, VariantOptions};
use crate::services::storage_service::{
    ByteStream, SignMethod, StorageError, StorageResult, StorageService, collect_stream, join_url,
    stream_from_bytes,
};
use crate::services::transform_service::{TransformError, Transformer};

struct StoredObject {
    body: Bytes,
    content_type: Option<String>,
}

/// Hash-map backed storage backend.
pub(crate) struct MemoryService {
    endpoint: String,
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryService {
    pub(crate) fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, key: impl Into<String>, body: Bytes) {
        self.objects.lock().unwrap().insert(
            key.into(),
            StoredObject {
                body,
                content_type: None,
            },
        );
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub(crate) fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .and_then(|obj| obj.content_type.clone())
    }
}

#[async_trait]
impl StorageService for MemoryService {
    async fn upload(
        &self,
        key: &str,
        body: ByteStream,
        options: &UploadOptions,
    ) -> StorageResult<()> {
        let body = collect_stream(body).await?;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: options.content_type.clone(),
            },
        );
        Ok(())
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        let objects = self.objects.lock().unwrap();
        match objects.get(key) {
            Some(obj) => Ok(stream_from_bytes(obj.body.clone())),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn copy(&self, src: &str, dst: &str, options: &UploadOptions) -> StorageResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let Some(existing) = objects.get(src) else {
            return Err(StorageError::NotFound(src.to_string()));
        };
        let copied = StoredObject {
            body: existing.body.clone(),
            content_type: options
                .content_type
                .clone()
                .or_else(|| existing.content_type.clone()),
        };
        objects.insert(dst.to_string(), copied);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_prefixed(&self, prefix: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn exist(&self, key: &str) -> StorageResult<bool> {
        Ok(self.contains(key))
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

/// Transformer double that counts invocations and emits synthetic bytes.
pub(crate) struct CountingTransformer {
    calls: AtomicUsize,
}

impl CountingTransformer {
    pub(crate) fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transformer for CountingTransformer {
    async fn transform(
        &self,
        _options: &VariantOptions,
        format: VariantFormat,
        source: Bytes,
    ) -> Result<Bytes, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(format!("transformed({}):{}", format, source.len())))
    }
}
