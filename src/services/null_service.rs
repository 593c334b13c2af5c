//! src/services/null_service.rs
//!
//! NullService — accepts every operation and stores nothing. Useful for
//! wiring tests and for running the serving layer without a real backend.

use async_trait::async_trait;
use axum::http::HeaderMap;
use std::time::Duration;

use crate::models::UploadOptions;
use crate::services::storage_service::{
    ByteStream, SignMethod, StorageError, StorageResult, StorageService, empty_stream,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct NullService;

impl NullService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageService for NullService {
    async fn upload(
        &self,
        _key: &str,
        _body: ByteStream,
        _options: &UploadOptions,
    ) -> StorageResult<()> {
        Ok(())
    }

    /// Always succeeds with an empty body; nothing is ever stored.
    async fn download(&self, _key: &str) -> StorageResult<ByteStream> {
        Ok(empty_stream())
    }

    async fn copy(&self, _src: &str, _dst: &str, _options: &UploadOptions) -> StorageResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn delete_prefixed(&self, _prefix: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn exist(&self, _key: &str) -> StorageResult<bool> {
        Ok(false)
    }

    fn url(&self, _key: &str) -> String {
        String::new()
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
