//! src/services/s3_service.rs
//!
//! S3Service — AWS S3 (and S3-compatible) backend. Objects are written with
//! intelligent-tiering storage class and a content type inferred from the key
//! unless the caller overrides it. NotFound normalization happens here: the
//! SDK's `NoSuchKey`/`NotFound` codes become [`StorageError::NotFound`] or an
//! idempotent success, depending on the operation.

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    error::ProvideErrorMetadata,
    presigning::PresigningConfig,
    primitives::ByteStream as SdkByteStream,
    types::{
        Delete, Error as BatchDeleteError, MetadataDirective, ObjectCannedAcl, ObjectIdentifier,
        StorageClass,
    },
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::models::{Acl, UploadOptions};
use crate::services::storage_service::{
    ByteStream, SignMethod, StorageError, StorageResult, StorageService, collect_stream, join_url,
    mime_type_for_key,
};

/// Presign ttl used when the caller passes a zero duration; matches the SDK
/// default of 15 minutes.
const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(900);

pub struct S3Service {
    client: Client,
    bucket: String,
    endpoint: String,
    default_acl: ObjectCannedAcl,
}

impl S3Service {
    /// `endpoint` is the public delivery prefix (bucket website, CDN, or
    /// path-style endpoint) that [`StorageService::url`] joins keys onto.
    pub fn new(client: Client, bucket: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            endpoint: endpoint.into(),
            default_acl: ObjectCannedAcl::Private,
        }
    }

    /// Build a client from the ambient AWS environment (credential chain,
    /// region, profile).
    pub async fn from_env(bucket: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), bucket, endpoint)
    }

    /// ACL applied when an upload does not carry one. Defaults to private.
    pub fn with_default_acl(mut self, acl: Acl) -> Self {
        self.default_acl = canned_acl(acl);
        self
    }

    fn resolve_acl(&self, options: &UploadOptions) -> ObjectCannedAcl {
        options
            .acl
            .map(canned_acl)
            .unwrap_or_else(|| self.default_acl.clone())
    }

    fn resolve_content_type(options: &UploadOptions, key: &str) -> String {
        options
            .content_type
            .clone()
            .unwrap_or_else(|| mime_type_for_key(key).to_string())
    }
}

fn canned_acl(acl: Acl) -> ObjectCannedAcl {
    match acl {
        Acl::Private => ObjectCannedAcl::Private,
        Acl::PublicRead => ObjectCannedAcl::PublicRead,
    }
}

fn backend_err<E>(op: &str, err: E) -> StorageError
where
    E: ProvideErrorMetadata + fmt::Display,
{
    match err.code() {
        Some(code) => StorageError::Backend(format!(
            "s3 {op}: {code}: {}",
            err.message().unwrap_or_default()
        )),
        None => StorageError::Backend(format!("s3 {op}: {err}")),
    }
}

fn is_not_found_code<E: ProvideErrorMetadata>(err: &E) -> bool {
    matches!(err.code(), Some("NoSuchKey") | Some("NotFound"))
}

/// First per-key failure of a batch delete, surfaced as the operation's
/// error.
fn first_batch_error(errors: &[BatchDeleteError]) -> Option<StorageError> {
    errors.first().map(|err| {
        StorageError::Backend(format!(
            "s3 delete_batch `{}`: {}: {}",
            err.key().unwrap_or_default(),
            err.code().unwrap_or("Error"),
            err.message().unwrap_or_default()
        ))
    })
}

#[async_trait]
impl StorageService for S3Service {
    async fn upload(
        &self,
        key: &str,
        body: ByteStream,
        options: &UploadOptions,
    ) -> StorageResult<()> {
        let body = collect_stream(body).await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(self.resolve_acl(options))
            .content_type(Self::resolve_content_type(options, key))
            .storage_class(StorageClass::IntelligentTiering)
            .body(SdkByteStream::from(body))
            .send()
            .await
            .map_err(|err| backend_err("upload", err.into_service_error()))?;
        Ok(())
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_no_such_key() || is_not_found_code(&err) {
                    StorageError::NotFound(key.to_string())
                } else {
                    backend_err("download", err)
                }
            })?;
        Ok(Box::pin(ReaderStream::new(resp.body.into_async_read())))
    }

    async fn copy(&self, src: &str, dst: &str, options: &UploadOptions) -> StorageResult<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(dst)
            .copy_source(format!("{}/{}", self.bucket, src))
            .acl(self.resolve_acl(options))
            .metadata_directive(MetadataDirective::Replace)
            .content_type(Self::resolve_content_type(options, dst))
            .storage_class(StorageClass::IntelligentTiering)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if is_not_found_code(&err) {
                    StorageError::NotFound(src.to_string())
                } else {
                    backend_err("copy", err)
                }
            })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = err.into_service_error();
                // Some S3-compatible stores report missing keys on delete.
                if is_not_found_code(&err) {
                    Ok(())
                } else {
                    Err(backend_err("delete", err))
                }
            }
        }
    }

    async fn delete_batch(&self, keys: &[String]) -> StorageResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let objects: Vec<ObjectIdentifier> = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|err| StorageError::Backend(format!("s3 delete_batch: {err}")))
            })
            .collect::<StorageResult<_>>()?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(|err| StorageError::Backend(format!("s3 delete_batch: {err}")))?;

        let resp = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| backend_err("delete_batch", err.into_service_error()))?;
        // A 200 response can still carry per-key failures in its body.
        match first_batch_error(resp.errors()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// List-and-delete loop over the SDK paginator.
    async fn delete_prefixed(&self, prefix: &str) -> StorageResult<()> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| backend_err("delete_prefixed", err.into_service_error()))?;
            let keys: Vec<String> = page
                .contents()
                .iter()
                .filter_map(|obj| obj.key().map(str::to_string))
                .collect();
            if keys.is_empty() {
                continue;
            }
            debug!(prefix, count = keys.len(), "deleting listed page");
            self.delete_batch(&keys).await?;
        }
        Ok(())
    }

    async fn exist(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_not_found() || is_not_found_code(&err) {
                    Ok(false)
                } else {
                    Err(backend_err("exist", err))
                }
            }
        }
    }

    fn url(&self, key: &str) -> String {
        join_url(&self.endpoint, key)
    }

    async fn sign_url(
        &self,
        key: &str,
        method: SignMethod,
        expires_in: Duration,
    ) -> StorageResult<(String, HeaderMap)> {
        let expires_in = if expires_in.is_zero() {
            DEFAULT_PRESIGN_EXPIRY
        } else {
            expires_in
        };
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|err| StorageError::Backend(format!("s3 sign_url: {err}")))?;

        let presigned = match method {
            SignMethod::Get => self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|err| backend_err("sign_url", err.into_service_error()))?,
            SignMethod::Put => self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|err| backend_err("sign_url", err.into_service_error()))?,
            SignMethod::Head => self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|err| backend_err("sign_url", err.into_service_error()))?,
            SignMethod::Delete => self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|err| backend_err("sign_url", err.into_service_error()))?,
        };

        let mut headers = HeaderMap::new();
        for (name, value) in presigned.headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| StorageError::Backend(format!("s3 sign_url header: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| StorageError::Backend(format!("s3 sign_url header: {err}")))?;
            headers.insert(name, value);
        }
        Ok((presigned.uri().to_string(), headers))
    }
}
