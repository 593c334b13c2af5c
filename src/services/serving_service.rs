//! src/services/serving_service.rs
//!
//! ServingServer — the redirect protocol. Translates a request query
//! (`key`, options, optional `signature`/`expires`) into the URL the client
//! should be redirected to, materializing variants on demand. The HTTP layer
//! on top only turns the result into a 302 or an error status.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;
use tracing::warn;
use url::form_urlencoded;

use crate::models::{OptionsError, VariantOptions};
use crate::services::storage_service::{StorageError, StorageService};
use crate::services::url_signer::{SignatureError, UrlSigner};
use crate::services::variant_service::Storage;

/// Hook mapping a key to its query representation (or back).
pub type KeyCodec = Arc<dyn Fn(&str) -> String + Send + Sync>;
/// Hook mapping a resolved key to the URL the client is redirected to.
pub type UrlResolver = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Debug, Error)]
pub enum ServingError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error("missing key parameter")]
    MissingKey,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServingError {
    /// HTTP status this failure maps to: 400 for anything the client got
    /// wrong (signature, options, key), 500 for backend faults during
    /// materialization.
    pub fn status(&self) -> StatusCode {
        match self {
            ServingError::Signature(_) | ServingError::Options(_) | ServingError::MissingKey => {
                StatusCode::BAD_REQUEST
            }
            ServingError::Storage(StorageError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
            ServingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Stateless serving core bound to one storage facade.
///
/// `endpoint` is the public URL of the redirect route; signed requests are
/// validated against it, and [`ServingServer::url`] builds links under it.
pub struct ServingServer {
    endpoint: String,
    storage: Storage,
    key_encoder: Option<KeyCodec>,
    key_decoder: Option<KeyCodec>,
    url_resolver: Option<UrlResolver>,
    signer: Option<UrlSigner>,
    signing_expires: Duration,
}

impl ServingServer {
    pub fn builder(endpoint: impl Into<String>, storage: Storage) -> ServingServerBuilder {
        ServingServerBuilder {
            endpoint: endpoint.into(),
            storage,
            key_encoder: None,
            key_decoder: None,
            url_resolver: None,
            signing_key: None,
            signing_expires: Duration::ZERO,
        }
    }

    /// The bound storage facade.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Resolve one request query into the redirect target.
    ///
    /// Steps, in order: validate the signature over `endpoint?raw_query` when
    /// signing is configured; parse the non-reserved pairs as options; pull
    /// out `key` (empty counts as missing) and run it through the decoder;
    /// then either resolve the bare key directly or materialize the variant
    /// and resolve its key.
    pub async fn serve(&self, raw_query: &str) -> Result<String, ServingError> {
        if let Some(signer) = &self.signer {
            let full_url = format!("{}?{}", self.endpoint, raw_query);
            signer.validate(&full_url)?;
        }

        let pairs: Vec<(String, String)> = form_urlencoded::parse(raw_query.as_bytes())
            .into_owned()
            .collect();
        let options =
            VariantOptions::parse(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;

        let key = pairs
            .iter()
            .find(|(key, _)| key == "key")
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
            .ok_or(ServingError::MissingKey)?;
        let key = self.decode_key(key);

        if options.is_empty() {
            return Ok(self.resolve_url(&key));
        }

        let variant = self.storage.variant(key, options);
        let variant_key = variant.materialize().await?;
        Ok(self.resolve_url(&variant_key))
    }

    /// Build a servable URL for `key` with `options`.
    ///
    /// The query is form-urlencoded and sorted by key; the key value runs
    /// through the configured encoder. When signing is configured the URL is
    /// signed with the per-call ttl, falling back to the server default.
    /// Returns an empty string if signing fails.
    pub fn url(&self, key: &str, options: &VariantOptions, expires_in: Option<Duration>) -> String {
        let mut pairs = vec![("key".to_string(), self.encode_key(key))];
        pairs.extend(options.to_query());
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &pairs {
            serializer.append_pair(key, value);
        }
        let plain = format!("{}?{}", self.endpoint, serializer.finish());

        let Some(signer) = &self.signer else {
            return plain;
        };
        let ttl = expires_in.unwrap_or(self.signing_expires);
        match signer.sign(&plain, ttl) {
            Ok(signed) => signed,
            Err(err) => {
                warn!(url = %plain, "failed to sign serving url: {err}");
                String::new()
            }
        }
    }

    fn encode_key(&self, key: &str) -> String {
        match &self.key_encoder {
            Some(encode) => encode(key),
            None => key.to_string(),
        }
    }

    fn decode_key(&self, key: &str) -> String {
        match &self.key_decoder {
            Some(decode) => decode(key),
            None => key.to_string(),
        }
    }

    fn resolve_url(&self, key: &str) -> String {
        match &self.url_resolver {
            Some(resolve) => resolve(key),
            None => self.storage.service().url(key),
        }
    }
}

/// Builder for [`ServingServer`]. Everything beyond endpoint and storage is
/// optional: no signing key means unsigned serving, no resolver means the
/// backend's own `url`.
pub struct ServingServerBuilder {
    endpoint: String,
    storage: Storage,
    key_encoder: Option<KeyCodec>,
    key_decoder: Option<KeyCodec>,
    url_resolver: Option<UrlResolver>,
    signing_key: Option<Vec<u8>>,
    signing_expires: Duration,
}

impl ServingServerBuilder {
    /// Encode keys before they are embedded into serving URLs.
    pub fn key_encoder(mut self, encode: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.key_encoder = Some(Arc::new(encode));
        self
    }

    /// Decode the `key` query value before it is used.
    pub fn key_decoder(mut self, decode: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.key_decoder = Some(Arc::new(decode));
        self
    }

    /// Override how resolved keys turn into redirect targets.
    pub fn url_resolver(mut self, resolve: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.url_resolver = Some(Arc::new(resolve));
        self
    }

    /// Enable HMAC signing of serving URLs with this key.
    pub fn signing_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.signing_key = Some(key.into());
        self
    }

    /// Default ttl for signed URLs; zero means no expiry.
    pub fn signing_expires(mut self, expires: Duration) -> Self {
        self.signing_expires = expires;
        self
    }

    pub fn build(self) -> ServingServer {
        ServingServer {
            endpoint: self.endpoint,
            storage: self.storage,
            key_encoder: self.key_encoder,
            key_decoder: self.key_decoder,
            url_resolver: self.url_resolver,
            signer: self.signing_key.map(UrlSigner::new),
            signing_expires: self.signing_expires,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VariantFormat;
    use crate::services::storage_service::StorageService;
    use crate::services::testing::{CountingTransformer, MemoryService};
    use crate::services::transform_service::Transformer;
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use bytes::Bytes;

    fn server_parts() -> (Storage, Arc<MemoryService>, Arc<CountingTransformer>) {
        let service = Arc::new(MemoryService::new("http://cdn.local"));
        let transformer = Arc::new(CountingTransformer::new());
        let storage = Storage::with_transformer(
            Arc::clone(&service) as Arc<dyn StorageService>,
            Arc::clone(&transformer) as Arc<dyn Transformer>,
        );
        (storage, service, transformer)
    }

    #[test]
    fn url_serializes_sorted_and_percent_encoded() {
        let (storage, _, _) = server_parts();
        let server = ServingServer::builder("http://example.com", storage).build();

        let options = VariantOptions::new()
            .with_format(VariantFormat::Jpeg)
            .with_size(100)
            .with_quality(75);
        assert_eq!(
            server.url("images/test.png", &options, None),
            "http://example.com?format=jpeg&key=images%2Ftest.png&quality=75&size=100"
        );
    }

    #[tokio::test]
    async fn bare_key_redirects_to_origin_without_the_engine() {
        let (storage, _, transformer) = server_parts();
        let server = ServingServer::builder("http://example.com", storage).build();

        let target = server.serve("key=sample.jpg").await.unwrap();
        assert_eq!(target, "http://cdn.local/sample.jpg");
        assert_eq!(transformer.calls(), 0);
    }

    #[tokio::test]
    async fn variant_request_materializes_once() {
        let (storage, service, transformer) = server_parts();
        service.insert("images/test.png", Bytes::from_static(b"origin"));
        let server = ServingServer::builder("http://example.com", storage).build();

        let first = server.serve("key=images%2Ftest.png&size=100").await.unwrap();
        assert!(first.starts_with("http://cdn.local/variants/images/test-"));
        assert_eq!(transformer.calls(), 1);

        let second = server.serve("key=images%2Ftest.png&size=100").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(transformer.calls(), 1);
    }

    #[tokio::test]
    async fn missing_or_empty_key_is_rejected() {
        let (storage, _, _) = server_parts();
        let server = ServingServer::builder("http://example.com", storage).build();

        for query in ["size=100", "key=&size=100", ""] {
            match server.serve(query).await {
                Err(err @ ServingError::MissingKey) => {
                    assert_eq!(err.status(), StatusCode::BAD_REQUEST)
                }
                other => panic!("query {query:?}: expected MissingKey, got {:?}", other.ok()),
            }
        }
    }

    #[tokio::test]
    async fn malformed_options_are_rejected() {
        let (storage, _, _) = server_parts();
        let server = ServingServer::builder("http://example.com", storage).build();

        match server.serve("key=a.png&size=abc").await {
            Err(err @ ServingError::Options(_)) => {
                assert_eq!(err.status(), StatusCode::BAD_REQUEST)
            }
            other => panic!("expected Options error, got {:?}", other.ok()),
        }
    }

    #[tokio::test]
    async fn missing_origin_is_a_backend_failure() {
        let (storage, _, _) = server_parts();
        let server = ServingServer::builder("http://example.com", storage).build();

        match server.serve("key=absent.png&size=10").await {
            Err(err @ ServingError::Storage(StorageError::NotFound(_))) => {
                assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR)
            }
            other => panic!("expected Storage(NotFound), got {:?}", other.ok()),
        }
    }

    #[test]
    fn invalid_key_maps_to_bad_request() {
        let err = ServingError::Storage(StorageError::InvalidKey("../x".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signed_urls_round_trip_and_tampering_is_caught() {
        let (storage, _, _) = server_parts();
        let server = ServingServer::builder("http://example.com", storage)
            .signing_key("secret")
            .build();

        let url = server.url("sample.jpg", &VariantOptions::new(), None);
        assert!(url.contains("signature="));
        assert!(!url.contains("expires="));

        let (_, query) = url.split_once('?').unwrap();
        let target = server.serve(query).await.unwrap();
        assert_eq!(target, "http://cdn.local/sample.jpg");

        let tampered = query.replace("sample.jpg", "secret.jpg");
        match server.serve(&tampered).await {
            Err(err @ ServingError::Signature(SignatureError::InvalidSignature)) => {
                assert_eq!(err.status(), StatusCode::BAD_REQUEST)
            }
            other => panic!("expected InvalidSignature, got {:?}", other.ok()),
        }
    }

    #[tokio::test]
    async fn unsigned_request_on_signing_server_is_rejected() {
        let (storage, _, _) = server_parts();
        let server = ServingServer::builder("http://example.com", storage)
            .signing_key("secret")
            .build();

        match server.serve("key=sample.jpg").await {
            Err(ServingError::Signature(SignatureError::MissingSignature)) => {}
            other => panic!("expected MissingSignature, got {:?}", other.ok()),
        }
    }

    #[test]
    fn per_call_ttl_overrides_the_server_default() {
        let (storage, _, _) = server_parts();
        let server = ServingServer::builder("http://example.com", storage)
            .signing_key("secret")
            .signing_expires(Duration::from_secs(3600))
            .build();

        let defaulted = server.url("a.png", &VariantOptions::new(), None);
        assert!(defaulted.contains("expires="));

        let overridden = server.url("a.png", &VariantOptions::new(), Some(Duration::ZERO));
        assert!(!overridden.contains("expires="));
    }

    #[tokio::test]
    async fn key_codec_hooks_apply_on_both_sides() {
        let (storage, _, _) = server_parts();
        let server = ServingServer::builder("http://example.com", storage)
            .key_encoder(|key| URL_SAFE_NO_PAD.encode(key))
            .key_decoder(|encoded| {
                let bytes = URL_SAFE_NO_PAD.decode(encoded).unwrap_or_default();
                String::from_utf8(bytes).unwrap_or_default()
            })
            .build();

        let url = server.url("images/test.png", &VariantOptions::new(), None);
        assert!(!url.contains("images%2Ftest.png"));

        let (_, query) = url.split_once('?').unwrap();
        let target = server.serve(query).await.unwrap();
        assert_eq!(target, "http://cdn.local/images/test.png");
    }

    #[tokio::test]
    async fn custom_resolver_overrides_backend_urls() {
        let (storage, _, _) = server_parts();
        let server = ServingServer::builder("http://example.com", storage)
            .url_resolver(|key| format!("https://edge.example.net/{key}"))
            .build();

        let target = server.serve("key=sample.jpg").await.unwrap();
        assert_eq!(target, "https://edge.example.net/sample.jpg");
    }
}
