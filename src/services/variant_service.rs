//! src/services/variant_service.rs
//!
//! The variant engine and its facade. A [`Variant`] pairs an origin key with
//! an options bag and derives a content-addressed output key under the
//! `variants/` prefix; `materialize` guarantees the transformed object exists
//! at that key before returning. The existence check is the sole concurrency
//! mechanism: racing callers may both regenerate, but they upload identical
//! bytes to the identical key, so the race converges.

use std::sync::Arc;

use tracing::debug;
use url::form_urlencoded;

use crate::models::{UploadOptions, VariantFormat, VariantOptions};
use crate::services::storage_service::{
    StorageResult, StorageService, collect_stream, stream_from_bytes,
};
use crate::services::transform_service::{ImageTransformer, Transformer};

/// Composition root binding one storage backend to one transformer.
#[derive(Clone)]
pub struct Storage {
    service: Arc<dyn StorageService>,
    transformer: Arc<dyn Transformer>,
}

impl Storage {
    /// Build a facade with the default image transformer.
    pub fn new(service: Arc<dyn StorageService>) -> Self {
        Self::with_transformer(service, Arc::new(ImageTransformer::new()))
    }

    pub fn with_transformer(
        service: Arc<dyn StorageService>,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        Self {
            service,
            transformer,
        }
    }

    /// The bound storage backend.
    pub fn service(&self) -> &Arc<dyn StorageService> {
        &self.service
    }

    /// A variant handle for `key` under `options`. Pure; nothing is generated
    /// until [`Variant::materialize`] runs.
    pub fn variant(&self, key: impl Into<String>, options: VariantOptions) -> Variant {
        Variant {
            service: Arc::clone(&self.service),
            transformer: Arc::clone(&self.transformer),
            origin_key: key.into(),
            options,
        }
    }
}

/// One (origin key, options) pair and the machinery to materialize it.
pub struct Variant {
    service: Arc<dyn StorageService>,
    transformer: Arc<dyn Transformer>,
    origin_key: String,
    options: VariantOptions,
}

impl Variant {
    /// Deterministic output key:
    /// `variants/<dir-of-origin>/<stem>-<digest>.<ext>` where the digest
    /// covers the fully resolved option set and `ext` is the resolved format
    /// name.
    pub fn key(&self) -> String {
        let (dir, file) = match self.origin_key.rsplit_once('/') {
            Some((dir, file)) => (dir, file),
            None => ("", self.origin_key.as_str()),
        };
        let stem = match file.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => file,
        };
        let basename = format!(
            "{}-{}.{}",
            stem,
            self.digest(),
            self.resolved_format().as_str()
        );
        if dir.is_empty() {
            format!("variants/{}", basename)
        } else {
            format!("variants/{}/{}", dir, basename)
        }
    }

    /// Deliverable URL for the (possibly not yet materialized) variant.
    pub fn url(&self) -> String {
        self.service.url(&self.key())
    }

    /// Ensure the variant exists in the backend and return its key.
    ///
    /// Short-circuits when the output key already exists; otherwise downloads
    /// the origin, transforms it, and uploads the encoded result. The key is
    /// returned only on full success.
    pub async fn materialize(&self) -> StorageResult<String> {
        let key = self.key();
        if self.service.exist(&key).await? {
            debug!(key, "variant already materialized");
            return Ok(key);
        }

        let origin = self.service.download(&self.origin_key).await?;
        let source = collect_stream(origin).await?;

        let format = self.resolved_format();
        let encoded = self
            .transformer
            .transform(&self.options, format, source)
            .await?;

        debug!(origin = %self.origin_key, key, format = %format, "generated variant");
        let options = UploadOptions::default().with_content_type(format.media_type());
        self.service
            .upload(&key, stream_from_bytes(encoded), &options)
            .await?;
        Ok(key)
    }

    /// Output format after resolution: explicit option, else inferred from
    /// the origin extension, else jpeg.
    fn resolved_format(&self) -> VariantFormat {
        if let Some(format) = self.options.format {
            return format;
        }
        let file = self
            .origin_key
            .rsplit_once('/')
            .map(|(_, file)| file)
            .unwrap_or(&self.origin_key);
        file.rsplit_once('.')
            .and_then(|(_, ext)| VariantFormat::from_extension(ext))
            .unwrap_or_default()
    }

    /// Hex md5 of the canonical option encoding: form-urlencoded pairs of the
    /// fully resolved set (format and quality always present after
    /// defaulting), sorted lexicographically by key. Sorting is what makes
    /// semantically identical bags hash identically.
    fn digest(&self) -> String {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if let Some(size) = self.options.size {
            pairs.push(("size".to_string(), size.to_string()));
        }
        if let Some((w, h)) = self.options.resize_to_fill {
            pairs.push(("resize_to_fill".to_string(), format!("{}x{}", w, h)));
        }
        pairs.push((
            "format".to_string(),
            self.resolved_format().as_str().to_string(),
        ));
        pairs.push((
            "quality".to_string(),
            self.options.resolved_quality().to_string(),
        ));
        for (key, values) in &self.options.extra {
            for value in values {
                pairs.push((key.clone(), value.clone()));
            }
        }
        // Stable sort: repeated extension keys keep their value order.
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &pairs {
            serializer.append_pair(key, value);
        }
        let canonical = serializer.finish();
        format!("{:x}", md5::compute(canonical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage_service::StorageError;
    use crate::services::testing::{CountingTransformer, MemoryService};
    use bytes::Bytes;

    fn facade() -> (Storage, Arc<MemoryService>, Arc<CountingTransformer>) {
        let service = Arc::new(MemoryService::new("http://cdn.local"));
        let transformer = Arc::new(CountingTransformer::new());
        let storage = Storage::with_transformer(
            Arc::clone(&service) as Arc<dyn StorageService>,
            Arc::clone(&transformer) as Arc<dyn Transformer>,
        );
        (storage, service, transformer)
    }

    #[test]
    fn key_is_deterministic_and_content_addressed() {
        let (storage, _, _) = facade();
        let options = VariantOptions::new().with_size(100).with_quality(75);

        let first = storage.variant("images/test.png", options.clone()).key();
        let second = storage.variant("images/test.png", options).key();
        assert_eq!(first, second);

        let (prefix, rest) = first.split_at("variants/images/test-".len());
        assert_eq!(prefix, "variants/images/test-");
        let (digest, ext) = rest.split_at(32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ext, ".png");
    }

    #[test]
    fn key_for_bare_origin_has_no_directory() {
        let (storage, _, _) = facade();
        let key = storage.variant("test.jpg", VariantOptions::new()).key();
        assert!(key.starts_with("variants/test-"));
        assert!(key.ends_with(".jpeg"));
    }

    #[test]
    fn differing_options_produce_differing_keys() {
        let (storage, _, _) = facade();
        let base = VariantOptions::new().with_size(100);

        let a = storage.variant("images/test.png", base.clone()).key();
        let b = storage
            .variant("images/test.png", base.clone().with_quality(90))
            .key();
        let c = storage
            .variant("images/test.png", base.clone().with_format(VariantFormat::Webp))
            .key();
        let d = storage
            .variant("images/test.png", base.with_param("watermark", "logo"))
            .key();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_ne!(b, c);
    }

    #[test]
    fn defaulted_options_collapse_to_the_same_key() {
        let (storage, _, _) = facade();

        // Out-of-range quality defaults to 80, as does no quality at all.
        let implicit = storage.variant("images/a.jpg", VariantOptions::new()).key();
        let defaulted = storage
            .variant("images/a.jpg", VariantOptions::new().with_quality(500))
            .key();
        let explicit = storage
            .variant(
                "images/a.jpg",
                VariantOptions::new()
                    .with_format(VariantFormat::Jpeg)
                    .with_quality(80),
            )
            .key();

        assert_eq!(implicit, defaulted);
        assert_eq!(implicit, explicit);
    }

    #[test]
    fn format_resolution_prefers_option_then_extension() {
        let (storage, _, _) = facade();

        let explicit = storage.variant(
            "images/a.png",
            VariantOptions::new().with_format(VariantFormat::Webp),
        );
        assert!(explicit.key().ends_with(".webp"));

        let inferred = storage.variant("images/a.webp", VariantOptions::new());
        assert!(inferred.key().ends_with(".webp"));

        let unsupported = storage.variant("images/a.gif", VariantOptions::new());
        assert!(unsupported.key().ends_with(".jpeg"));

        let extensionless = storage.variant("images/raw", VariantOptions::new());
        assert!(extensionless.key().ends_with(".jpeg"));
    }

    #[tokio::test]
    async fn materialize_generates_once_then_short_circuits() {
        let (storage, service, transformer) = facade();
        service.insert("images/test.png", Bytes::from_static(b"origin-bytes"));

        let variant = storage.variant("images/test.png", VariantOptions::new().with_size(100));

        let key = variant.materialize().await.unwrap();
        assert_eq!(transformer.calls(), 1);
        assert!(service.contains(&key));

        let again = variant.materialize().await.unwrap();
        assert_eq!(again, key);
        assert_eq!(transformer.calls(), 1);
    }

    #[tokio::test]
    async fn materialize_sets_image_content_type() {
        let (storage, service, _) = facade();
        service.insert("images/test.png", Bytes::from_static(b"origin-bytes"));

        let key = storage
            .variant("images/test.png", VariantOptions::new().with_size(10))
            .materialize()
            .await
            .unwrap();
        assert_eq!(service.content_type(&key).as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn materialize_surfaces_missing_origin() {
        let (storage, _, transformer) = facade();
        let variant = storage.variant("images/absent.png", VariantOptions::new().with_size(32));

        match variant.materialize().await {
            Err(StorageError::NotFound(key)) => assert_eq!(key, "images/absent.png"),
            other => panic!("expected NotFound, got {:?}", other.ok()),
        }
        assert_eq!(transformer.calls(), 0);
    }

    #[test]
    fn url_resolves_through_the_backend() {
        let (storage, _, _) = facade();
        let variant = storage.variant("images/test.png", VariantOptions::new());
        assert_eq!(variant.url(), format!("http://cdn.local/{}", variant.key()));
    }
}
