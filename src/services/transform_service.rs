//! src/services/transform_service.rs
//!
//! Transformer — the external pixel-work capability the variant engine
//! delegates to. The default implementation decodes with the `image` crate,
//! applies center-crop resizes, and encodes to the requested format. Pixel
//! work is CPU-bound and runs on the blocking thread pool.

use async_trait::async_trait;
use bytes::Bytes;
use image::{
    DynamicImage, ImageFormat,
    codecs::{jpeg::JpegEncoder, webp::WebPEncoder},
    imageops::FilterType,
};
use std::io::Cursor;
use thiserror::Error;

use crate::models::{VariantFormat, VariantOptions};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to decode source image: {0}")]
    Decode(String),
    #[error("failed to encode {format} output: {message}")]
    Encode {
        format: VariantFormat,
        message: String,
    },
    #[error("transform task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Pure transform capability: source bytes in, encoded bytes out.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(
        &self,
        options: &VariantOptions,
        format: VariantFormat,
        source: Bytes,
    ) -> Result<Bytes, TransformError>;
}

/// Default image transformer.
///
/// - `size` crops to the center square and resizes to size×size.
/// - `resize_to_fill` covers w×h and center-crops to exactly w×h.
/// - Both apply in that order when both are set.
/// - `quality` is honored by the jpeg encoder; png and webp encode lossless
///   and ignore it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageTransformer;

impl ImageTransformer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transformer for ImageTransformer {
    async fn transform(
        &self,
        options: &VariantOptions,
        format: VariantFormat,
        source: Bytes,
    ) -> Result<Bytes, TransformError> {
        let options = options.clone();
        tokio::task::spawn_blocking(move || transform_blocking(&options, format, &source)).await?
    }
}

fn transform_blocking(
    options: &VariantOptions,
    format: VariantFormat,
    source: &[u8],
) -> Result<Bytes, TransformError> {
    let mut image =
        image::load_from_memory(source).map_err(|err| TransformError::Decode(err.to_string()))?;

    if let Some(size) = options.size {
        image = image.resize_to_fill(size, size, FilterType::Lanczos3);
    }
    if let Some((width, height)) = options.resize_to_fill {
        image = image.resize_to_fill(width, height, FilterType::Lanczos3);
    }

    encode(&image, format, options.resolved_quality())
}

fn encode(image: &DynamicImage, format: VariantFormat, quality: u8) -> Result<Bytes, TransformError> {
    let mut cursor = Cursor::new(Vec::new());
    match format {
        VariantFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
            image
                .to_rgb8()
                .write_with_encoder(encoder)
                .map_err(|err| TransformError::Encode {
                    format,
                    message: err.to_string(),
                })?;
        }
        VariantFormat::Png => {
            image
                .write_to(&mut cursor, ImageFormat::Png)
                .map_err(|err| TransformError::Encode {
                    format,
                    message: err.to_string(),
                })?;
        }
        VariantFormat::Webp => {
            let encoder = WebPEncoder::new_lossless(&mut cursor);
            image
                .to_rgba8()
                .write_with_encoder(encoder)
                .map_err(|err| TransformError::Encode {
                    format,
                    message: err.to_string(),
                })?;
        }
    }
    Ok(Bytes::from(cursor.into_inner()))
}
