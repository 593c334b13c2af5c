//! src/models/variant_options.rs
//!
//! VariantOptions — the immutable bag of transform parameters carried by a
//! variant request. Recognized options (`size`, `resize_to_fill`, `format`,
//! `quality`) are typed fields; any other query key is kept verbatim in an
//! extension map so callers can round-trip parameters this crate does not
//! interpret.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Query keys that belong to the serving protocol, never to the options bag.
pub const RESERVED_KEYS: [&str; 3] = ["key", "signature", "expires"];

const DEFAULT_QUALITY: u8 = 80;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("option `{key}` must be an integer")]
    InvalidInt { key: &'static str },
    #[error("option `{key}` must be a positive integer")]
    NonPositive { key: &'static str },
    #[error("option `resize_to_fill` must be WxH with positive integers, got `{0}`")]
    InvalidResizeToFill(String),
    #[error("option `format` must be one of jpeg, png, webp, got `{0}`")]
    InvalidFormat(String),
}

/// Output encoding for a variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl VariantFormat {
    /// Lowercase name, also used as the variant key extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantFormat::Jpeg => "jpeg",
            VariantFormat::Png => "png",
            VariantFormat::Webp => "webp",
        }
    }

    /// Parse an explicit `format` option value.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("jpeg") {
            Some(VariantFormat::Jpeg)
        } else if name.eq_ignore_ascii_case("png") {
            Some(VariantFormat::Png)
        } else if name.eq_ignore_ascii_case("webp") {
            Some(VariantFormat::Webp)
        } else {
            None
        }
    }

    /// Infer a format from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") {
            Some(VariantFormat::Jpeg)
        } else if ext.eq_ignore_ascii_case("png") {
            Some(VariantFormat::Png)
        } else if ext.eq_ignore_ascii_case("webp") {
            Some(VariantFormat::Webp)
        } else {
            None
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            VariantFormat::Jpeg => "image/jpeg",
            VariantFormat::Png => "image/png",
            VariantFormat::Webp => "image/webp",
        }
    }
}

impl fmt::Display for VariantFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transform parameters for one variant request.
///
/// A value type: builder-style setters return an updated copy, so a bag can
/// be shared across requests without aliasing surprises. Equality covers every
/// field including the extension map, which is what the query round-trip law
/// relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantOptions {
    /// Crop to the center square, then resize both dimensions to this value.
    pub size: Option<u32>,
    /// Crop to the center rectangle of aspect w:h, then resize to exactly w×h.
    pub resize_to_fill: Option<(u32, u32)>,
    /// Output encoding; unset means "infer from the origin extension".
    pub format: Option<VariantFormat>,
    /// Encoder quality for lossy formats; honored in 1–100, otherwise the
    /// encoder default applies.
    pub quality: Option<u32>,
    /// Unrecognized keys, preserved verbatim as multi-value strings.
    pub extra: BTreeMap<String, Vec<String>>,
}

impl VariantOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a flat query mapping into an options bag.
    ///
    /// Recognized keys are validated strictly: a malformed value fails the
    /// whole parse. Duplicated recognized keys keep the first value. The
    /// reserved serving keys (`key`, `signature`, `expires`) are skipped
    /// entirely; they are never part of the bag.
    pub fn parse<I, K, V>(pairs: I) -> Result<Self, OptionsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = VariantOptions::default();
        for (key, value) in pairs {
            let key = key.as_ref();
            let value = value.as_ref();
            match key {
                _ if RESERVED_KEYS.contains(&key) => {}
                "size" => {
                    if options.size.is_none() {
                        options.size = Some(parse_positive(value, "size")?);
                    }
                }
                "resize_to_fill" => {
                    if options.resize_to_fill.is_none() {
                        options.resize_to_fill = Some(parse_resize_to_fill(value)?);
                    }
                }
                "format" => {
                    if options.format.is_none() {
                        options.format = Some(
                            VariantFormat::from_name(value)
                                .ok_or_else(|| OptionsError::InvalidFormat(value.to_string()))?,
                        );
                    }
                }
                "quality" => {
                    if options.quality.is_none() {
                        let quality = value
                            .parse::<u32>()
                            .map_err(|_| OptionsError::InvalidInt { key: "quality" })?;
                        options.quality = Some(quality);
                    }
                }
                _ => {
                    options
                        .extra
                        .entry(key.to_string())
                        .or_default()
                        .push(value.to_string());
                }
            }
        }
        Ok(options)
    }

    /// Serialize back to flat query pairs; the inverse of [`parse`](Self::parse).
    ///
    /// Only keys actually present are emitted, so the empty bag serializes to
    /// no pairs at all. Pair order is deterministic but not sorted; callers
    /// that need a canonical byte encoding sort by key themselves.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(size) = self.size {
            pairs.push(("size".to_string(), size.to_string()));
        }
        if let Some((w, h)) = self.resize_to_fill {
            pairs.push(("resize_to_fill".to_string(), format!("{}x{}", w, h)));
        }
        if let Some(format) = self.format {
            pairs.push(("format".to_string(), format.as_str().to_string()));
        }
        if let Some(quality) = self.quality {
            pairs.push(("quality".to_string(), quality.to_string()));
        }
        for (key, values) in &self.extra {
            for value in values {
                pairs.push((key.clone(), value.clone()));
            }
        }
        pairs
    }

    /// True when no option at all is set; the serving layer uses this to
    /// distinguish "origin, unmodified" requests from variant requests.
    pub fn is_empty(&self) -> bool {
        self.size.is_none()
            && self.resize_to_fill.is_none()
            && self.format.is_none()
            && self.quality.is_none()
            && self.extra.is_empty()
    }

    /// Quality after defaulting: the explicit value when it lies in 1–100,
    /// otherwise 80.
    pub fn resolved_quality(&self) -> u8 {
        match self.quality {
            Some(q) if (1..=100).contains(&q) => q as u8,
            _ => DEFAULT_QUALITY,
        }
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_resize_to_fill(mut self, width: u32, height: u32) -> Self {
        self.resize_to_fill = Some((width, height));
        self
    }

    pub fn with_format(mut self, format: VariantFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_quality(mut self, quality: u32) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Append a passthrough key/value to the extension map.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.entry(key.into()).or_default().push(value.into());
        self
    }
}

fn parse_positive(value: &str, key: &'static str) -> Result<u32, OptionsError> {
    let parsed = value
        .parse::<u32>()
        .map_err(|_| OptionsError::InvalidInt { key })?;
    if parsed == 0 {
        return Err(OptionsError::NonPositive { key });
    }
    Ok(parsed)
}

fn parse_resize_to_fill(value: &str) -> Result<(u32, u32), OptionsError> {
    let mut parts = value.split('x');
    let (Some(w), Some(h), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(OptionsError::InvalidResizeToFill(value.to_string()));
    };
    let width = w
        .parse::<u32>()
        .map_err(|_| OptionsError::InvalidResizeToFill(value.to_string()))?;
    let height = h
        .parse::<u32>()
        .map_err(|_| OptionsError::InvalidResizeToFill(value.to_string()))?;
    if width == 0 || height == 0 {
        return Err(OptionsError::InvalidResizeToFill(value.to_string()));
    }
    Ok((width, height))
}
