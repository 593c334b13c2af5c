//! Core data models for the media storage service.
//!
//! Value types shared across backends and the serving layer: the transform
//! options bag and the per-upload delivery options. Both are plain data with
//! no backend state attached.

pub mod upload_options;
pub mod variant_options;

pub use upload_options::{Acl, UploadOptions};
pub use variant_options::{OptionsError, VariantFormat, VariantOptions};
