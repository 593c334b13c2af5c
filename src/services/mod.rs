//! Service layer: the storage-backend contract and its four drivers, the
//! variant engine, the URL signer, and the serving core the HTTP handlers
//! sit on.

pub mod disk_service;
pub mod gcs_service;
pub mod null_service;
pub mod s3_service;
pub mod serving_service;
pub mod storage_service;
pub mod transform_service;
pub mod url_signer;
pub mod variant_service;

#[cfg(test)]
pub(crate) mod testing;
