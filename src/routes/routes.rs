//! Route table for the demo server.
//!
//! - `GET    /serving`      — redirect endpoint (key + options [+ signature])
//! - `GET    /disk/{*key}`  — raw bytes from the disk backend
//! - `POST   /upload`       — multipart origin upload
//! - `DELETE /delete`       — origin (and optionally variant) removal
//! - `GET    /healthz`, `GET /readyz` — probes
//!
//! The wildcard `{*key}` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, serve, serve_disk, upload_object},
    },
    services::serving_service::ServingServer,
};
use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;

/// Build the router. Shared state is the serving core, which carries the
/// storage facade; handlers receive it by dependency injection rather than
/// through any global.
pub fn routes() -> Router<Arc<ServingServer>> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // redirect protocol
        .route("/serving", get(serve))
        // raw disk serving, outside the signing protocol
        .route("/disk/{*key}", get(serve_disk))
        // demo object management
        .route("/upload", post(upload_object))
        .route("/delete", delete(delete_object))
}
