//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that exercises the bound storage backend

use crate::services::serving_service::ServingServer;
use crate::services::storage_service::{StorageError, StorageService, stream_from_bytes};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::UploadOptions;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that performs an upload/exist/delete round-trip against
/// the bound backend under a throwaway `.readyz-<uuid>` key.
///
/// Returns JSON describing the check. HTTP 200 when it passes, HTTP 503
/// when it fails.
pub async fn readyz(State(server): State<Arc<ServingServer>>) -> impl IntoResponse {
    let service = server.storage().service();
    let probe_key = format!(".readyz-{}", Uuid::new_v4());

    let storage_check = match probe_backend(service.as_ref(), &probe_key).await {
        Ok(()) => (true, None::<String>),
        Err(err) => (false, Some(err.to_string())),
    };

    let storage_ok = storage_check.0;
    let mut checks = HashMap::new();
    checks.insert(
        "storage",
        CheckStatus {
            ok: storage_ok,
            error: storage_check.1,
        },
    );

    let body = ReadyResponse {
        status: if storage_ok { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn probe_backend(service: &dyn StorageService, key: &str) -> Result<(), StorageError> {
    service
        .upload(
            key,
            stream_from_bytes(Bytes::from_static(b"readyz")),
            &UploadOptions::default(),
        )
        .await?;
    let seen = service.exist(key).await;
    // Always clean up the probe object, even when the existence check failed.
    service.delete(key).await?;
    if !seen? {
        return Err(StorageError::Backend(
            "probe object missing after upload".into(),
        ));
    }
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
