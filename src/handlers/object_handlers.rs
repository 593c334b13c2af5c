//! HTTP handlers for the serving redirect protocol plus the demo object
//! routes (multipart upload, delete, raw disk serving). The redirect handler
//! answers in plain text on failure; the object routes use the JSON error
//! envelope.

use crate::{
    errors::AppError,
    services::serving_service::ServingServer,
    services::storage_service::{StorageService, mime_type_for_key, stream_from_bytes},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, RawQuery, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::UploadOptions;

/// `GET /serving?key=…[&size=…][&resize_to_fill=WxH][&format=…][&quality=…]`
/// `[&signature=…][&expires=…]`
///
/// Resolves the query to a delivery URL — materializing the variant when
/// transform options are present — and answers 302 Found. Failures map to
/// 400 (bad signature, bad options, missing key) or 500 (backend fault)
/// with a plain-text reason.
pub async fn serve(
    State(server): State<Arc<ServingServer>>,
    RawQuery(query): RawQuery,
) -> Response {
    let query = query.unwrap_or_default();
    match server.serve(&query).await {
        Ok(target) => {
            debug!(target, "redirecting");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::FOUND;
            match HeaderValue::from_str(&target) {
                Ok(value) => {
                    response.headers_mut().insert(header::LOCATION, value);
                    response
                }
                Err(_) => {
                    warn!(target, "resolved URL is not a valid header value");
                    (StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect target").into_response()
                }
            }
        }
        Err(err) => {
            warn!(query, "serving failed: {err}");
            (err.status(), err.to_string()).into_response()
        }
    }
}

/// `GET /disk/{*key}` — raw bytes straight from the disk backend.
///
/// Origin-only and unauthenticated; signed-URL checks do not apply here.
pub async fn serve_disk(
    State(server): State<Arc<ServingServer>>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let stream = server.storage().service().download(&key).await?;
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(mime_type_for_key(&key)),
    );
    Ok(response)
}

/// `POST /upload` — multipart upload of one origin object.
///
/// Expects a `file` part and optionally a `key` part; without an explicit
/// key the part's filename is used. Content type comes from the part, else
/// from the key extension.
pub async fn upload_object(
    State(server): State<Arc<ServingServer>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut key: Option<String> = None;
    let mut file: Option<(Option<String>, Option<String>, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {}", err)))?
    {
        match field.name() {
            Some("key") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid key field: {}", err)))?;
                key = Some(value);
            }
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid file field: {}", err)))?;
                file = Some((filename, content_type, data));
            }
            _ => {}
        }
    }

    let Some((filename, content_type, data)) = file else {
        return Err(AppError::bad_request("missing `file` field"));
    };
    let key = match key.filter(|key| !key.is_empty()).or(filename) {
        Some(key) => key,
        None => return Err(AppError::bad_request("missing `key` field or filename")),
    };

    let content_type = content_type.unwrap_or_else(|| mime_type_for_key(&key).to_string());
    let options = UploadOptions::default().with_content_type(content_type);

    let service = server.storage().service();
    service
        .upload(&key, stream_from_bytes(data), &options)
        .await?;
    debug!(key, "uploaded origin object");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "key": key,
            "url": service.url(&key),
        })),
    ))
}

/// Query params for `DELETE /delete`.
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub key: String,
    /// When set, also drop every previously generated variant of the key.
    #[serde(default)]
    pub variants: bool,
}

/// `DELETE /delete?key=…[&variants=true]` — remove an origin object.
///
/// Deleting an absent key succeeds, matching the backend contract.
pub async fn delete_object(
    State(server): State<Arc<ServingServer>>,
    Query(params): Query<DeleteQuery>,
) -> Result<impl IntoResponse, AppError> {
    let service = server.storage().service();
    service.delete(&params.key).await?;

    if params.variants {
        // Variant keys share the origin's directory and stem under variants/.
        let (dir, file) = match params.key.rsplit_once('/') {
            Some((dir, file)) => (dir, file),
            None => ("", params.key.as_str()),
        };
        let stem = file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file);
        let prefix = if dir.is_empty() {
            format!("variants/{}-", stem)
        } else {
            format!("variants/{}/{}-", dir, stem)
        };
        service.delete_prefixed(&prefix).await?;
    }

    debug!(key = params.key, variants = params.variants, "deleted object");
    Ok(StatusCode::NO_CONTENT)
}
