//! HTTP handlers for bucket and object operations.
//! Streams object bodies in both directions to avoid buffering payloads
//! in memory; storage concerns live in `StoreService`.

use crate::{
    errors::AppError,
    handlers::auth_handlers::require_tenant,
    models::{bucket::Bucket, object::StoredObject},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::stream;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    pub name: String,
}

/// POST `/api/buckets` — create a bucket for the calling tenant.
pub async fn create_bucket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateBucketReq>,
) -> Result<(StatusCode, Json<Bucket>), AppError> {
    let tenant = require_tenant(&state, &headers).await?;
    let bucket = state.store.create_bucket(tenant.id, &req.name).await?;
    Ok((StatusCode::CREATED, Json(bucket)))
}

/// GET `/api/buckets` — list the calling tenant's buckets.
pub async fn list_buckets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Bucket>>, AppError> {
    let tenant = require_tenant(&state, &headers).await?;
    let buckets = state.store.list_buckets(tenant.id).await?;
    Ok(Json(buckets))
}

/// DELETE `/api/buckets/{bucket}` — delete an empty bucket.
pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let tenant = require_tenant(&state, &headers).await?;
    state.store.delete_bucket(tenant.id, &bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/api/buckets/{bucket}/objects` — multipart upload.
///
/// Expects a `file` part; its bytes stream straight through to the store
/// without buffering the whole payload. A request with no `file` part is
/// a 400.
pub async fn upload_object(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<StoredObject>, AppError> {
    let tenant = require_tenant(&state, &headers).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let stream = stream::try_unfold(field, |mut field| async move {
            match field.chunk().await {
                Ok(Some(chunk)) => Ok(Some((chunk, field))),
                Ok(None) => Ok(None),
                Err(err) => Err(io::Error::other(err)),
            }
        });

        let object = state
            .store
            .upload_object_stream(
                tenant.id,
                &bucket,
                file_name.as_deref(),
                content_type,
                stream,
            )
            .await?;
        return Ok(Json(object));
    }

    Err(AppError::bad_request("multipart upload requires a `file` part"))
}

/// GET `/api/buckets/{bucket}/objects` — list object records.
pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<StoredObject>>, AppError> {
    let tenant = require_tenant(&state, &headers).await?;
    let objects = state.store.list_objects(tenant.id, &bucket).await?;
    Ok(Json(objects))
}

/// GET `/api/objects/{key}` — streaming download by object key.
pub async fn download_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let tenant = require_tenant(&state, &headers).await?;
    let (meta, file) = state.store.get_object_reader(tenant.id, &key).await?;

    let stream = ReaderStream::new(file);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// DELETE `/api/objects/{key}` — delete blob and metadata.
pub async fn delete_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let tenant = require_tenant(&state, &headers).await?;
    state.store.delete_object(tenant.id, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    let quoted = format!("\"{}\"", meta.etag);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }

    let disposition = format!("attachment; filename=\"{}\"", meta.file_name);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}
