//! HTTP handlers for queue operations. Thin: resolve the tenant, call the
//! engine, shape the response.

use crate::{
    errors::AppError, handlers::auth_handlers::require_tenant, models::message::QueueMessage,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SendMessageReq {
    pub body: String,
    pub priority: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AckReq {
    pub success: bool,
}

/// POST `/api/queues/{queue}/messages` — enqueue a message.
pub async fn send_message(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SendMessageReq>,
) -> Result<Json<QueueMessage>, AppError> {
    let tenant = require_tenant(&state, &headers).await?;
    let message = state
        .queue
        .send(tenant.id, &queue, req.body, req.priority)
        .await?;
    Ok(Json(message))
}

/// POST `/api/queues/{queue}/receive` — claim the next eligible message.
///
/// An empty queue is not an error: it answers 204 No Content.
pub async fn receive_message(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let tenant = require_tenant(&state, &headers).await?;
    match state.queue.receive(tenant.id, &queue).await? {
        Some(message) => Ok(Json(message).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// GET `/api/queues/{queue}/messages` — list every message regardless of
/// status.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<QueueMessage>>, AppError> {
    let tenant = require_tenant(&state, &headers).await?;
    let messages = state.queue.list(tenant.id, &queue).await?;
    Ok(Json(messages))
}

/// POST `/api/messages/{id}/ack` — complete or fail a claimed message.
pub async fn ack_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<AckReq>,
) -> Result<StatusCode, AppError> {
    let tenant = require_tenant(&state, &headers).await?;
    state.queue.acknowledge(tenant.id, id, req.success).await?;
    Ok(StatusCode::OK)
}
