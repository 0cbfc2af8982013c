//! Defines routes for auth, queue, bucket, and object operations.
//!
//! ## Structure
//! - **Auth**
//!   - `POST   /api/auth/register` — create a tenant, returns its token
//!   - `POST   /api/auth/login` — verify credentials, rotate the token
//!
//! - **Queues** (all scoped to the calling tenant via `X-Auth-Token`)
//!   - `POST   /api/queues/{queue}/messages` — send a message
//!   - `GET    /api/queues/{queue}/messages` — list messages, any status
//!   - `POST   /api/queues/{queue}/receive` — claim the next message
//!   - `POST   /api/messages/{id}/ack` — complete or fail a claim
//!
//! - **Buckets & objects**
//!   - `POST   /api/buckets` — create bucket
//!   - `GET    /api/buckets` — list buckets
//!   - `DELETE /api/buckets/{bucket}` — delete empty bucket
//!   - `POST   /api/buckets/{bucket}/objects` — multipart upload
//!   - `GET    /api/buckets/{bucket}/objects` — list object records
//!   - `GET    /api/objects/{key}` — streaming download
//!   - `DELETE /api/objects/{key}` — delete object

use crate::{
    handlers::{
        auth_handlers::{login, register},
        health_handlers::{healthz, readyz},
        object_handlers::{
            create_bucket, delete_bucket, delete_object, download_object, list_buckets,
            list_objects, upload_object,
        },
        queue_handlers::{ack_message, list_messages, receive_message, send_message},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the whole API surface.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // auth
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        // queues
        .route(
            "/api/queues/{queue}/messages",
            post(send_message).get(list_messages),
        )
        .route("/api/queues/{queue}/receive", post(receive_message))
        .route("/api/messages/{id}/ack", post(ack_message))
        // buckets & objects
        .route("/api/buckets", post(create_bucket).get(list_buckets))
        .route("/api/buckets/{bucket}", axum::routing::delete(delete_bucket))
        .route(
            "/api/buckets/{bucket}/objects",
            post(upload_object).get(list_objects),
        )
        .route(
            "/api/objects/{key}",
            get(download_object).delete(delete_object),
        )
}
