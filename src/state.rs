//! Shared application state threaded through the router.

use crate::services::{
    auth_service::AuthService, queue_service::QueueService, store_service::StoreService,
};

/// One instance per process, cloned cheaply into every handler. All three
/// services share the same SQLite pool; the store additionally carries the
/// blob base path handed to it at construction.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub queue: QueueService,
    pub store: StoreService,
}
